//! # flowline
//!
//! Builds a flow from a JSON configuration, runs it on JSON inputs and
//! prints the final outputs.

use std::path::{Path, PathBuf};

use clap::Parser;
use flowline::{FlowBuilder, FlowConfig, ManagerOptions, PortValues, DEFAULT_MAX_DEFERRALS};

#[derive(Parser)]
#[command(name = "flowline")]
#[command(about = "Run a Flowline dataflow configuration", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the JSON flow configuration
    #[arg(short, long)]
    config: PathBuf,

    /// Path to a JSON object with the external inputs
    #[arg(short, long)]
    inputs: Option<PathBuf>,

    /// How often a node may be deferred before the run fails
    #[arg(long, default_value_t = DEFAULT_MAX_DEFERRALS)]
    max_deferrals: usize,

    /// Build and validate the flow without running it
    #[arg(long)]
    validate_only: bool,
}

async fn read_inputs(path: Option<&Path>) -> Result<PortValues, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(PortValues::new());
    };
    let content = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let config = FlowConfig::from_path_async(&cli.config).await?;
    let registry = flowline_nodes::builtin_registry();
    log::debug!("Available node types: {:?}", registry.node_types());

    let built = FlowBuilder::new()
        .with_options(ManagerOptions {
            max_deferrals: cli.max_deferrals,
        })
        .build(&config, &registry)?;

    if cli.validate_only {
        log::info!(
            "Flow {} is valid ({} pipes, {} warnings)",
            cli.config.display(),
            built.pipes.len(),
            built.warnings.len()
        );
        return Ok(());
    }

    let inputs = read_inputs(cli.inputs.as_deref()).await?;
    let outputs = built.manager.run(inputs).await?;

    // Sorted keys for stable output
    let sorted: serde_json::Map<String, serde_json::Value> = outputs.into_iter().collect();
    println!("{}", serde_json::to_string_pretty(&sorted)?);
    Ok(())
}
