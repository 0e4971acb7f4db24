//! Amount Conversion Node
//!
//! Turns an absolute or percentage amount into an absolute item count.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use flowline::{FlowError, FlowNode, NodeFactoryFn, NodeRegistry, PortValues, Result};
use serde_json::{json, Value};

/// Unit Amount Converter Node
///
/// # Inputs
/// - `items` (required) - JSON array the amount refers to
/// - `amount` (required) - Integer count, or a percentage string such as `"10%"`
///
/// # Outputs
/// - `amount` - Absolute count, clamped to the number of items
///
/// Percentages are rounded half to even.
#[derive(Debug, Clone, Default)]
pub struct UnitAmountConverterNode;

impl UnitAmountConverterNode {
    /// Port ID for the items input
    pub const PORT_ITEMS: &'static str = "items";
    /// Port ID for the amount input and output
    pub const PORT_AMOUNT: &'static str = "amount";

    pub fn new() -> Self {
        Self
    }

    /// Factory for the `unit-amount-converter` node type (no init parameters)
    pub fn from_init(_init: &Value, _registry: &NodeRegistry) -> Result<Arc<dyn FlowNode>> {
        Ok(Arc::new(Self::new()))
    }

    /// Resolve `amount` against `total` items
    pub fn convert(amount: &Value, total: usize) -> Result<u64> {
        let invalid = || {
            FlowError::invalid_input(
                Self::PORT_AMOUNT,
                format!("non-negative integer or percentage string, got {amount}"),
            )
        };

        let absolute = match amount {
            Value::String(s) => match s.trim().strip_suffix('%') {
                Some(pct) => {
                    let pct: f64 = pct.trim().parse().map_err(|_| invalid())?;
                    let scaled = (total as f64 * pct / 100.0).round_ties_even();
                    if !scaled.is_finite() || scaled < 0.0 {
                        return Err(invalid());
                    }
                    scaled as u64
                }
                None => s.trim().parse::<u64>().map_err(|_| invalid())?,
            },
            Value::Number(n) => match (n.as_u64(), n.as_f64()) {
                (Some(v), _) => v,
                (None, Some(f)) if f >= 0.0 => f.trunc() as u64,
                _ => return Err(invalid()),
            },
            _ => return Err(invalid()),
        };

        Ok(absolute.min(total as u64))
    }
}

inventory::submit!(NodeFactoryFn {
    node_type: "unit-amount-converter",
    factory: UnitAmountConverterNode::from_init,
});

#[async_trait]
impl FlowNode for UnitAmountConverterNode {
    fn label(&self) -> String {
        "UnitAmountConverter(Converting relative or absolute amount to absolute number)".to_string()
    }

    fn required_inputs(&self) -> BTreeSet<String> {
        [Self::PORT_ITEMS, Self::PORT_AMOUNT]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn outputs(&self) -> Vec<String> {
        vec![Self::PORT_AMOUNT.to_string()]
    }

    async fn execute(&self, inputs: PortValues) -> Result<PortValues> {
        let total = inputs
            .get(Self::PORT_ITEMS)
            .and_then(Value::as_array)
            .map(Vec::len)
            .ok_or_else(|| FlowError::invalid_input(Self::PORT_ITEMS, "array"))?;
        let amount = inputs
            .get(Self::PORT_AMOUNT)
            .ok_or_else(|| FlowError::invalid_input(Self::PORT_AMOUNT, "value"))?;

        let absolute = Self::convert(amount, total)?;
        log::debug!("Converted amount {amount} of {total} items to {absolute}");

        Ok(PortValues::from([(
            Self::PORT_AMOUNT.to_string(),
            json!(absolute),
        )]))
    }
}
