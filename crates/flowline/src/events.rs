//! Event types for observing flow runs
//!
//! The manager reports run and node progress through an [`EventSink`].
//! Sinks are fire-and-forget: a failed send never affects the run.

use serde::{Deserialize, Serialize};

use crate::types::NodeId;

/// Trait for receiving flow events
///
/// This abstracts over the transport (channel, log, collector) so the
/// engine can be embedded in different contexts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be delivered (e.g., channel closed)
    fn send(&self, event: FlowEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone, thiserror::Error)]
#[error("Event error: {message}")]
pub struct EventError {
    pub message: String,
}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted while a flow runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FlowEvent {
    /// A run started
    #[serde(rename_all = "camelCase")]
    RunStarted { run_id: String, root: NodeId },

    /// A node's required inputs were complete and its action started
    #[serde(rename_all = "camelCase")]
    NodeStarted {
        run_id: String,
        node: NodeId,
        label: String,
    },

    /// A node was re-queued because required inputs are still missing
    #[serde(rename_all = "camelCase")]
    NodeDeferred {
        run_id: String,
        node: NodeId,
        deferrals: usize,
        missing: Vec<String>,
    },

    /// A node's action returned
    #[serde(rename_all = "camelCase")]
    NodeCompleted {
        run_id: String,
        node: NodeId,
        outputs: Vec<String>,
    },

    /// The worklist drained and final outputs are available
    #[serde(rename_all = "camelCase")]
    RunCompleted { run_id: String, outputs: Vec<String> },

    /// The run aborted
    #[serde(rename_all = "camelCase")]
    RunFailed { run_id: String, error: String },
}

impl FlowEvent {
    /// ID of the run the event belongs to
    pub fn run_id(&self) -> &str {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::NodeStarted { run_id, .. }
            | Self::NodeDeferred { run_id, .. }
            | Self::NodeCompleted { run_id, .. }
            | Self::RunCompleted { run_id, .. }
            | Self::RunFailed { run_id, .. } => run_id,
        }
    }
}

/// A no-op event sink that discards all events
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: FlowEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
#[derive(Default)]
pub struct VecEventSink {
    events: parking_lot::Mutex<Vec<FlowEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<FlowEvent> {
        self.events.lock().clone()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: FlowEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}
