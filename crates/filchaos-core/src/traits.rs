//! Hooks for attaching a property-assertion backend.

use serde_json::Value;
use tracing::{debug, info, warn};

/// Records property outcomes observed while the engine runs.
///
/// The engine never depends on what a sink does with an outcome; a sink that
/// drops everything is valid.
pub trait AssertionSink: Send + Sync {
    /// `condition` must hold every time this is called.
    fn always(&self, condition: bool, name: &str, details: &Value);

    /// `condition` must hold at least once over a run.
    fn sometimes(&self, condition: bool, name: &str, details: &Value);

    /// This point in the code must be reached at least once.
    fn reachable(&self, name: &str, details: &Value);

    /// This point in the code must never be reached.
    fn unreachable(&self, name: &str, details: &Value);
}

/// Sink that writes every outcome to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl AssertionSink for LogSink {
    fn always(&self, condition: bool, name: &str, details: &Value) {
        if condition {
            debug!(assertion = name, %details, "always held");
        } else {
            warn!(assertion = name, %details, "always violated");
        }
    }

    fn sometimes(&self, condition: bool, name: &str, details: &Value) {
        debug!(assertion = name, condition, %details, "sometimes");
    }

    fn reachable(&self, name: &str, details: &Value) {
        info!(assertion = name, %details, "reached");
    }

    fn unreachable(&self, name: &str, details: &Value) {
        warn!(assertion = name, %details, "unreachable point reached");
    }
}
