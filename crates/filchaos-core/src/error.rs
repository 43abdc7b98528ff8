//! Error types for the chaos engine.
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("min interval must be non-zero")] ZeroInterval,
    #[error("concurrency {got} outside 1..={max}")] ConcurrencyOutOfRange { got: usize, max: usize },
    #[error("{0} must be non-zero")] ZeroTimeout(&'static str),
}

/// Everything that can go wrong while resolving a target or running one
/// attack execution.
///
/// Only [`FuzzError::TargetResolution`] and [`FuzzError::Config`] stop a
/// session; the rest are routine outcomes that get logged and dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FuzzError {
    #[error("target resolution: {0}")] TargetResolution(String),
    #[error("connect: {0}")] Connect(String),
    #[error("stream open on {protocol}: {reason}")] StreamOpen { protocol: String, reason: String },
    #[error("write: {0}")] Write(String),
    #[error("read: {0}")] Read(String),
    #[error("{op} timed out after {after:?}")] Timeout { op: &'static str, after: Duration },
    #[error("encode: {0}")] Encode(String),
    #[error("host setup: {0}")] Host(String),
    #[error("cancelled")] Cancelled,
    #[error(transparent)] Config(#[from] ConfigError),
}

impl FuzzError {
    /// Whether this error must abort the session instead of just the execution.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FuzzError::TargetResolution(_) | FuzzError::Config(_))
    }

    /// Short label used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            FuzzError::TargetResolution(_) => "target_resolution",
            FuzzError::Connect(_) => "connect",
            FuzzError::StreamOpen { .. } => "stream_open",
            FuzzError::Write(_) => "write",
            FuzzError::Read(_) => "read",
            FuzzError::Timeout { .. } => "timeout",
            FuzzError::Encode(_) => "encode",
            FuzzError::Host(_) => "host",
            FuzzError::Cancelled => "cancelled",
            FuzzError::Config(_) => "config",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown attack identifier: {0}")]
pub struct ParseAttackError(pub String);
