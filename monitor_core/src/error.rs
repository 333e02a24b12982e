//! Error categories for the monitor execution core.
//!
//! Mirrors the policy table in the design document: each variant carries
//! enough context for its handler to apply the right response (log-and-continue,
//! reconnect, or fatal exit with a specific process exit code).

use thiserror::Error;

/// Crate-wide error type for conditions that a caller must branch on.
///
/// Most fallible internal operations return `anyhow::Result` and only get
/// downcast to this enum at the boundary that needs to dispatch on kind
/// (`main`, the bus client's reconnect loop, the task dispatcher).
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("transient network error: {0}")]
    Transient(String),

    #[error("authorization failed: HTTP {status}")]
    Authorization { status: u16 },

    #[error("capacity exceeded (license exhausted)")]
    Capacity,

    #[error("monitor '{uid}' failed to collect: {reason}")]
    CollectionFailure { uid: String, reason: String },

    #[error("failed to parse task message: {0}")]
    TaskParseFailure(String),

    #[error("unrecognized task command: {0}")]
    UnknownTask(String),

    #[error("live-data request referenced vanished monitor '{0}'")]
    VanishedMonitor(String),

    #[error("publish failed: {0}")]
    PublishFailure(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),
}

impl AgentError {
    /// The process exit code this error should produce if it escapes `main`,
    /// per the External Interfaces exit-code table. Returns `None` for errors
    /// that are never fatal (they are handled and logged in place).
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            AgentError::Authorization { status } => Some(*status as i32),
            AgentError::Capacity => Some(409),
            AgentError::Config(_) | AgentError::Validation(_) => Some(1),
            _ => None,
        }
    }
}

/// Result alias used throughout the crate for operations that terminate a
/// call chain rather than branch on error kind.
pub type Result<T> = anyhow::Result<T>;
