//! Error taxonomy for the provisioner.
//!
//! Step failures are not errors: they are recorded on
//! [`ExecutionResult`](crate::controller::ExecutionResult). The variants
//! here cover the cases where a directive could not be invoked at all,
//! local I/O around artifacts, and precondition failures that stop an
//! install before its first step.

use std::path::PathBuf;

/// Errors produced by the provisioning core.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("step '{step}' has an empty command")]
    EmptyCommand { step: String },

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command timed out after {secs} seconds")]
    Timeout { secs: u64 },

    #[error("'{command}' failed: {detail}")]
    CommandFailed { command: String, detail: String },

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("required path is missing: {}", .0.display())]
    MissingPath(PathBuf),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    /// Whether this error must abort the install before any step runs.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            ProvisionError::Precondition(_)
                | ProvisionError::MissingPath(_)
                | ProvisionError::EmptyCommand { .. }
        )
    }
}

/// Result type for provisioning operations.
pub type Result<T> = std::result::Result<T, ProvisionError>;
