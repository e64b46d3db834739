//! Error types for the sandbox module.

use crate::domain::BattleId;

/// Errors produced by the sandbox layer.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("battle {0} already has a sandbox")]
    AlreadyProvisioned(BattleId),

    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("docker {0}")]
    Docker(String),
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;
