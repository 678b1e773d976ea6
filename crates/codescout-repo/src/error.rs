//! Error types for working-tree access

use thiserror::Error;

/// Errors raised by shell execution and git plumbing
#[derive(Debug, Error)]
pub enum RepoError {
    /// The command could not be spawned at all
    #[error("Failed to spawn command: {0}")]
    Spawn(String),

    /// A required git command exited non-zero
    #[error("Git command failed: {command}: {stderr}")]
    Git { command: String, stderr: String },

    /// Command output could not be interpreted
    #[error("Unparseable command output: {0}")]
    Parse(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for RepoError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Specialized Result type for working-tree operations
pub type RepoResult<T> = Result<T, RepoError>;
