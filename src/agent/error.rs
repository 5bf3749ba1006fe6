//! Agent-specific error types.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::error::DbError;

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors that can occur during agent communication.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Failed to spawn the agent process.
    #[error("failed to start driver agent {path}: {source}")]
    SpawnFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A pipe was not captured at spawn time.
    #[error("driver agent {0} pipe unavailable")]
    PipeUnavailable(&'static str),

    /// Failed to write to agent stdin.
    #[error("failed to write to driver agent: {0}")]
    WriteFailed(#[source] io::Error),

    /// Failed to read from agent stdout.
    #[error("failed to read from driver agent: {0}")]
    ReadFailed(#[source] io::Error),

    /// Failed to serialize request to JSON.
    #[error("failed to serialize request: {0}")]
    SerializeFailed(#[source] serde_json::Error),

    /// A line from the agent was not a valid response.
    #[error("malformed driver agent response: {0}")]
    Malformed(String),

    /// Request timed out waiting for response.
    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    /// Agent process exited while a request was pending.
    #[error("driver agent exited unexpectedly")]
    AgentExited,

    /// The client was closed or abandoned after a timeout.
    #[error("driver agent connection is closed")]
    Closed,

    /// Agent answered with `success: false`.
    #[error("{0}")]
    Remote(DbError),
}

impl AgentError {
    /// Check if this error indicates the agent process is gone.
    pub fn is_agent_exited(&self) -> bool {
        matches!(
            self,
            Self::AgentExited | Self::Closed | Self::WriteFailed(_) | Self::ReadFailed(_)
        )
    }

    /// Convert into a contract error, attaching captured stderr to process
    /// failures.
    pub fn into_db_error(self, stderr: &str) -> DbError {
        let with_stderr = |msg: String| {
            if stderr.is_empty() {
                msg
            } else {
                format!("{} (stderr: {})", msg, stderr)
            }
        };

        match self {
            Self::Remote(err) => err,
            Self::Timeout(secs) => DbError::Timeout(secs),
            Self::Malformed(_) | Self::SerializeFailed(_) => DbError::Protocol(self.to_string()),
            other => DbError::Process(with_stderr(other.to_string())),
        }
    }
}

impl From<AgentError> for DbError {
    fn from(err: AgentError) -> Self {
        err.into_db_error("")
    }
}
