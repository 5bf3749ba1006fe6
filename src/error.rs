//! Error types for the capability contract.

use std::io;
use thiserror::Error;

/// Result type for contract operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors returned by every [`Database`](crate::db::Database) operation.
#[derive(Error, Debug)]
pub enum DbError {
    /// Dial, authentication or ping failure on the underlying engine.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Malformed or truncated agent message.
    #[error("agent protocol error: {0}")]
    Protocol(String),

    /// Worker spawn or pipe failure. Captured stderr is part of the message.
    #[error("driver agent process error: {0}")]
    Process(String),

    /// Engine excluded from this build, or its agent is not installed.
    #[error("driver unavailable: {0}")]
    DriverUnavailable(String),

    /// No factory registered for the engine type.
    #[error("unsupported database type: {0}")]
    UnsupportedType(String),

    /// The binding lacks an optional capability.
    #[error("operation not supported: {0}")]
    UnsupportedOperation(String),

    /// A method other than connect/close was called before connect.
    #[error("connection not open")]
    NotOpen,

    /// Statement or metadata query failed on the engine.
    #[error("query failed: {0}")]
    Query(String),

    /// Invalid input (bad DSN, unbounded change set, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// JSON encode/decode failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Agent call exceeded its deadline.
    #[error("driver agent did not respond within {0} seconds")]
    Timeout(u64),
}

impl DbError {
    /// Prefix connection-level errors with the engine's display name.
    ///
    /// Query errors pass through unchanged; they already carry the engine's
    /// own message.
    pub fn with_engine(self, display_name: &str) -> Self {
        match self {
            Self::Connection(msg) if !msg.starts_with(display_name) => {
                Self::Connection(format!("{}: {}", display_name, msg))
            }
            Self::Process(msg) if !msg.starts_with(display_name) => {
                Self::Process(format!("{}: {}", display_name, msg))
            }
            Self::DriverUnavailable(msg) if !msg.starts_with(display_name) => {
                Self::DriverUnavailable(format!("{}: {}", display_name, msg))
            }
            other => other,
        }
    }

    /// Short machine-readable code carried on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Protocol(_) => "protocol",
            Self::Process(_) => "process",
            Self::DriverUnavailable(_) => "driver_unavailable",
            Self::UnsupportedType(_) => "unsupported_type",
            Self::UnsupportedOperation(_) => "unsupported",
            Self::NotOpen => "not_open",
            Self::Query(_) => "query",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Rebuild an error from a wire code and message.
    ///
    /// Unknown codes fall back to [`DbError::Query`] so nothing is lost.
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            "connection" => Self::Connection(message),
            "protocol" => Self::Protocol(message),
            "process" => Self::Process(message),
            "driver_unavailable" => Self::DriverUnavailable(message),
            "unsupported_type" => Self::UnsupportedType(message),
            "unsupported" => Self::UnsupportedOperation(message),
            "not_open" => Self::NotOpen,
            "invalid_request" => Self::InvalidRequest(message),
            _ => Self::Query(message),
        }
    }

    /// Text without the variant prefix, used as the wire `error` field.
    pub fn detail(&self) -> String {
        match self {
            Self::Connection(m)
            | Self::Protocol(m)
            | Self::Process(m)
            | Self::DriverUnavailable(m)
            | Self::UnsupportedType(m)
            | Self::UnsupportedOperation(m)
            | Self::Query(m)
            | Self::InvalidRequest(m) => m.clone(),
            other => other.to_string(),
        }
    }
}
