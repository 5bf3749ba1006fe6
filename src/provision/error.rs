//! Provisioning error types.

use std::io;
use thiserror::Error;

/// Result type for provisioning operations.
pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("unsupported driver type: {0}")]
    UnknownDriver(String),

    /// Built-in engines have no package to install or remove.
    #[error("{0} is built in and has no driver package")]
    Builtin(String),

    /// Engine excluded from this build.
    #[error("{0}")]
    DriverUnavailable(String),

    /// Package failed verification under the strict policy.
    #[error("{engine} checksum mismatch: expected {expected}, got {actual}")]
    Checksum {
        engine: String,
        expected: String,
        actual: String,
    },

    /// Every source was tried; the message lists each failure.
    #[error("failed to install {engine}: {details}")]
    Provisioning { engine: String, details: String },

    #[error("driver manifest error: {0}")]
    Manifest(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("local build failed: {0}")]
    Build(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0} is already being installed")]
    InstallInProgress(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
