//! Database connection configuration.
//!
//! `ConnectionConfig` is the value every contract operation receives. Its
//! serialized form (camelCase) is also the `config` payload of the agent
//! `connect` request, so field names are part of the wire contract.
//!
//! Supports configuration via environment variables:
//! - `DBNEXUS_DB_TYPE`: engine type (sqlite, duckdb, mariadb, ...)
//! - `DBNEXUS_DB_HOST`: hostname, or file path for file engines
//! - `DBNEXUS_DB_PORT`: port (optional)
//! - `DBNEXUS_DB_USER` / `DBNEXUS_DB_PASSWORD`
//! - `DBNEXUS_DB_NAME`: database name

use std::collections::BTreeMap;
use std::env;

use serde::{Deserialize, Serialize};

/// Error type for connection configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Multi-host connection mode for engines supporting failover.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// One endpoint; `hosts` entries are tried as failover candidates.
    #[default]
    Single,
    /// Replica set; non-primary endpoints may use replica credentials.
    Replica,
}

impl Topology {
    fn is_single(&self) -> bool {
        matches!(self, Topology::Single)
    }
}

/// SSH tunnel descriptor. The tunnel itself is provided by a
/// [`TunnelDialer`](crate::db::sql::TunnelDialer).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub key_path: String,
}

/// Database connection configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionConfig {
    /// Engine type name, normalized by the registry.
    #[serde(rename = "type")]
    pub engine: String,
    /// Hostname, or file path for file-based engines.
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    #[serde(skip_serializing_if = "is_false")]
    pub save_password: bool,
    /// Target database or schema.
    pub database: String,
    #[serde(rename = "useSSH")]
    pub use_ssh: bool,
    pub ssh: SshConfig,
    /// Connect/busy timeout in seconds. Zero means the engine default.
    #[serde(skip_serializing_if = "is_zero")]
    pub timeout: u64,
    /// Full connection URI for engines that accept one (document stores).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uri: String,
    /// Additional `host[:port]` candidates for failover or replica sets.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    #[serde(skip_serializing_if = "Topology::is_single")]
    pub topology: Topology,
    /// Credentials used for non-primary endpoints when set.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub replica_user: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub replica_password: String,
    /// Document-store replica-set name.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub replica_set: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub auth_source: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub read_preference: String,
    #[serde(skip_serializing_if = "is_false")]
    pub mongo_srv: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mongo_auth_mechanism: String,
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl ConnectionConfig {
    /// Create a config for a file-based SQLite database.
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            engine: "sqlite".to_string(),
            host: path.into(),
            ..Default::default()
        }
    }

    /// Create a config for a network engine.
    pub fn network(
        engine: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            engine: engine.into(),
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    /// Load configuration from `DBNEXUS_DB_*` environment variables.
    pub fn from_env() -> Result<Self, ConnectionError> {
        let engine = env::var("DBNEXUS_DB_TYPE")
            .map_err(|_| ConnectionError::MissingEnvVar("DBNEXUS_DB_TYPE".to_string()))?;
        let host = env::var("DBNEXUS_DB_HOST")
            .map_err(|_| ConnectionError::MissingEnvVar("DBNEXUS_DB_HOST".to_string()))?;

        let port = match env::var("DBNEXUS_DB_PORT") {
            Ok(p) => p.parse().map_err(|_| {
                ConnectionError::InvalidConfig(format!("DBNEXUS_DB_PORT is not a port: {}", p))
            })?,
            Err(_) => 0,
        };

        Ok(Self {
            engine,
            host,
            port,
            user: env::var("DBNEXUS_DB_USER").unwrap_or_default(),
            password: env::var("DBNEXUS_DB_PASSWORD").unwrap_or_default(),
            database: env::var("DBNEXUS_DB_NAME").unwrap_or_default(),
            ..Default::default()
        })
    }

    /// Copy of this config targeting another database.
    ///
    /// An empty name returns an unchanged copy.
    pub fn with_database(&self, database: &str) -> Self {
        let mut copy = self.clone();
        if !database.trim().is_empty() {
            copy.database = database.trim().to_string();
        }
        copy
    }

    /// `host:port` of the primary endpoint, or just the host when no port.
    pub fn address(&self) -> String {
        if self.port == 0 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// A column→value row used in change sets.
pub type ValueMap = BTreeMap<String, serde_json::Value>;

/// One row update: rows matching `keys` get `values`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateRow {
    pub keys: ValueMap,
    pub values: ValueMap,
}

/// Ordered batch of writes applied by a
/// [`BatchApplier`](crate::db::BatchApplier).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeSet {
    pub inserts: Vec<ValueMap>,
    pub updates: Vec<UpdateRow>,
    pub deletes: Vec<ValueMap>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Total number of row operations.
    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }
}
