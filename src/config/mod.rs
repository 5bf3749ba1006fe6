//! Configuration module for dbnexus.
//!
//! Handles connection configuration, change sets, and settings.

mod connection;
mod settings;

pub use connection::{
    ChangeSet, ConnectionConfig, ConnectionError, SshConfig, Topology, UpdateRow, ValueMap,
};
pub use settings::{
    expand_env_vars, AgentSettings, DriverSettings, LoggingSettings, Settings, SettingsError,
};
