//! # dbnexus
//!
//! Backend connectivity layer for a multi-engine database client.
//!
//! ## Architecture
//!
//! One capability contract ([`db::Database`]) covers every engine. Small
//! engines are linked in-process; heavyweight optional engines run inside
//! `driver-agent` subprocesses that speak NDJSON over stdin/stdout.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │            DatabaseService (statement routing)           │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [fingerprint]
//! ┌─────────────────────────────────────────────────────────┐
//! │     ConnectionCache (ping on hit, evict on failure)      │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [registry factory]
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │  Built-in binding        │   │  AgentDatabase           │
//! │  (SqlBinding + SQLite)   │   │  └─ AgentClient ──NDJSON─┼──▶ driver-agent
//! └──────────────────────────┘   └──────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────┐
//! │   DriverManager: manifest → local copy → download →     │
//! │   source build, checksum policy, installed.json          │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod paths;
pub mod provision;
pub mod runtime;

pub use cache::{fingerprint, ConnectionCache};
pub use config::{ChangeSet, ConnectionConfig, Settings, SettingsError};
pub use db::{BatchApplier, BuildCapabilities, Database, DatabaseService, DriverRegistry};
pub use error::{DbError, DbResult};
pub use runtime::Backend;
