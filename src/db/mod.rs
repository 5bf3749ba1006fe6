//! Engine bindings behind one capability contract.
//!
//! - [`contract`]: the [`Database`] trait and its result types
//! - [`registry`]: engine type name to binding factory
//! - [`sql`]: shared SQL binding with failover and change sets
//! - [`sqlite`]: the built-in engine
//! - [`agent_backed`]: optional engines hosted by driver agents
//! - [`service`]: caller-facing operations over the connection cache

pub mod agent_backed;
pub mod capabilities;
pub mod catalog;
pub mod contract;
#[cfg(feature = "duckdb")]
pub mod duckdb;
pub mod registry;
pub mod service;
pub mod sql;
pub mod sqlite;
pub mod statement;

pub use agent_backed::{AgentDatabase, AgentLauncher};
pub use capabilities::BuildCapabilities;
pub use catalog::{display_name, normalize_engine};
pub use contract::{
    BatchApplier, ColumnDefinition, ColumnDefinitionWithTable, Database, ForeignKeyDefinition,
    IndexDefinition, QueryOutput, Row, TriggerDefinition,
};
pub use registry::{DatabaseFactory, DriverRegistry};
pub use service::{DatabaseService, StatementResult};
pub use statement::{classify, StatementKind};
