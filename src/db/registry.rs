//! Driver registry: engine type name to binding factory.
//!
//! The registry is built once at process start from a
//! [`BuildCapabilities`] value and then shared read-only. It is the single
//! place that knows which engines exist in this build.

use std::collections::HashMap;
use std::sync::Arc;

use super::agent_backed::{AgentDatabase, AgentLauncher};
use super::capabilities::BuildCapabilities;
use super::catalog::{display_name, is_known, normalize_engine, BUILTIN_ENGINES};
use super::contract::Database;
use super::sqlite;
use crate::error::{DbError, DbResult};

/// Constructor for a fresh, unconnected binding.
pub type DatabaseFactory = Arc<dyn Fn() -> Arc<dyn Database> + Send + Sync>;

#[derive(Clone, Default)]
pub struct DriverRegistry {
    factories: HashMap<String, DatabaseFactory>,
}

impl DriverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry for the main process: built-ins in-process, every optional
    /// engine offered by this build through a driver agent.
    pub fn standard(caps: &BuildCapabilities, launcher: AgentLauncher) -> Self {
        let mut registry = Self::new();

        for engine in BUILTIN_ENGINES {
            if let Some(factory) = in_process_factory(engine) {
                registry.register(engine, factory);
            }
        }

        for engine in &caps.agent_engines {
            let launcher = launcher.clone();
            let engine_name = engine.clone();
            registry.register(
                engine,
                Arc::new(move || {
                    Arc::new(AgentDatabase::new(&engine_name, launcher.clone())) as Arc<dyn Database>
                }),
            );
        }

        registry
    }

    /// Registry for a driver agent: only engines linked into this binary.
    pub fn in_process(caps: &BuildCapabilities) -> Self {
        let mut registry = Self::new();
        for engine in &caps.in_process {
            if let Some(factory) = in_process_factory(engine) {
                registry.register(engine, factory);
            }
        }
        registry
    }

    /// Register a factory. Re-registering a type replaces the old factory.
    pub fn register(&mut self, engine: &str, factory: DatabaseFactory) {
        self.factories.insert(normalize_engine(engine), factory);
    }

    /// Register one closure under several type names.
    pub fn register_fn<F>(&mut self, engines: &[&str], factory: F)
    where
        F: Fn() -> Arc<dyn Database> + Send + Sync + 'static,
    {
        let factory: DatabaseFactory = Arc::new(factory);
        for engine in engines {
            self.register(engine, factory.clone());
        }
    }

    /// Construct an unconnected binding for the engine type.
    pub fn create(&self, engine: &str) -> DbResult<Arc<dyn Database>> {
        let normalized = normalize_engine(engine);
        match self.factories.get(&normalized) {
            Some(factory) => Ok(factory()),
            None if is_known(&normalized) => Err(DbError::DriverUnavailable(format!(
                "{} is not included in this slim build; use the full build to enable it",
                display_name(&normalized)
            ))),
            None => Err(DbError::UnsupportedType(engine.trim().to_string())),
        }
    }

    /// Factory for the engine type, if registered.
    pub fn factory(&self, engine: &str) -> Option<DatabaseFactory> {
        self.factories.get(&normalize_engine(engine)).cloned()
    }

    pub fn contains(&self, engine: &str) -> bool {
        self.factories.contains_key(&normalize_engine(engine))
    }

    /// Registered type names, sorted.
    pub fn engines(&self) -> Vec<String> {
        let mut engines: Vec<String> = self.factories.keys().cloned().collect();
        engines.sort();
        engines
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("engines", &self.engines())
            .finish()
    }
}

/// Factory for an engine linked into this binary.
pub fn in_process_factory(engine: &str) -> Option<DatabaseFactory> {
    match normalize_engine(engine).as_str() {
        "sqlite" => Some(Arc::new(|| Arc::new(sqlite::binding()) as Arc<dyn Database>)),
        #[cfg(feature = "duckdb")]
        "duckdb" => Some(Arc::new(|| {
            Arc::new(super::duckdb::DuckDbDatabase::new()) as Arc<dyn Database>
        })),
        _ => None,
    }
}
