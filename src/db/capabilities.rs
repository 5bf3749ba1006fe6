//! Runtime descriptor of what this build contains.
//!
//! Cargo features decide which engines get compiled; everything else reads
//! this value instead of checking `cfg!` directly, so tests can describe a
//! slim or full build without recompiling.

use std::collections::BTreeSet;

use super::catalog::{normalize_engine, BUILTIN_ENGINES, OPTIONAL_ENGINES};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCapabilities {
    /// Engines linked into this binary and runnable in-process.
    pub in_process: BTreeSet<String>,
    /// Optional engines this distribution offers through driver agents.
    pub agent_engines: BTreeSet<String>,
    /// Engines a local `cargo build` of this source can produce an agent for.
    pub rebuildable: BTreeSet<String>,
}

impl BuildCapabilities {
    /// Capabilities of the running binary, from its cargo features.
    pub fn current() -> Self {
        let mut in_process: BTreeSet<String> =
            BUILTIN_ENGINES.iter().map(|e| e.to_string()).collect();
        let mut rebuildable: BTreeSet<String> = ["sqlite".to_string()].into_iter().collect();

        if cfg!(feature = "duckdb") {
            in_process.insert("duckdb".to_string());
            rebuildable.insert("duckdb".to_string());
        }

        let agent_engines = if cfg!(feature = "full-drivers") {
            OPTIONAL_ENGINES.iter().map(|e| e.to_string()).collect()
        } else {
            BTreeSet::new()
        };

        Self {
            in_process,
            agent_engines,
            rebuildable,
        }
    }

    /// Only the built-in engines, nothing optional.
    pub fn slim() -> Self {
        Self {
            in_process: BUILTIN_ENGINES.iter().map(|e| e.to_string()).collect(),
            agent_engines: BTreeSet::new(),
            rebuildable: BTreeSet::new(),
        }
    }

    /// Built-ins plus every optional engine as an agent.
    pub fn full() -> Self {
        Self {
            agent_engines: OPTIONAL_ENGINES.iter().map(|e| e.to_string()).collect(),
            ..Self::slim()
        }
    }

    pub fn with_rebuildable(mut self, engine: &str) -> Self {
        self.rebuildable.insert(normalize_engine(engine));
        self
    }

    pub fn is_in_process(&self, engine: &str) -> bool {
        self.in_process.contains(&normalize_engine(engine))
    }

    /// Whether the optional engine ships with this distribution.
    pub fn includes_agent(&self, engine: &str) -> bool {
        self.agent_engines.contains(&normalize_engine(engine))
    }

    pub fn can_rebuild(&self, engine: &str) -> bool {
        self.rebuildable.contains(&normalize_engine(engine))
    }

    /// "full" when any optional engine is offered, "slim" otherwise.
    pub fn flavor(&self) -> &'static str {
        if self.agent_engines.is_empty() {
            "slim"
        } else {
            "full"
        }
    }
}

impl Default for BuildCapabilities {
    fn default() -> Self {
        Self::current()
    }
}
