//! Static driver definitions and their provisioning metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::db::catalog::{display_name, normalize_engine, BUILTIN_ENGINES, OPTIONAL_ENGINES};

/// Version pinned for every optional engine: agents ship with the release.
pub const PINNED_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Where an engine binding runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionEngine {
    InProcess,
    External,
}

impl ExecutionEngine {
    /// Parse a manifest value. Unknown values yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "in-process" | "inprocess" | "builtin" | "go" => Some(Self::InProcess),
            "external" | "external-process" | "exec" | "binary" | "jdbc" => Some(Self::External),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProcess => "in-process",
            Self::External => "external",
        }
    }
}

/// How a package checksum mismatch is handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumPolicy {
    Strict,
    #[default]
    Warn,
    Off,
}

impl ChecksumPolicy {
    /// Parse a policy; anything unrecognized is `warn`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "strict" => Self::Strict,
            "off" => Self::Off,
            _ => Self::Warn,
        }
    }
}

/// Provisioning metadata for one engine. Empty fields mean "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageSpec {
    pub version: String,
    pub download_url: String,
    pub sha256: String,
    pub policy: Option<ChecksumPolicy>,
    pub engine: Option<ExecutionEngine>,
}

impl PackageSpec {
    /// Overlay `other` field by field; set fields win.
    pub fn merge(&mut self, other: &PackageSpec) {
        if !other.version.trim().is_empty() {
            self.version = other.version.trim().to_string();
        }
        if !other.download_url.trim().is_empty() {
            self.download_url = other.download_url.trim().to_string();
        }
        if !other.sha256.trim().is_empty() {
            self.sha256 = other.sha256.trim().to_string();
        }
        if other.policy.is_some() {
            self.policy = other.policy;
        }
        if other.engine.is_some() {
            self.engine = other.engine;
        }
    }
}

pub type PackageMap = BTreeMap<String, PackageSpec>;

/// The compiled-in package table.
pub fn pinned_packages() -> PackageMap {
    OPTIONAL_ENGINES
        .iter()
        .map(|engine| {
            (
                engine.to_string(),
                PackageSpec {
                    version: PINNED_VERSION.to_string(),
                    policy: Some(ChecksumPolicy::Warn),
                    engine: Some(ExecutionEngine::External),
                    ..Default::default()
                },
            )
        })
        .collect()
}

/// Pinned table with manifest overrides applied per field.
pub fn effective_packages(overrides: &PackageMap) -> PackageMap {
    let mut effective = pinned_packages();
    for (engine, spec) in overrides {
        effective
            .entry(normalize_engine(engine))
            .or_default()
            .merge(spec);
    }
    effective
}

/// Static descriptor of one engine type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverDefinition {
    #[serde(rename = "type")]
    pub engine: String,
    pub name: String,
    pub execution: ExecutionEngine,
    pub built_in: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pinned_version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub default_download_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sha256: String,
    pub checksum_policy: ChecksumPolicy,
}

impl DriverDefinition {
    fn builtin(engine: &str) -> Self {
        Self {
            engine: engine.to_string(),
            name: display_name(engine),
            execution: ExecutionEngine::InProcess,
            built_in: true,
            pinned_version: String::new(),
            default_download_url: String::new(),
            sha256: String::new(),
            checksum_policy: ChecksumPolicy::Off,
        }
    }

    fn optional(engine: &str, spec: &PackageSpec) -> Self {
        Self {
            engine: engine.to_string(),
            name: display_name(engine),
            execution: spec.engine.unwrap_or(ExecutionEngine::External),
            built_in: false,
            pinned_version: spec.version.trim().to_string(),
            default_download_url: spec.download_url.trim().to_string(),
            sha256: spec.sha256.trim().to_string(),
            checksum_policy: spec.policy.unwrap_or_default(),
        }
    }
}

/// Every known engine, built-ins first.
pub fn all_definitions(packages: &PackageMap) -> Vec<DriverDefinition> {
    let builtins = BUILTIN_ENGINES.iter().map(|e| DriverDefinition::builtin(e));
    let optional = OPTIONAL_ENGINES.iter().map(|engine| {
        let spec = packages.get(*engine).cloned().unwrap_or_default();
        DriverDefinition::optional(engine, &spec)
    });
    builtins.chain(optional).collect()
}

pub fn resolve_definition(engine: &str, packages: &PackageMap) -> Option<DriverDefinition> {
    let normalized = normalize_engine(engine);
    all_definitions(packages)
        .into_iter()
        .find(|d| d.engine == normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parsing() {
        assert_eq!(ChecksumPolicy::parse("STRICT"), ChecksumPolicy::Strict);
        assert_eq!(ChecksumPolicy::parse(" off "), ChecksumPolicy::Off);
        assert_eq!(ChecksumPolicy::parse("paranoid"), ChecksumPolicy::Warn);
        assert_eq!(ExecutionEngine::parse("go"), Some(ExecutionEngine::InProcess));
        assert_eq!(ExecutionEngine::parse("binary"), Some(ExecutionEngine::External));
        assert_eq!(ExecutionEngine::parse("wasm"), None);
    }

    #[test]
    fn test_merge_is_per_field() {
        let mut base = PackageSpec {
            version: "1.0.0".into(),
            download_url: "https://a/x".into(),
            ..Default::default()
        };
        base.merge(&PackageSpec {
            sha256: "abc".into(),
            policy: Some(ChecksumPolicy::Strict),
            ..Default::default()
        });
        assert_eq!(base.version, "1.0.0");
        assert_eq!(base.download_url, "https://a/x");
        assert_eq!(base.sha256, "abc");
        assert_eq!(base.policy, Some(ChecksumPolicy::Strict));
    }

    #[test]
    fn test_doris_resolves_to_diros() {
        let packages = pinned_packages();
        let definition = resolve_definition("doris", &packages).unwrap();
        assert_eq!(definition.engine, "diros");
        assert!(!definition.built_in);
        assert_eq!(definition.pinned_version, PINNED_VERSION);
    }

    #[test]
    fn test_builtin_definition() {
        let definition = resolve_definition("sqlite3", &pinned_packages()).unwrap();
        assert!(definition.built_in);
        assert_eq!(definition.execution, ExecutionEngine::InProcess);
        assert!(resolve_definition("oracle", &pinned_packages()).is_none());
    }
}
