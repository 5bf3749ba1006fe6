//! Driver manifest: remote or local overrides of the pinned package table.
//!
//! ```json
//! {
//!   "engine": "external",
//!   "drivers": {
//!     "duckdb": { "version": "1.2.0", "downloadUrl": "https://...", "sha256": "...",
//!                 "checksumPolicy": "strict" }
//!   }
//! }
//! ```
//!
//! The top-level `engine` (or `defaultEngine`) applies to entries that
//! omit their own. Snake-case spellings are accepted for every field.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::Url;
use serde::Deserialize;

use super::definitions::{ChecksumPolicy, ExecutionEngine, PackageMap, PackageSpec};
use super::error::{ProvisionError, ProvisionResult};
use crate::db::catalog::normalize_engine;

/// Canonical address of the embedded manifest.
pub const BUILTIN_MANIFEST_URL: &str = "builtin://manifest";

/// Manifests larger than this are rejected.
pub const MANIFEST_MAX_SIZE: usize = 2 << 20;

pub const MANIFEST_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

const MANIFEST_FETCH_TIMEOUT: Duration = Duration::from_secs(12);

const BUILTIN_MANIFEST: &str = r#"{
  "engine": "external",
  "drivers": {
    "duckdb":    { "checksumPolicy": "warn" },
    "mariadb":   { "checksumPolicy": "warn" },
    "diros":     { "checksumPolicy": "warn" },
    "sphinx":    { "checksumPolicy": "warn" },
    "sqlserver": { "checksumPolicy": "warn" },
    "dameng":    { "checksumPolicy": "warn" },
    "kingbase":  { "checksumPolicy": "warn" },
    "highgo":    { "checksumPolicy": "warn" },
    "vastbase":  { "checksumPolicy": "warn" },
    "mongodb":   { "checksumPolicy": "warn" },
    "tdengine":  { "checksumPolicy": "warn" }
  }
}"#;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ManifestFile {
    engine: String,
    #[serde(alias = "default_engine", rename = "defaultEngine")]
    default_engine: String,
    drivers: BTreeMap<String, ManifestItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ManifestItem {
    version: String,
    #[serde(rename = "downloadUrl", alias = "download_url")]
    download_url: String,
    sha256: String,
    #[serde(rename = "checksumPolicy", alias = "checksum_policy")]
    checksum_policy: String,
    engine: String,
}

/// Parse manifest JSON into per-engine overrides.
pub fn parse_manifest(content: &[u8]) -> ProvisionResult<PackageMap> {
    let manifest: ManifestFile = serde_json::from_slice(content)
        .map_err(|e| ProvisionError::Manifest(format!("invalid manifest: {}", e)))?;

    let default_engine = ExecutionEngine::parse(&manifest.engine)
        .or_else(|| ExecutionEngine::parse(&manifest.default_engine));

    let mut packages = PackageMap::new();
    for (engine, item) in manifest.drivers {
        if engine.trim().is_empty() {
            continue;
        }
        let policy = item.checksum_policy.trim();
        packages.insert(
            normalize_engine(&engine),
            PackageSpec {
                version: item.version.trim().to_string(),
                download_url: item.download_url.trim().to_string(),
                sha256: item.sha256.trim().to_string(),
                policy: (!policy.is_empty()).then(|| ChecksumPolicy::parse(policy)),
                engine: ExecutionEngine::parse(&item.engine).or(default_engine),
            },
        );
    }
    Ok(packages)
}

/// Normalize a manifest address.
///
/// Empty means the built-in manifest. `http`/`https` are kept, `file:`
/// needs a path, `builtin://manifest` is the only built-in address, bare
/// paths are made absolute, other schemes are rejected.
pub fn resolve_repository_url(raw: &str) -> ProvisionResult<String> {
    let text = raw.trim();
    if text.is_empty() {
        return Ok(BUILTIN_MANIFEST_URL.to_string());
    }

    // single-letter schemes are Windows drive letters
    match Url::parse(text) {
        Ok(url) if url.scheme().len() > 1 => match url.scheme() {
            "http" | "https" => Ok(url.to_string()),
            "file" => {
                if url.path().is_empty() || url.path() == "/" {
                    Err(ProvisionError::InvalidInput(format!(
                        "invalid file manifest address: {}",
                        text
                    )))
                } else {
                    Ok(text.to_string())
                }
            }
            "builtin" => {
                if is_builtin_manifest(&url) {
                    Ok(BUILTIN_MANIFEST_URL.to_string())
                } else {
                    Err(ProvisionError::InvalidInput(format!(
                        "unsupported built-in manifest address: {}",
                        text
                    )))
                }
            }
            other => Err(ProvisionError::InvalidInput(format!(
                "unsupported manifest scheme: {}",
                other
            ))),
        },
        _ => Ok(std::path::absolute(text)?.to_string_lossy().to_string()),
    }
}

fn is_builtin_manifest(url: &Url) -> bool {
    url.scheme() == "builtin"
        && url.host_str().map(|h| h.eq_ignore_ascii_case("manifest")) == Some(true)
        && (url.path().is_empty() || url.path() == "/")
}

/// Load raw manifest bytes from a resolved address.
pub async fn load_manifest_content(resolved: &str) -> ProvisionResult<Vec<u8>> {
    let text = resolved.trim();
    if text.is_empty() {
        return Err(ProvisionError::Manifest("manifest address is empty".to_string()));
    }

    if let Ok(url) = Url::parse(text) {
        match url.scheme() {
            "http" | "https" => return fetch_http(url).await,
            "file" => {
                let path = url.to_file_path().map_err(|_| {
                    ProvisionError::Manifest(format!("invalid file manifest address: {}", text))
                })?;
                return read_limited(&path).await;
            }
            "builtin" if is_builtin_manifest(&url) => return Ok(BUILTIN_MANIFEST.as_bytes().to_vec()),
            "builtin" => {
                return Err(ProvisionError::Manifest(format!(
                    "unsupported built-in manifest address: {}",
                    text
                )))
            }
            _ => {}
        }
    }
    read_limited(Path::new(text)).await
}

async fn fetch_http(url: Url) -> ProvisionResult<Vec<u8>> {
    let client = reqwest::Client::builder()
        .timeout(MANIFEST_FETCH_TIMEOUT)
        .user_agent(concat!("dbnexus-driver-manifest/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ProvisionError::Manifest(format!("fetch failed: HTTP {}", status.as_u16())));
    }

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        body.extend_from_slice(&chunk?);
        if body.len() > MANIFEST_MAX_SIZE {
            return Err(manifest_too_large());
        }
    }
    Ok(body)
}

async fn read_limited(path: &Path) -> ProvisionResult<Vec<u8>> {
    let body = tokio::fs::read(path).await?;
    if body.len() > MANIFEST_MAX_SIZE {
        return Err(manifest_too_large());
    }
    Ok(body)
}

fn manifest_too_large() -> ProvisionError {
    ProvisionError::Manifest(format!("manifest exceeds {} bytes", MANIFEST_MAX_SIZE))
}

#[derive(Debug, Clone)]
struct CacheEntry {
    loaded_at: Instant,
    result: Result<PackageMap, String>,
}

/// Manifest overrides keyed by resolved address, with a TTL.
///
/// Failures are cached too, so a dead manifest host is not retried on
/// every status refresh.
#[derive(Debug)]
pub struct ManifestCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl Default for ManifestCache {
    fn default() -> Self {
        Self::with_ttl(MANIFEST_CACHE_TTL)
    }
}

impl ManifestCache {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Overrides for `manifest_url`, from cache when fresh.
    pub async fn resolve(&self, manifest_url: &str) -> ProvisionResult<PackageMap> {
        let resolved = resolve_repository_url(manifest_url)?;

        let cached = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&resolved)
            .cloned();
        if let Some(entry) = cached {
            if entry.loaded_at.elapsed() < self.ttl {
                return entry.result.map_err(ProvisionError::Manifest);
            }
        }

        let loaded = match load_manifest_content(&resolved).await {
            Ok(content) => parse_manifest(&content),
            Err(e) => Err(e),
        };
        let entry = CacheEntry {
            loaded_at: Instant::now(),
            result: match &loaded {
                Ok(packages) => Ok(packages.clone()),
                Err(e) => Err(e.to_string()),
            },
        };
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(resolved, entry);

        loaded
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
