//! Release asset URLs and the asset-size cache.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::Deserialize;

use super::error::{ProvisionError, ProvisionResult};
use crate::paths::asset_name;

pub const RELEASE_SIZE_TTL: Duration = Duration::from_secs(30 * 60);
pub const RELEASE_SIZE_ERROR_TTL: Duration = Duration::from_secs(30);
pub const RELEASE_PROBE_TIMEOUT: Duration = Duration::from_secs(4);

/// `v1.2.3` for a real version; `None` for empty or `0.0.0`.
pub fn release_tag(version: &str) -> Option<String> {
    let version = version.trim().trim_start_matches('v');
    if version.is_empty() || version == "0.0.0" {
        None
    } else {
        Some(format!("v{}", version))
    }
}

/// Download candidates in order: explicit http(s) URL, the asset of this
/// version's release, the asset of the latest release. Duplicates dropped.
pub fn download_urls(repository: &str, engine: &str, explicit: &str, version: &str) -> Vec<String> {
    let repository = repository.trim().trim_end_matches('/');
    let asset = asset_name(engine);
    let mut urls = Vec::new();
    let mut seen = HashSet::new();
    let mut push = |url: String| {
        if !url.is_empty() && seen.insert(url.clone()) {
            urls.push(url);
        }
    };

    let explicit = explicit.trim();
    if explicit.starts_with("http://") || explicit.starts_with("https://") {
        push(explicit.to_string());
    }
    if let Some(tag) = release_tag(version) {
        push(format!("{}/releases/download/{}/{}", repository, tag, asset));
    }
    push(format!("{}/releases/latest/download/{}", repository, asset));
    urls
}

/// GitHub API base for a `https://github.com/<owner>/<repo>` repository.
pub fn api_base(repository: &str) -> Option<String> {
    let path = repository
        .trim()
        .trim_end_matches('/')
        .strip_prefix("https://github.com/")?;
    let mut parts = path.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(repo), None) if !owner.is_empty() && !repo.is_empty() => {
            Some(format!("https://api.github.com/repos/{}/{}", owner, repo))
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Release {
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReleaseAsset {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

impl Release {
    /// Asset name to size, skipping unnamed or empty assets.
    pub fn size_map(&self) -> HashMap<String, u64> {
        self.assets
            .iter()
            .filter(|a| !a.name.trim().is_empty() && a.size > 0)
            .map(|a| (a.name.trim().to_string(), a.size))
            .collect()
    }
}

async fn fetch_release(api_url: &str) -> ProvisionResult<Release> {
    let client = reqwest::Client::builder()
        .timeout(RELEASE_PROBE_TIMEOUT)
        .user_agent(concat!("dbnexus-driver-manager/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let response = client
        .get(api_url)
        .header("Accept", "application/vnd.github+json")
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ProvisionError::Download(format!(
            "release lookup failed: HTTP {}",
            status.as_u16()
        )));
    }
    Ok(response.json::<Release>().await?)
}

#[derive(Debug, Clone)]
struct SizeEntry {
    loaded_at: Instant,
    sizes: Result<HashMap<String, u64>, String>,
}

/// Asset sizes per release (`tag:<tag>` or `latest`), with a short TTL for
/// failed lookups.
#[derive(Debug)]
pub struct ReleaseSizeCache {
    ttl: Duration,
    error_ttl: Duration,
    entries: RwLock<HashMap<String, SizeEntry>>,
}

impl Default for ReleaseSizeCache {
    fn default() -> Self {
        Self::with_ttl(RELEASE_SIZE_TTL, RELEASE_SIZE_ERROR_TTL)
    }
}

impl ReleaseSizeCache {
    pub fn with_ttl(ttl: Duration, error_ttl: Duration) -> Self {
        Self {
            ttl,
            error_ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Sizes for `key`, running `fetch` when the entry is missing or stale.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> ProvisionResult<HashMap<String, u64>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ProvisionResult<Release>>,
    {
        let cached = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned();
        if let Some(entry) = cached {
            let ttl = if entry.sizes.is_err() { self.error_ttl } else { self.ttl };
            if entry.loaded_at.elapsed() < ttl {
                return entry.sizes.map_err(ProvisionError::Download);
            }
        }

        let sizes = fetch().await.map(|release| release.size_map());
        let entry = SizeEntry {
            loaded_at: Instant::now(),
            sizes: sizes.as_ref().cloned().map_err(|e| e.to_string()),
        };
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), entry);
        sizes
    }

    /// Package sizes for `engines`: this version's release first, then
    /// latest for whatever is still missing. Lookup failures leave gaps.
    pub async fn preload(
        &self,
        repository: &str,
        version: &str,
        engines: &[String],
    ) -> HashMap<String, u64> {
        let mut result = HashMap::new();
        let Some(api) = api_base(repository) else {
            return result;
        };
        let mut pending: Vec<String> = engines.to_vec();

        let mut fill = |sizes: &HashMap<String, u64>, pending: Vec<String>| -> Vec<String> {
            pending
                .into_iter()
                .filter(|engine| match sizes.get(&asset_name(engine)) {
                    Some(size) if *size > 0 => {
                        result.insert(engine.clone(), *size);
                        false
                    }
                    _ => true,
                })
                .collect()
        };

        if let Some(tag) = release_tag(version) {
            let url = format!("{}/releases/tags/{}", api, tag);
            if let Ok(sizes) = self
                .get_or_fetch(&format!("tag:{}", tag), || fetch_release(&url))
                .await
            {
                pending = fill(&sizes, pending);
            }
        }
        if !pending.is_empty() {
            let url = format!("{}/releases/latest", api);
            if let Ok(sizes) = self.get_or_fetch("latest", || fetch_release(&url)).await {
                fill(&sizes, pending);
            }
        }
        result
    }
}

/// `12.34 MB`, or `-` for unknown sizes.
pub fn format_size_mb(bytes: u64) -> String {
    if bytes == 0 {
        return "-".to_string();
    }
    format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
}
