use dbnexus::config::DriverSettings;
use dbnexus::db::BuildCapabilities;
use dbnexus::paths::DriverPaths;
use dbnexus::provision::{
    effective_packages, resolve_definition, ChecksumPolicy, DriverManager, ManifestCache,
    ProvisionError, PINNED_VERSION,
};
use reqwest::Url;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const REPOSITORY: &str = "https://example.invalid/dbnexus/dbnexus";

fn manager(root: &Path) -> DriverManager {
    let settings = DriverSettings {
        release_repository: REPOSITORY.to_string(),
        ..Default::default()
    };
    DriverManager::new(
        Arc::new(DriverPaths::new(root)),
        BuildCapabilities::full(),
        &settings,
    )
}

fn write_manifest(dir: &Path, body: &str) -> String {
    let path = dir.join("manifest.json");
    std::fs::write(&path, body).unwrap();
    path.to_string_lossy().to_string()
}

#[tokio::test]
async fn test_url_only_override_keeps_pinned_version() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_manifest(
        dir.path(),
        r#"{"drivers":{"duckdb":{"downloadUrl":"https://mirror.example.invalid/duckdb"}}}"#,
    );
    let manager = manager(dir.path());

    let (packages, error) = manager.effective_packages(&manifest).await;
    assert!(error.is_none());
    let duckdb = &packages["duckdb"];
    assert_eq!(duckdb.version, PINNED_VERSION);
    assert_eq!(duckdb.download_url, "https://mirror.example.invalid/duckdb");
    assert_eq!(duckdb.policy, Some(ChecksumPolicy::Warn));
    assert_eq!(packages["mariadb"].download_url, "");

    let target = manager.resolve_download_url("duckdb", &manifest).await.unwrap();
    assert_eq!(target.url, "https://mirror.example.invalid/duckdb");
    assert_eq!(target.driver_name, "DuckDB");
}

#[tokio::test]
async fn test_file_url_manifest_sets_policy_and_checksum() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("drivers.json");
    std::fs::write(
        &path,
        r#"{"engine":"external","drivers":{"Doris":{"sha256":"ABC123","checksumPolicy":"strict"}}}"#,
    )
    .unwrap();
    let address = Url::from_file_path(&path).unwrap().to_string();

    let overrides = ManifestCache::default().resolve(&address).await.unwrap();
    let definition = resolve_definition("doris", &effective_packages(&overrides)).unwrap();
    assert_eq!(definition.engine, "diros");
    assert_eq!(definition.checksum_policy, ChecksumPolicy::Strict);
    assert_eq!(definition.sha256, "ABC123");
    assert_eq!(definition.pinned_version, PINNED_VERSION);
}

#[tokio::test]
async fn test_cache_serves_until_ttl() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_manifest(dir.path(), r#"{"drivers":{"duckdb":{"version":"1.0.0"}}}"#);

    let cache = ManifestCache::default();
    assert_eq!(cache.resolve(&manifest).await.unwrap()["duckdb"].version, "1.0.0");

    write_manifest(dir.path(), r#"{"drivers":{"duckdb":{"version":"2.0.0"}}}"#);
    assert_eq!(cache.resolve(&manifest).await.unwrap()["duckdb"].version, "1.0.0");

    cache.clear();
    assert_eq!(cache.resolve(&manifest).await.unwrap()["duckdb"].version, "2.0.0");

    let uncached = ManifestCache::with_ttl(Duration::ZERO);
    uncached.resolve(&manifest).await.unwrap();
    write_manifest(dir.path(), r#"{"drivers":{"duckdb":{"version":"3.0.0"}}}"#);
    assert_eq!(uncached.resolve(&manifest).await.unwrap()["duckdb"].version, "3.0.0");
}

#[tokio::test]
async fn test_failures_are_cached_too() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("later.json").to_string_lossy().to_string();

    let cache = ManifestCache::default();
    assert!(cache.resolve(&missing).await.is_err());

    write_manifest(dir.path(), "{}");
    std::fs::rename(dir.path().join("manifest.json"), &missing).unwrap();
    assert!(matches!(
        cache.resolve(&missing).await,
        Err(ProvisionError::Manifest(_))
    ));
}

#[tokio::test]
async fn test_broken_manifest_falls_back_to_pinned() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_manifest(dir.path(), "{ not json");
    let manager = manager(dir.path());

    let list = manager.status_list(&manifest).await;
    assert!(list.manifest_error.contains("invalid manifest"));
    assert_eq!(list.drivers.len(), 12);
    let duckdb = list.drivers.iter().find(|d| d.engine == "duckdb").unwrap();
    assert_eq!(duckdb.pinned_version, PINNED_VERSION);

    let target = manager.resolve_download_url("duckdb", &manifest).await.unwrap();
    assert!(!target.manifest_error.is_empty());
    assert!(target.url.starts_with(REPOSITORY));
}

#[test]
fn test_manifest_addresses() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(dir.path());

    assert_eq!(manager.resolve_repository_url("  ").unwrap(), "builtin://manifest");
    assert!(manager.resolve_repository_url("file:").is_err());
    assert!(matches!(
        manager.resolve_repository_url("s3://bucket/manifest.json"),
        Err(ProvisionError::InvalidInput(_))
    ));
    let relative = manager.resolve_repository_url("conf/drivers.json").unwrap();
    assert!(Path::new(&relative).is_absolute());
}
