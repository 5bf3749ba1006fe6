use async_trait::async_trait;
use dbnexus::config::DriverSettings;
use dbnexus::db::BuildCapabilities;
use dbnexus::paths::DriverPaths;
use dbnexus::provision::{
    read_installed, sha256_file, ByteProgress, ChannelSink, DriverManager, Fetcher, InstallState,
    Installer, NullSink, ProgressStatus, ProvisionError, ProvisionResult,
};
use std::path::Path;
use std::sync::{Arc, Mutex};

const REPOSITORY: &str = "https://example.invalid/dbnexus/dbnexus";
const PAYLOAD: &[u8] = b"#!/bin/sh\nexit 0\n";

/// Writes a fixed payload, or fails every URL when `broken` is set.
struct StaticFetcher {
    broken: bool,
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &str, dest: &Path, progress: ByteProgress<'_>) -> ProvisionResult<String> {
        if self.broken {
            return Err(ProvisionError::Download(format!("{} is unreachable", url)));
        }
        tokio::fs::write(dest, PAYLOAD).await?;
        progress(PAYLOAD.len() as u64, 0);
        Ok(sha256_file(dest).await?)
    }
}

/// Serves `PAYLOAD` and remembers every URL it was asked for.
#[derive(Default)]
struct RecordingFetcher {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl Fetcher for RecordingFetcher {
    async fn fetch(&self, url: &str, dest: &Path, progress: ByteProgress<'_>) -> ProvisionResult<String> {
        self.calls.lock().unwrap().push(url.to_string());
        StaticFetcher { broken: false }.fetch(url, dest, progress).await
    }
}

fn manager_with(root: &Path, caps: BuildCapabilities, broken: bool) -> DriverManager {
    let paths = Arc::new(DriverPaths::new(root));
    let settings = DriverSettings {
        release_repository: REPOSITORY.to_string(),
        ..Default::default()
    };
    let installer = Installer::new(paths.clone(), caps.clone(), REPOSITORY)
        .with_fetcher(Arc::new(StaticFetcher { broken }))
        .with_search_dirs(Vec::new());
    DriverManager::new(paths, caps, &settings).with_installer(installer)
}

fn manager(root: &Path) -> DriverManager {
    manager_with(root, BuildCapabilities::full(), false)
}

#[tokio::test]
async fn test_builtin_is_always_connectable() {
    let root = tempfile::tempdir().unwrap();
    let list = manager(root.path()).status_list("").await;

    assert_eq!(list.manifest_url, "builtin://manifest");
    assert!(list.manifest_error.is_empty());
    assert_eq!(list.drivers[0].engine, "sqlite");

    let sqlite = &list.drivers[0];
    assert!(sqlite.built_in);
    assert!(sqlite.package_installed);
    assert!(sqlite.connectable);
    assert_eq!(sqlite.package_size_text, "builtin");
    assert_eq!(sqlite.message, "built in, ready to connect");

    let duckdb = list.drivers.iter().find(|d| d.engine == "duckdb").unwrap();
    assert!(!duckdb.package_installed);
    assert!(!duckdb.connectable);
    assert_eq!(duckdb.package_size_text, "-");
    assert_eq!(duckdb.message, "DuckDB driver is not enabled, install it first");
}

#[tokio::test]
async fn test_slim_build_marks_optional_engines() {
    let root = tempfile::tempdir().unwrap();
    let manager = manager_with(root.path(), BuildCapabilities::slim(), false);
    let list = manager.status_list("").await;

    let mongo = list.drivers.iter().find(|d| d.engine == "mongodb").unwrap();
    assert_eq!(mongo.package_size_text, "unreleased");
    assert!(mongo.message.contains("slim build"));

    let err = manager.install("mongodb", "", "", &NullSink).await.unwrap_err();
    assert!(matches!(err, ProvisionError::DriverUnavailable(_)));
}

#[tokio::test]
async fn test_install_then_remove() {
    let root = tempfile::tempdir().unwrap();
    let manager = manager(root.path());
    let (sink, mut events) = ChannelSink::new();

    let meta = manager.install("duckdb", "", "", &sink).await.unwrap();
    assert_eq!(manager.install_state("duckdb"), InstallState::Installed);
    assert!(meta.download_url.starts_with(REPOSITORY));

    let record = read_installed(manager.paths(), "duckdb").unwrap();
    assert_eq!(record.engine, "duckdb");
    assert_eq!(record.sha256, meta.sha256);

    let mut statuses = Vec::new();
    while let Ok(event) = events.try_recv() {
        statuses.push((event.status, event.percent));
    }
    assert_eq!(statuses.first().map(|s| s.0), Some(ProgressStatus::Start));
    assert_eq!(statuses.last(), Some(&(ProgressStatus::Done, 100.0)));

    let list = manager.status_list("").await;
    let duckdb = list.drivers.iter().find(|d| d.engine == "duckdb").unwrap();
    assert!(duckdb.runtime_available);
    assert!(duckdb.connectable);
    assert_eq!(duckdb.message, "driver agent installed, ready to connect");
    assert_eq!(duckdb.executable_path, meta.executable_path);

    manager.remove("duckdb").await.unwrap();
    assert!(!manager.paths().install_dir("duckdb").exists());
    assert_eq!(manager.install_state("duckdb"), InstallState::NotInstalled);
    manager.remove("duckdb").await.unwrap();
}

#[tokio::test]
async fn test_failed_install_is_recorded() {
    let root = tempfile::tempdir().unwrap();
    let manager = manager_with(root.path(), BuildCapabilities::full(), true);
    let (sink, mut events) = ChannelSink::new();

    let err = manager.install("mariadb", "", "", &sink).await.unwrap_err();
    assert!(matches!(err, ProvisionError::Provisioning { .. }));
    assert!(matches!(manager.install_state("mariadb"), InstallState::Failed(_)));

    let mut last = None;
    while let Ok(event) = events.try_recv() {
        last = Some(event);
    }
    let last = last.unwrap();
    assert_eq!(last.status, ProgressStatus::Error);
    assert!(last.message.contains("MariaDB"));
    assert!(read_installed(manager.paths(), "mariadb").is_none());
}

#[tokio::test]
async fn test_install_local_package() {
    let root = tempfile::tempdir().unwrap();
    let downloads = tempfile::tempdir().unwrap();
    let package = downloads.path().join("tdengine-driver-agent-custom");
    std::fs::write(&package, PAYLOAD).unwrap();

    let manager = manager(root.path());
    let meta = manager
        .install_local_package("tdengine", &package, &NullSink)
        .await
        .unwrap();

    assert_eq!(meta.file_name, "tdengine-driver-agent-custom");
    assert!(meta.download_url.starts_with("file://"));
    assert_eq!(std::fs::read(manager.paths().executable("tdengine")).unwrap(), PAYLOAD);
    assert!(package.exists());

    let list = manager.status_list("").await;
    let tdengine = list.drivers.iter().find(|d| d.engine == "tdengine").unwrap();
    assert!(tdengine.connectable);

    let missing = downloads.path().join("nope");
    assert!(matches!(
        manager.install_local_package("tdengine", &missing, &NullSink).await,
        Err(ProvisionError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_download_target_lookup() {
    let root = tempfile::tempdir().unwrap();
    let manager = manager(root.path());

    let target = manager.resolve_download_url("Doris", "").await.unwrap();
    assert_eq!(target.engine, "diros");
    assert_eq!(target.driver_name, "Doris");
    assert!(target.url.starts_with(REPOSITORY));

    assert!(matches!(
        manager.resolve_download_url("sqlite", "").await,
        Err(ProvisionError::Builtin(_))
    ));
    assert!(matches!(
        manager.resolve_download_url("oracle", "").await,
        Err(ProvisionError::UnknownDriver(_))
    ));
}

#[tokio::test]
async fn test_manifest_version_selects_release_tag() {
    let root = tempfile::tempdir().unwrap();
    let manifest = root.path().join("drivers.json");
    std::fs::write(&manifest, r#"{"drivers":{"duckdb":{"version":"9.9.9"}}}"#).unwrap();
    let manifest = manifest.to_string_lossy().to_string();

    let paths = Arc::new(DriverPaths::new(root.path()));
    let caps = BuildCapabilities::full();
    let settings = DriverSettings {
        release_repository: REPOSITORY.to_string(),
        ..Default::default()
    };
    let fetcher = Arc::new(RecordingFetcher::default());
    let installer = Installer::new(paths.clone(), caps.clone(), REPOSITORY)
        .with_fetcher(fetcher.clone())
        .with_search_dirs(Vec::new());
    let manager = DriverManager::new(paths, caps, &settings).with_installer(installer);

    let meta = manager.install("duckdb", "", &manifest, &NullSink).await.unwrap();
    let target = manager.resolve_download_url("duckdb", &manifest).await.unwrap();

    let calls = fetcher.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].contains("/releases/download/v9.9.9/"));
    assert_eq!(calls[0], target.url);
    assert_eq!(meta.download_url, target.url);
}
