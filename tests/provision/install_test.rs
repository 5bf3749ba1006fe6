use async_trait::async_trait;
use dbnexus::db::BuildCapabilities;
use dbnexus::paths::{executable_name, DriverPaths};
use dbnexus::provision::{
    download_urls, pinned_packages, resolve_definition, sha256_file, ByteProgress, ChannelSink,
    ChecksumPolicy, DriverDefinition, Fetcher, Installer, NullSink, ProgressStatus,
    ProvisionError, ProvisionResult, SourceBuilder,
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const REPOSITORY: &str = "https://example.invalid/dbnexus/dbnexus";
const PAYLOAD: &[u8] = b"#!/bin/sh\necho agent\n";

/// Serves `PAYLOAD` for every URL except the ones listed as broken.
#[derive(Default)]
struct RecordingFetcher {
    broken: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl RecordingFetcher {
    fn failing(urls: &[String]) -> Self {
        Self {
            broken: urls.iter().cloned().collect(),
            calls: Mutex::default(),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for RecordingFetcher {
    async fn fetch(&self, url: &str, dest: &Path, progress: ByteProgress<'_>) -> ProvisionResult<String> {
        self.calls.lock().unwrap().push(url.to_string());
        if self.broken.contains(url) {
            return Err(ProvisionError::Download("HTTP 404".to_string()));
        }
        tokio::fs::write(dest, PAYLOAD).await?;
        progress(PAYLOAD.len() as u64, PAYLOAD.len() as u64);
        Ok(sha256_file(dest).await?)
    }
}

#[derive(Default)]
struct FailingBuilder {
    runs: AtomicUsize,
}

#[async_trait]
impl SourceBuilder for FailingBuilder {
    async fn build(&self, _engine: &str, _target: &Path) -> ProvisionResult<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Err(ProvisionError::Build("linker exploded".to_string()))
    }
}

fn definition() -> DriverDefinition {
    let mut definition = resolve_definition("duckdb", &pinned_packages()).unwrap();
    definition.pinned_version = "1.2.3".to_string();
    definition
}

fn installer(root: &Path, caps: BuildCapabilities, fetcher: Arc<RecordingFetcher>) -> Installer {
    Installer::new(Arc::new(DriverPaths::new(root)), caps, REPOSITORY)
        .with_fetcher(fetcher)
        .with_builder(Arc::new(FailingBuilder::default()))
        .with_search_dirs(Vec::new())
}

#[tokio::test]
async fn test_local_copy_skips_downloads() {
    let root = tempfile::tempdir().unwrap();
    let dist = tempfile::tempdir().unwrap();
    std::fs::write(dist.path().join(executable_name("duckdb")), PAYLOAD).unwrap();

    let fetcher = Arc::new(RecordingFetcher::default());
    let installer = installer(root.path(), BuildCapabilities::full(), fetcher.clone())
        .with_search_dirs(vec![dist.path().to_path_buf()]);

    let meta = installer.install(&definition(), "", &NullSink).await.unwrap();

    assert!(fetcher.calls().is_empty());
    assert!(meta.download_url.starts_with("file://"));
    assert_eq!(std::fs::read(&meta.executable_path).unwrap(), PAYLOAD);
}

#[tokio::test]
async fn test_existing_executable_is_reused() {
    let root = tempfile::tempdir().unwrap();
    let paths = DriverPaths::new(root.path());
    std::fs::create_dir_all(paths.install_dir("duckdb")).unwrap();
    std::fs::write(paths.executable("duckdb"), PAYLOAD).unwrap();

    let fetcher = Arc::new(RecordingFetcher::default());
    let meta = installer(root.path(), BuildCapabilities::full(), fetcher.clone())
        .install(&definition(), "", &NullSink)
        .await
        .unwrap();

    assert!(meta.download_url.starts_with("local://existing/"));
    assert!(fetcher.calls().is_empty());
}

#[tokio::test]
async fn test_downloads_fall_through_in_order() {
    let root = tempfile::tempdir().unwrap();
    let explicit = "https://mirror.example.invalid/duckdb-agent";
    let urls = download_urls(REPOSITORY, "duckdb", explicit, "1.2.3");
    assert_eq!(urls.len(), 3);

    let fetcher = Arc::new(RecordingFetcher::failing(&urls[..1]));
    let (sink, mut events) = ChannelSink::new();
    let meta = installer(root.path(), BuildCapabilities::full(), fetcher.clone())
        .install(&definition(), explicit, &sink)
        .await
        .unwrap();

    assert_eq!(fetcher.calls(), urls[..2].to_vec());
    assert_eq!(meta.download_url, urls[1]);
    assert!(urls[1].contains("/releases/download/v1.2.3/"));

    let mut steps = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.status, ProgressStatus::Downloading);
        assert_eq!(event.total, 100);
        steps.push(event.downloaded);
    }
    assert_eq!(steps.first(), Some(&10));
    assert!(steps.contains(&90));
    assert!(steps.iter().all(|step| *step <= 90));
}

#[tokio::test]
async fn test_strict_checksum_mismatch_tries_every_source() {
    let root = tempfile::tempdir().unwrap();
    let mut definition = definition();
    definition.sha256 = "0".repeat(64);
    definition.checksum_policy = ChecksumPolicy::Strict;

    let fetcher = Arc::new(RecordingFetcher::default());
    let installer = installer(root.path(), BuildCapabilities::full(), fetcher.clone());
    let err = installer.install(&definition, "", &NullSink).await.unwrap_err();

    match err {
        ProvisionError::Provisioning { details, .. } => {
            assert!(details.starts_with("download failed: "));
            assert!(details.contains("checksum mismatch"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fetcher.calls(), download_urls(REPOSITORY, "duckdb", "", "1.2.3"));
    assert!(!installer.paths().executable("duckdb").exists());
    let leftovers = std::fs::read_dir(installer.paths().install_dir("duckdb"))
        .unwrap()
        .count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_rejected_local_copy_falls_back_to_download() {
    let root = tempfile::tempdir().unwrap();
    let dist = tempfile::tempdir().unwrap();
    std::fs::write(dist.path().join(executable_name("duckdb")), b"stale agent build").unwrap();

    let payload = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(payload.path(), PAYLOAD).unwrap();
    let mut definition = definition();
    definition.sha256 = sha256_file(payload.path()).await.unwrap();
    definition.checksum_policy = ChecksumPolicy::Strict;

    let fetcher = Arc::new(RecordingFetcher::default());
    let meta = installer(root.path(), BuildCapabilities::full(), fetcher.clone())
        .with_search_dirs(vec![dist.path().to_path_buf()])
        .install(&definition, "", &NullSink)
        .await
        .unwrap();

    assert_eq!(fetcher.calls().len(), 1);
    assert!(meta.download_url.contains("/releases/download/v1.2.3/"));
    assert_eq!(std::fs::read(&meta.executable_path).unwrap(), PAYLOAD);
}

#[tokio::test]
async fn test_warn_checksum_mismatch_installs() {
    let root = tempfile::tempdir().unwrap();
    let mut definition = definition();
    definition.sha256 = "0".repeat(64);
    definition.checksum_policy = ChecksumPolicy::Warn;

    let fetcher = Arc::new(RecordingFetcher::default());
    let meta = installer(root.path(), BuildCapabilities::full(), fetcher)
        .install(&definition, "", &NullSink)
        .await
        .unwrap();
    assert_ne!(meta.sha256, definition.sha256);
}

#[tokio::test]
async fn test_every_source_failing_is_reported_together() {
    let root = tempfile::tempdir().unwrap();
    let urls = download_urls(REPOSITORY, "duckdb", "", "1.2.3");
    let fetcher = Arc::new(RecordingFetcher::failing(&urls));
    let builder = Arc::new(FailingBuilder::default());
    let installer = installer(
        root.path(),
        BuildCapabilities::full().with_rebuildable("duckdb"),
        fetcher.clone(),
    )
    .with_builder(builder.clone());

    let err = installer.install(&definition(), "", &NullSink).await.unwrap_err();
    match err {
        ProvisionError::Provisioning { engine, details } => {
            assert_eq!(engine, "DuckDB");
            assert!(details.starts_with("download failed: "));
            assert!(details.contains(&urls[0]));
            assert!(details.contains("local build failed: "));
            assert!(details.contains("linker exploded"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fetcher.calls(), urls);
    assert_eq!(builder.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_build_is_skipped_without_sources() {
    let root = tempfile::tempdir().unwrap();
    let urls = download_urls(REPOSITORY, "duckdb", "", "1.2.3");
    let builder = Arc::new(FailingBuilder::default());
    let installer = installer(
        root.path(),
        BuildCapabilities::full(),
        Arc::new(RecordingFetcher::failing(&urls)),
    )
    .with_builder(builder.clone());

    let err = installer.install(&definition(), "", &NullSink).await.unwrap_err();
    assert!(err.to_string().contains("DuckDB sources are not part of this build"));
    assert_eq!(builder.runs.load(Ordering::SeqCst), 0);
}
