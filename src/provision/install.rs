//! Install pipeline for one driver agent executable.
//!
//! Sources are tried in order and failures accumulate:
//!
//! 1. an executable already at the target path
//! 2. a pre-built copy next to the main executable or in the working dir
//! 3. downloads: explicit URL, tagged release asset, latest release asset
//! 4. a local `cargo build` of the agent, when this source tree is present
//!
//! The checksum policy of the resolved definition is applied after every
//! copy, download and build.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use super::checksum::{enforce, sha256_file};
use super::definitions::DriverDefinition;
use super::error::{ProvisionError, ProvisionResult};
use super::metadata::InstalledPackage;
use super::progress::{scale_progress, ProgressEvent, ProgressSink, ProgressStatus};
use super::release::download_urls;
use crate::db::BuildCapabilities;
use crate::paths::{asset_name, executable_name, DriverPaths};

/// Progress callback: `(downloaded, total)`, total 0 when unknown.
pub type ByteProgress<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

/// Downloads one URL to a file and returns its SHA256.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path, progress: ByteProgress<'_>) -> ProvisionResult<String>;
}

/// Streaming HTTP download with reqwest.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path, progress: ByteProgress<'_>) -> ProvisionResult<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProvisionError::Download(format!("HTTP {}", status.as_u16())));
        }

        let total = response.content_length().unwrap_or(0);
        let mut file = tokio::fs::File::create(dest).await?;
        let mut hasher = Sha256::new();
        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            progress(downloaded, total);
        }
        file.flush().await?;
        file.sync_all().await?;

        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// Builds an agent executable for one engine from source.
#[async_trait]
pub trait SourceBuilder: Send + Sync {
    async fn build(&self, engine: &str, target: &Path) -> ProvisionResult<()>;
}

/// Runs `cargo build --release --bin driver-agent --features agent-<engine>`
/// in the project root and copies the artifact into place.
#[derive(Debug, Clone, Default)]
pub struct CargoBuilder {
    project_root: Option<PathBuf>,
}

impl CargoBuilder {
    /// Build in `root` instead of searching upward from the working dir.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: Some(root.into()),
        }
    }

    fn project_root(&self) -> ProvisionResult<PathBuf> {
        if let Some(root) = &self.project_root {
            return Ok(root.clone());
        }
        let cwd = std::env::current_dir()?;
        locate_project_root(&cwd).ok_or_else(|| {
            ProvisionError::Build(
                "driver agent sources not found; install a released package instead".to_string(),
            )
        })
    }
}

/// Walk up from `start` to a directory holding this crate's agent sources.
pub fn locate_project_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| {
            dir.join("Cargo.toml").is_file() && dir.join("src/bin/driver_agent.rs").is_file()
        })
        .map(Path::to_path_buf)
}

/// First `cargo` executable on `PATH`.
fn find_cargo() -> Option<PathBuf> {
    let name = format!("cargo{}", std::env::consts::EXE_SUFFIX);
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(&name))
            .find(|candidate| candidate.is_file())
    })
}

#[async_trait]
impl SourceBuilder for CargoBuilder {
    async fn build(&self, engine: &str, target: &Path) -> ProvisionResult<()> {
        let cargo = find_cargo().ok_or_else(|| {
            ProvisionError::Build(format!(
                "cargo is not installed and no pre-built {} agent was found",
                engine
            ))
        })?;
        let root = self.project_root()?;

        tracing::info!(engine, root = %root.display(), "building driver agent from source");
        let output = tokio::process::Command::new(cargo)
            .args(["build", "--release", "--bin", "driver-agent", "--features"])
            .arg(format!("agent-{}", engine))
            .current_dir(&root)
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join(" | ");
            return Err(ProvisionError::Build(format!(
                "cargo build exited with {}: {}",
                output.status, tail
            )));
        }

        let artifact = root
            .join("target")
            .join("release")
            .join(format!("driver-agent{}", std::env::consts::EXE_SUFFIX));
        copy_agent_binary(&artifact, target).await
    }
}

/// Copy an executable via `<target>.tmp`, mark it executable, rename.
pub async fn copy_agent_binary(source: &Path, target: &Path) -> ProvisionResult<()> {
    let temp = tmp_path(target);
    let _ = tokio::fs::remove_file(&temp).await;

    if let Err(e) = tokio::fs::copy(source, &temp).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e.into());
    }
    finalize(&temp, target).await
}

fn tmp_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// chmod 0755 and atomically move `temp` onto `target`.
async fn finalize(temp: &Path, target: &Path) -> ProvisionResult<()> {
    if let Err(e) = make_executable(temp).await {
        let _ = tokio::fs::remove_file(temp).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(temp, target).await {
        let _ = tokio::fs::remove_file(temp).await;
        return Err(e.into());
    }
    Ok(())
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Executes the install pipeline for optional engines.
#[derive(Clone)]
pub struct Installer {
    paths: Arc<DriverPaths>,
    caps: BuildCapabilities,
    fetcher: Arc<dyn Fetcher>,
    builder: Arc<dyn SourceBuilder>,
    repository: String,
    search_dirs: Vec<PathBuf>,
}

impl Installer {
    pub fn new(paths: Arc<DriverPaths>, caps: BuildCapabilities, repository: &str) -> Self {
        Self {
            paths,
            caps,
            fetcher: Arc::new(HttpFetcher::default()),
            builder: Arc::new(CargoBuilder::default()),
            repository: repository.to_string(),
            search_dirs: default_search_dirs(),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_builder(mut self, builder: Arc<dyn SourceBuilder>) -> Self {
        self.builder = builder;
        self
    }

    /// Replace the directories searched for pre-built copies.
    pub fn with_search_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.search_dirs = dirs;
        self
    }

    pub fn paths(&self) -> &DriverPaths {
        &self.paths
    }

    /// Candidate locations of a pre-built agent, in search order.
    pub fn candidate_paths(&self, engine: &str) -> Vec<PathBuf> {
        let names = [executable_name(engine), asset_name(engine)];
        let mut candidates = Vec::new();
        for dir in &self.search_dirs {
            for name in &names {
                candidates.push(dir.join(name));
            }
            for name in &names {
                candidates.push(dir.join("drivers").join(engine).join(name));
            }
        }
        let mut seen = std::collections::HashSet::new();
        candidates.retain(|p| seen.insert(p.clone()));
        candidates
    }

    fn find_candidate(&self, engine: &str, target: &Path) -> Option<PathBuf> {
        let target = std::path::absolute(target).unwrap_or_else(|_| target.to_path_buf());
        self.candidate_paths(engine).into_iter().find(|candidate| {
            let absolute = std::path::absolute(candidate).unwrap_or_else(|_| candidate.clone());
            absolute != target && absolute.is_file()
        })
    }

    /// Make the agent executable for `definition` present and return its
    /// install record. The record is not written here.
    pub async fn install(
        &self,
        definition: &DriverDefinition,
        explicit_url: &str,
        progress: &dyn ProgressSink,
    ) -> ProvisionResult<InstalledPackage> {
        let engine = definition.engine.as_str();
        let display = definition.name.as_str();
        let target = self.paths.executable(engine);
        let emit = |percent: u64, message: String| {
            progress.emit(ProgressEvent::new(
                engine,
                ProgressStatus::Downloading,
                percent,
                100,
                message,
            ))
        };

        match tokio::fs::metadata(&target).await {
            Ok(meta) if meta.is_dir() => {
                return Err(ProvisionError::InvalidInput(format!(
                    "{} agent path is occupied by a directory: {}",
                    display,
                    target.display()
                )))
            }
            Ok(_) => {
                let hash = sha256_file(&target).await?;
                tracing::info!(engine, path = %target.display(), "reusing installed driver agent");
                return Ok(InstalledPackage::for_executable(
                    engine,
                    &target,
                    &format!("local://existing/{}", executable_name(engine)),
                    &hash,
                ));
            }
            Err(_) => {}
        }

        tokio::fs::create_dir_all(self.paths.install_dir(engine)).await?;

        emit(10, "checking for a local driver agent copy".to_string());
        let mut copy_failure = None;
        if let Some(source) = self.find_candidate(engine, &target) {
            match self.install_copy(definition, &source, &target).await {
                Ok(hash) => {
                    tracing::info!(engine, source = %source.display(), "installed driver agent from local copy");
                    return Ok(InstalledPackage::for_executable(
                        engine,
                        &target,
                        &format!("file://{}", source.display()),
                        &hash,
                    ));
                }
                Err(e) => {
                    tracing::warn!(engine, source = %source.display(), error = %e, "local driver agent copy failed");
                    copy_failure = Some(format!("{}: {}", source.display(), e));
                }
            }
        }

        let mut failures = Vec::new();
        let version = if definition.pinned_version.is_empty() {
            env!("CARGO_PKG_VERSION")
        } else {
            definition.pinned_version.as_str()
        };
        for url in download_urls(&self.repository, engine, explicit_url, version) {
            emit(20, format!("downloading {} driver agent", display));
            match self.download(definition, &url, &target, progress).await {
                Ok(hash) => {
                    tracing::info!(engine, url = %url, "downloaded driver agent");
                    return Ok(InstalledPackage::for_executable(engine, &target, &url, &hash));
                }
                Err(e) => {
                    tracing::warn!(engine, url = %url, error = %e, "driver agent download failed");
                    failures.push(format!("{}: {}", url, e));
                }
            }
        }

        emit(92, "no pre-built package, trying a local build".to_string());
        let build = if self.caps.can_rebuild(engine) {
            match self.builder.build(engine, &target).await {
                Ok(()) => match self.verify(definition, &target).await {
                    Ok(hash) => {
                        return Ok(InstalledPackage::for_executable(
                            engine,
                            &target,
                            &format!("local://cargo-build/{}", executable_name(engine)),
                            &hash,
                        ));
                    }
                    Err(e) => e.to_string(),
                },
                Err(ProvisionError::Build(message)) => message,
                Err(e) => e.to_string(),
            }
        } else {
            format!("{} sources are not part of this build", display)
        };

        let mut details = Vec::new();
        if let Some(copy) = copy_failure {
            details.push(format!("local copy failed: {}", copy));
        }
        if !failures.is_empty() {
            details.push(format!("download failed: {}", failures.join("; ")));
        }
        details.push(format!("local build failed: {}", build));
        Err(ProvisionError::Provisioning {
            engine: display.to_string(),
            details: details.join("; "),
        })
    }

    async fn download(
        &self,
        definition: &DriverDefinition,
        url: &str,
        target: &Path,
        progress: &dyn ProgressSink,
    ) -> ProvisionResult<String> {
        let temp = tmp_path(target);
        let _ = tokio::fs::remove_file(&temp).await;

        let engine = definition.engine.as_str();
        let message = format!("downloading {} driver agent", definition.name);
        let on_bytes = |downloaded: u64, total: u64| {
            let (value, scale) = scale_progress(downloaded, total, 20, 90);
            progress.emit(ProgressEvent::new(
                engine,
                ProgressStatus::Downloading,
                value,
                scale,
                message.clone(),
            ));
        };

        let hash = match self.fetcher.fetch(url, &temp, &on_bytes).await {
            Ok(hash) => hash,
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp).await;
                return Err(e);
            }
        };
        enforce(definition.checksum_policy, engine, &definition.sha256, &hash, &temp).await?;
        finalize(&temp, target).await?;
        Ok(hash)
    }

    async fn install_copy(
        &self,
        definition: &DriverDefinition,
        source: &Path,
        target: &Path,
    ) -> ProvisionResult<String> {
        copy_agent_binary(source, target).await?;
        self.verify(definition, target).await
    }

    async fn verify(&self, definition: &DriverDefinition, path: &Path) -> ProvisionResult<String> {
        let hash = sha256_file(path).await?;
        enforce(definition.checksum_policy, &definition.engine, &definition.sha256, &hash, path)
            .await?;
        Ok(hash)
    }
}

/// Directories searched for pre-built agents: the main executable's dir,
/// its `../Resources` bundle dir, and the working dir plus `dist/`.
pub fn default_search_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(exe) = std::env::current_exe() {
        let exe = std::fs::canonicalize(&exe).unwrap_or(exe);
        if let Some(dir) = exe.parent() {
            dirs.push(dir.to_path_buf());
            dirs.push(dir.join("..").join("Resources"));
        }
    }
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd.join("dist"));
        dirs.push(cwd);
    }
    dirs
}
