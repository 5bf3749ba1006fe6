//! Driver management: status listing, install, removal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use super::checksum::{enforce, sha256_file};
use super::definitions::{
    all_definitions, effective_packages, pinned_packages, resolve_definition, DriverDefinition,
    PackageMap,
};
use super::error::{ProvisionError, ProvisionResult};
use super::install::{copy_agent_binary, Installer};
use super::manifest::{resolve_repository_url, ManifestCache, BUILTIN_MANIFEST_URL};
use super::metadata::{read_installed, write_installed, InstalledPackage};
use super::progress::{ProgressEvent, ProgressSink, ProgressStatus};
use super::release::{download_urls, format_size_mb, ReleaseSizeCache};
use super::support::runtime_support_status;
use crate::config::DriverSettings;
use crate::db::catalog::normalize_engine;
use crate::db::BuildCapabilities;
use crate::paths::{asset_name, DriverPaths};

/// Per-engine install state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallState {
    NotInstalled,
    Installing,
    Installed,
    Failed(String),
}

/// One row of the driver status listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverStatus {
    #[serde(rename = "type")]
    pub engine: String,
    pub name: String,
    pub execution: String,
    pub built_in: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pinned_version: String,
    pub package_size_text: String,
    pub runtime_available: bool,
    pub package_installed: bool,
    pub connectable: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub default_download_url: String,
    pub install_dir: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub package_path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub package_file_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub executable_path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub downloaded_at: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverStatusList {
    pub driver_root: String,
    pub drivers: Vec<DriverStatus>,
    pub manifest_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub manifest_error: String,
}

/// Where a driver package would be downloaded from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadTarget {
    #[serde(rename = "driverType")]
    pub engine: String,
    pub driver_name: String,
    pub url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sha256: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub manifest_error: String,
}

/// Provisioning front door.
///
/// Owns the manifest and release-size caches and tracks one install at a
/// time per engine.
pub struct DriverManager {
    paths: Arc<DriverPaths>,
    caps: BuildCapabilities,
    installer: Installer,
    manifests: ManifestCache,
    sizes: ReleaseSizeCache,
    repository: String,
    version: String,
    default_manifest: String,
    states: Mutex<HashMap<String, InstallState>>,
}

impl DriverManager {
    pub fn new(paths: Arc<DriverPaths>, caps: BuildCapabilities, settings: &DriverSettings) -> Self {
        let repository = settings.release_repository.trim().trim_end_matches('/').to_string();
        let installer = Installer::new(paths.clone(), caps.clone(), &repository);
        Self {
            paths,
            caps,
            installer,
            manifests: ManifestCache::default(),
            sizes: ReleaseSizeCache::default(),
            repository,
            version: env!("CARGO_PKG_VERSION").to_string(),
            default_manifest: settings
                .manifest_url
                .clone()
                .unwrap_or_else(|| BUILTIN_MANIFEST_URL.to_string()),
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_installer(mut self, installer: Installer) -> Self {
        self.installer = installer;
        self
    }

    pub fn paths(&self) -> &DriverPaths {
        &self.paths
    }

    pub fn capabilities(&self) -> &BuildCapabilities {
        &self.caps
    }

    pub fn install_state(&self, engine: &str) -> InstallState {
        let engine = normalize_engine(engine);
        if let Some(state) = self.lock_states().get(&engine) {
            return state.clone();
        }
        if read_installed(&self.paths, &engine).is_some() && self.paths.executable(&engine).is_file() {
            InstallState::Installed
        } else {
            InstallState::NotInstalled
        }
    }

    fn lock_states(&self) -> std::sync::MutexGuard<'_, HashMap<String, InstallState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn manifest_address<'a>(&'a self, manifest_url: &'a str) -> &'a str {
        if manifest_url.trim().is_empty() {
            &self.default_manifest
        } else {
            manifest_url
        }
    }

    /// Pinned packages with manifest overrides. A manifest failure falls
    /// back to the pinned table and is returned alongside.
    pub async fn effective_packages(&self, manifest_url: &str) -> (PackageMap, Option<String>) {
        match self.manifests.resolve(self.manifest_address(manifest_url)).await {
            Ok(overrides) => (effective_packages(&overrides), None),
            Err(e) => {
                tracing::warn!(error = %e, "driver manifest unavailable, using pinned packages");
                (pinned_packages(), Some(e.to_string()))
            }
        }
    }

    /// Status of every known engine.
    pub async fn status_list(&self, manifest_url: &str) -> DriverStatusList {
        let (packages, manifest_error) = self.effective_packages(manifest_url).await;
        let definitions = all_definitions(&packages);

        let offered: Vec<String> = definitions
            .iter()
            .filter(|d| !d.built_in && self.caps.includes_agent(&d.engine))
            .map(|d| d.engine.clone())
            .collect();
        let preloaded = if offered.is_empty() {
            HashMap::new()
        } else {
            self.sizes.preload(&self.repository, &self.version, &offered).await
        };

        let drivers = definitions
            .iter()
            .map(|definition| self.status_of(definition, &preloaded))
            .collect();

        let manifest_address = self.manifest_address(manifest_url);
        DriverStatusList {
            driver_root: self.paths.root().to_string_lossy().to_string(),
            drivers,
            manifest_url: resolve_repository_url(manifest_address)
                .unwrap_or_else(|_| manifest_address.trim().to_string()),
            manifest_error: manifest_error.unwrap_or_default(),
        }
    }

    fn status_of(&self, definition: &DriverDefinition, preloaded: &HashMap<String, u64>) -> DriverStatus {
        let engine = definition.engine.as_str();
        let support = runtime_support_status(engine, &self.caps, &self.paths);
        let installed = read_installed(&self.paths, engine);
        let package_installed = definition.built_in || installed.is_some() || support.available;

        let message = if definition.built_in {
            "built in, ready to connect".to_string()
        } else if support.available {
            "driver agent installed, ready to connect".to_string()
        } else if package_installed && !support.reason.is_empty() {
            support.reason.clone()
        } else if package_installed {
            "installed, pending".to_string()
        } else if !support.reason.is_empty() {
            support.reason.clone()
        } else if !definition.pinned_version.is_empty() {
            format!("not enabled (version: {})", definition.pinned_version)
        } else {
            "not enabled".to_string()
        };

        let mut status = DriverStatus {
            engine: definition.engine.clone(),
            name: definition.name.clone(),
            execution: definition.execution.as_str().to_string(),
            built_in: definition.built_in,
            pinned_version: definition.pinned_version.clone(),
            package_size_text: self.package_size_text(definition, installed.as_ref(), preloaded),
            runtime_available: support.available,
            package_installed,
            connectable: support.available,
            default_download_url: definition.default_download_url.clone(),
            install_dir: self.paths.install_dir(engine).to_string_lossy().to_string(),
            package_path: String::new(),
            package_file_name: String::new(),
            executable_path: String::new(),
            downloaded_at: String::new(),
            message,
        };
        if let Some(meta) = installed {
            status.package_path = meta.file_path;
            status.package_file_name = meta.file_name;
            status.executable_path = meta.executable_path;
            status.downloaded_at = meta.downloaded_at;
        }
        status
    }

    fn package_size_text(
        &self,
        definition: &DriverDefinition,
        installed: Option<&InstalledPackage>,
        preloaded: &HashMap<String, u64>,
    ) -> String {
        if definition.built_in {
            return "builtin".to_string();
        }
        if let Some(size) = installed.and_then(InstalledPackage::size_bytes).filter(|s| *s > 0) {
            return format_size_mb(size);
        }
        if let Some(size) = preloaded.get(&definition.engine).filter(|s| **s > 0) {
            return format_size_mb(*size);
        }
        if !self.caps.includes_agent(&definition.engine) {
            return "unreleased".to_string();
        }
        "-".to_string()
    }

    /// Resolve an optional engine that this build can provision.
    fn optional_definition(&self, engine: &str, packages: &PackageMap) -> ProvisionResult<DriverDefinition> {
        let definition = resolve_definition(engine, packages)
            .ok_or_else(|| ProvisionError::UnknownDriver(engine.trim().to_string()))?;
        if definition.built_in {
            return Err(ProvisionError::Builtin(definition.name));
        }
        if !self.caps.includes_agent(&definition.engine) {
            return Err(ProvisionError::DriverUnavailable(format!(
                "{} is not included in this slim build; install the full build to use it",
                definition.name
            )));
        }
        Ok(definition)
    }

    /// The URL an install would try first.
    pub async fn resolve_download_url(&self, engine: &str, manifest_url: &str) -> ProvisionResult<DownloadTarget> {
        let (packages, manifest_error) = self.effective_packages(manifest_url).await;
        let definition = self.optional_definition(engine, &packages)?;
        let url = download_urls(
            &self.repository,
            &definition.engine,
            &definition.default_download_url,
            &definition.pinned_version,
        )
        .into_iter()
        .next()
        .unwrap_or_default();

        Ok(DownloadTarget {
            engine: definition.engine,
            driver_name: definition.name,
            url,
            sha256: definition.sha256,
            manifest_error: manifest_error.unwrap_or_default(),
        })
    }

    fn begin_install(&self, engine: &str) -> ProvisionResult<()> {
        let mut states = self.lock_states();
        if states.get(engine) == Some(&InstallState::Installing) {
            return Err(ProvisionError::InstallInProgress(engine.to_string()));
        }
        states.insert(engine.to_string(), InstallState::Installing);
        Ok(())
    }

    fn finish_install<T>(&self, engine: &str, result: &ProvisionResult<T>) {
        let state = match result {
            Ok(_) => InstallState::Installed,
            Err(e) => InstallState::Failed(e.to_string()),
        };
        self.lock_states().insert(engine.to_string(), state);
    }

    /// Install an optional engine's agent. `url` takes precedence over the
    /// resolved definition's download URL.
    pub async fn install(
        &self,
        engine: &str,
        url: &str,
        manifest_url: &str,
        progress: &dyn ProgressSink,
    ) -> ProvisionResult<InstalledPackage> {
        let (packages, _) = self.effective_packages(manifest_url).await;
        let definition = self.optional_definition(engine, &packages)?;
        let engine = definition.engine.clone();
        self.begin_install(&engine)?;

        progress.emit(ProgressEvent::new(&engine, ProgressStatus::Start, 0, 0, "starting install"));
        let explicit = if url.trim().is_empty() {
            definition.default_download_url.as_str()
        } else {
            url
        };
        let result = self.run_install(&definition, explicit, progress).await;
        self.report(&engine, &result, progress);
        self.finish_install(&engine, &result);
        result
    }

    async fn run_install(
        &self,
        definition: &DriverDefinition,
        url: &str,
        progress: &dyn ProgressSink,
    ) -> ProvisionResult<InstalledPackage> {
        let meta = self.installer.install(definition, url, progress).await?;
        progress.emit(ProgressEvent::new(
            &definition.engine,
            ProgressStatus::Downloading,
            95,
            100,
            "writing install record",
        ));
        write_installed(&self.paths, &definition.engine, meta.clone()).await?;
        Ok(meta)
    }

    /// Install a user-supplied agent executable.
    pub async fn install_local_package(
        &self,
        engine: &str,
        file: &Path,
        progress: &dyn ProgressSink,
    ) -> ProvisionResult<InstalledPackage> {
        let (packages, _) = self.effective_packages("").await;
        let definition = self.optional_definition(engine, &packages)?;
        let engine = definition.engine.clone();
        if !file.is_file() {
            return Err(ProvisionError::InvalidInput(format!(
                "driver package not found: {}",
                file.display()
            )));
        }
        self.begin_install(&engine)?;

        progress.emit(ProgressEvent::new(&engine, ProgressStatus::Start, 0, 0, "installing local package"));
        let result = self.run_local_install(&definition, file).await;
        self.report(&engine, &result, progress);
        self.finish_install(&engine, &result);
        result
    }

    async fn run_local_install(&self, definition: &DriverDefinition, file: &Path) -> ProvisionResult<InstalledPackage> {
        let engine = definition.engine.as_str();
        let target = self.paths.executable(engine);
        tokio::fs::create_dir_all(self.paths.install_dir(engine)).await?;

        let source = std::path::absolute(file)?;
        if source != std::path::absolute(&target)? {
            copy_agent_binary(&source, &target).await?;
        }
        let hash = sha256_file(&target).await?;
        enforce(definition.checksum_policy, engine, &definition.sha256, &hash, &target).await?;

        let mut meta = InstalledPackage::for_executable(
            engine,
            &target,
            &format!("file://{}", source.display()),
            &hash,
        );
        meta.file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| asset_name(engine));
        write_installed(&self.paths, engine, meta.clone()).await?;
        tracing::info!(engine, source = %source.display(), "installed local driver package");
        Ok(meta)
    }

    fn report<T>(&self, engine: &str, result: &ProvisionResult<T>, progress: &dyn ProgressSink) {
        match result {
            Ok(_) => progress.emit(ProgressEvent::new(engine, ProgressStatus::Done, 1, 1, "install complete")),
            Err(e) => {
                tracing::warn!(engine, error = %e, "driver install failed");
                progress.emit(ProgressEvent::new(engine, ProgressStatus::Error, 0, 0, e.to_string()))
            }
        }
    }

    /// Delete an optional engine's install directory.
    pub async fn remove(&self, engine: &str) -> ProvisionResult<()> {
        let definition = resolve_definition(engine, &pinned_packages())
            .ok_or_else(|| ProvisionError::UnknownDriver(engine.trim().to_string()))?;
        if definition.built_in {
            return Err(ProvisionError::Builtin(definition.name));
        }
        if self.install_state(&definition.engine) == InstallState::Installing {
            return Err(ProvisionError::InstallInProgress(definition.engine));
        }

        let dir = self.paths.install_dir(&definition.engine);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!(engine = %definition.engine, dir = %dir.display(), "removed driver");
        self.lock_states()
            .insert(definition.engine, InstallState::NotInstalled);
        Ok(())
    }

    /// Point the driver root at `dir`; empty restores the default.
    pub fn configure_driver_root(&self, dir: &str) -> ProvisionResult<PathBuf> {
        let trimmed = dir.trim();
        if trimmed.is_empty() {
            self.paths.set_root("");
        } else {
            let resolved = std::path::absolute(trimmed)?;
            if resolved.is_file() {
                return Err(ProvisionError::InvalidInput(format!(
                    "driver root is a file: {}",
                    resolved.display()
                )));
            }
            self.paths.set_root(&resolved);
        }
        Ok(self.paths.root())
    }

    pub fn resolve_repository_url(&self, raw: &str) -> ProvisionResult<String> {
        resolve_repository_url(raw)
    }
}
