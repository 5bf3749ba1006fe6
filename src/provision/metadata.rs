//! `installed.json`: the record of one installed driver package.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::db::catalog::normalize_engine;
use crate::paths::DriverPaths;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstalledPackage {
    #[serde(rename = "driverType")]
    pub engine: String,
    pub file_path: String,
    pub file_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub executable_path: String,
    /// Source URL or provenance tag (`file://`, `local://...`).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub download_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sha256: String,
    /// RFC 3339 install time.
    pub downloaded_at: String,
}

impl InstalledPackage {
    /// Record for an executable at `path`.
    pub fn for_executable(engine: &str, path: &Path, source: &str, sha256: &str) -> Self {
        let path_text = path.to_string_lossy().to_string();
        Self {
            engine: normalize_engine(engine),
            file_path: path_text.clone(),
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            executable_path: path_text,
            download_url: source.trim().to_string(),
            sha256: sha256.to_string(),
            downloaded_at: now_rfc3339(),
        }
    }

    /// Size of the installed executable, if it is still on disk.
    pub fn size_bytes(&self) -> Option<u64> {
        let path = if self.executable_path.is_empty() {
            &self.file_path
        } else {
            &self.executable_path
        };
        if path.is_empty() {
            return None;
        }
        std::fs::metadata(path)
            .ok()
            .filter(|m| m.is_file())
            .map(|m| m.len())
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Read the install record. Missing or unreadable files yield `None`.
pub fn read_installed(paths: &DriverPaths, engine: &str) -> Option<InstalledPackage> {
    let engine = normalize_engine(engine);
    let content = std::fs::read_to_string(paths.marker(&engine)).ok()?;
    let mut meta: InstalledPackage = serde_json::from_str(&content).ok()?;
    meta.engine = if meta.engine.trim().is_empty() {
        engine
    } else {
        normalize_engine(&meta.engine)
    };
    Some(meta)
}

/// Write the install record, creating the install directory.
pub async fn write_installed(
    paths: &DriverPaths,
    engine: &str,
    mut meta: InstalledPackage,
) -> std::io::Result<()> {
    let engine = normalize_engine(engine);
    tokio::fs::create_dir_all(paths.install_dir(&engine)).await?;
    meta.engine = engine.clone();
    if meta.downloaded_at.is_empty() {
        meta.downloaded_at = now_rfc3339();
    }
    let payload = serde_json::to_string_pretty(&meta).map_err(std::io::Error::other)?;
    tokio::fs::write(paths.marker(&engine), payload).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DriverPaths::new(dir.path());
        let exe = paths.executable("duckdb");
        let meta = InstalledPackage::for_executable("duckdb", &exe, "file:///tmp/x", "abc");
        write_installed(&paths, "duckdb", meta.clone()).await.unwrap();

        let back = read_installed(&paths, "duckdb").unwrap();
        assert_eq!(back, meta);
        assert!(chrono::DateTime::parse_from_rfc3339(&back.downloaded_at).is_ok());
        assert_eq!(back.size_bytes(), None);
    }

    #[test]
    fn test_missing_or_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DriverPaths::new(dir.path());
        assert!(read_installed(&paths, "duckdb").is_none());

        std::fs::create_dir_all(paths.install_dir("duckdb")).unwrap();
        std::fs::write(paths.marker("duckdb"), "{oops").unwrap();
        assert!(read_installed(&paths, "duckdb").is_none());
    }
}
