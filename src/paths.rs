//! Driver install locations.
//!
//! Every optional engine gets its own directory under the driver root:
//!
//! ```text
//! <root>/<engine>/<engine>-driver-agent[.exe]
//! <root>/<engine>/installed.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Name of the per-engine install metadata file.
pub const MARKER_FILE: &str = "installed.json";

/// Resolves install paths below a configurable root.
#[derive(Debug)]
pub struct DriverPaths {
    root: RwLock<PathBuf>,
}

impl DriverPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: RwLock::new(root.into()),
        }
    }

    /// `~/.dbnexus/drivers`, or `./.dbnexus-drivers` when there is no home.
    pub fn default_root() -> PathBuf {
        match dirs::home_dir() {
            Some(home) => home.join(".dbnexus").join("drivers"),
            None => PathBuf::from(".dbnexus-drivers"),
        }
    }

    pub fn root(&self) -> PathBuf {
        self.root.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Point at a new root. An empty path restores the default.
    pub fn set_root(&self, root: impl AsRef<Path>) {
        let root = root.as_ref();
        let next = if root.as_os_str().is_empty() {
            Self::default_root()
        } else {
            root.to_path_buf()
        };
        *self.root.write().unwrap_or_else(|e| e.into_inner()) = next;
    }

    pub fn install_dir(&self, engine: &str) -> PathBuf {
        self.root().join(engine)
    }

    pub fn executable(&self, engine: &str) -> PathBuf {
        self.install_dir(engine).join(executable_name(engine))
    }

    pub fn marker(&self, engine: &str) -> PathBuf {
        self.install_dir(engine).join(MARKER_FILE)
    }
}

impl Default for DriverPaths {
    fn default() -> Self {
        Self::new(Self::default_root())
    }
}

/// `<engine>-driver-agent`, with `.exe` on Windows.
pub fn executable_name(engine: &str) -> String {
    format!("{}-driver-agent{}", engine, std::env::consts::EXE_SUFFIX)
}

/// Release asset name for the running platform.
pub fn asset_name(engine: &str) -> String {
    asset_name_for(engine, std::env::consts::OS, std::env::consts::ARCH)
}

/// `<engine>-driver-agent-<os>-<arch>[.exe]` using release naming.
pub fn asset_name_for(engine: &str, os: &str, arch: &str) -> String {
    let os = match os {
        "macos" => "darwin",
        other => other,
    };
    let arch = match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    };
    let suffix = if os == "windows" { ".exe" } else { "" };
    format!("{}-driver-agent-{}-{}{}", engine, os, arch, suffix)
}
