//! Driver provisioning.
//!
//! Decides where an optional engine's `driver-agent` executable comes from,
//! verifies it and records the install under the driver root.
//!
//! ```text
//! pinned packages ──┐
//!                   ├─▶ DriverDefinition ──▶ Installer
//! manifest (TTL) ───┘                          │
//!                                              ├─ existing executable
//!                                              ├─ local pre-built copy
//!                                              ├─ explicit / tagged / latest URL
//!                                              └─ cargo build
//!                                                    │
//!                                   checksum policy ◀┘──▶ installed.json
//! ```

mod checksum;
mod definitions;
mod error;
mod install;
mod manager;
mod manifest;
mod metadata;
mod progress;
mod release;
mod support;

pub use checksum::{enforce, sha256_file};
pub use definitions::{
    all_definitions, effective_packages, pinned_packages, resolve_definition, ChecksumPolicy,
    DriverDefinition, ExecutionEngine, PackageMap, PackageSpec, PINNED_VERSION,
};
pub use error::{ProvisionError, ProvisionResult};
pub use install::{
    copy_agent_binary, default_search_dirs, locate_project_root, ByteProgress, CargoBuilder,
    Fetcher, HttpFetcher, Installer, SourceBuilder,
};
pub use manager::{DownloadTarget, DriverManager, DriverStatus, DriverStatusList, InstallState};
pub use manifest::{
    load_manifest_content, parse_manifest, resolve_repository_url, ManifestCache,
    BUILTIN_MANIFEST_URL, MANIFEST_CACHE_TTL, MANIFEST_MAX_SIZE,
};
pub use metadata::{read_installed, write_installed, InstalledPackage};
pub use progress::{
    scale_progress, ChannelSink, NullSink, ProgressEvent, ProgressSink, ProgressStatus, TracingSink,
};
pub use release::{
    api_base, download_urls, format_size_mb, release_tag, Release, ReleaseAsset, ReleaseSizeCache,
};
pub use support::{runtime_support_status, RuntimeSupport};
