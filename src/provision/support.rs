//! Whether an engine can be connected to right now.

use crate::db::catalog::{display_name, is_builtin, is_known, normalize_engine};
use crate::db::BuildCapabilities;
use crate::paths::DriverPaths;

/// Availability of an engine at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSupport {
    pub available: bool,
    /// Why the engine is unavailable; empty when available.
    pub reason: String,
}

impl RuntimeSupport {
    fn available() -> Self {
        Self {
            available: true,
            reason: String::new(),
        }
    }

    fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            reason: reason.into(),
        }
    }
}

/// Runtime support for `engine` under this build and driver root.
///
/// Optional engines are available only once both the install record and
/// the agent executable are on disk.
pub fn runtime_support_status(
    engine: &str,
    caps: &BuildCapabilities,
    paths: &DriverPaths,
) -> RuntimeSupport {
    if engine.trim().is_empty() || !is_known(engine) {
        return RuntimeSupport::unavailable("unrecognized driver type");
    }
    let engine = normalize_engine(engine);
    if is_builtin(&engine) {
        return RuntimeSupport::available();
    }

    let name = display_name(&engine);
    if !caps.includes_agent(&engine) {
        return RuntimeSupport::unavailable(format!(
            "{} is not included in this slim build; install the full build to use it",
            name
        ));
    }

    let marker = paths.marker(&engine).is_file();
    let executable = paths.executable(&engine).is_file();
    match (marker, executable) {
        (true, true) => RuntimeSupport::available(),
        (true, false) => RuntimeSupport::unavailable(format!(
            "{} driver agent is missing, reinstall it from driver management",
            name
        )),
        _ => RuntimeSupport::unavailable(format!("{} driver is not enabled, install it first", name)),
    }
}
