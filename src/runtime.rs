//! Process-wide services, built once from [`Settings`].

use std::sync::Arc;

use crate::agent::AgentOptions;
use crate::cache::ConnectionCache;
use crate::config::{Settings, SettingsError};
use crate::db::{AgentLauncher, BuildCapabilities, DatabaseService, DriverRegistry};
use crate::paths::DriverPaths;
use crate::provision::DriverManager;

/// Everything a caller needs: the database service and the driver manager,
/// sharing one driver root.
pub struct Backend {
    pub paths: Arc<DriverPaths>,
    pub capabilities: BuildCapabilities,
    pub registry: Arc<DriverRegistry>,
    pub service: DatabaseService,
    pub drivers: DriverManager,
}

impl Backend {
    /// Backend for the running binary's capabilities.
    pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        Self::with_capabilities(settings, BuildCapabilities::current())
    }

    pub fn with_capabilities(
        settings: &Settings,
        capabilities: BuildCapabilities,
    ) -> Result<Self, SettingsError> {
        let paths = Arc::new(match settings.driver_root()? {
            Some(root) => DriverPaths::new(root),
            None => DriverPaths::default(),
        });

        let launcher = AgentLauncher::new(paths.clone(), AgentOptions::from(&settings.agent));
        let registry = Arc::new(DriverRegistry::standard(&capabilities, launcher));
        let cache = Arc::new(ConnectionCache::new(registry.clone()));
        let drivers = DriverManager::new(paths.clone(), capabilities.clone(), &settings.drivers);

        tracing::debug!(
            root = %paths.root().display(),
            flavor = capabilities.flavor(),
            engines = ?registry.engines(),
            "backend ready"
        );

        Ok(Self {
            paths,
            capabilities,
            registry,
            service: DatabaseService::new(cache),
            drivers,
        })
    }

    /// Close every cached connection and its agent.
    pub async fn shutdown(&self) {
        self.service.shutdown().await;
    }
}
