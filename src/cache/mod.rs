//! Live connection cache.
//!
//! Connections are keyed by [`fingerprint`] and revalidated with a ping on
//! every hit.
//!
//! # Design
//!
//! - One mutex spans lookup, ping, eviction and insert
//! - A failed ping closes and evicts the entry; the caller gets a fresh one
//! - Failed connects are never cached
//!
//! Different fingerprints serialize against each other.

mod fingerprint;
pub use fingerprint::{fingerprint, sha256_hex};

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::ConnectionConfig;
use crate::db::catalog::display_name;
use crate::db::{Database, DriverRegistry};
use crate::error::DbResult;

/// Cache of connected bindings, one per fingerprint.
pub struct ConnectionCache {
    registry: Arc<DriverRegistry>,
    entries: Mutex<HashMap<String, Arc<dyn Database>>>,
}

impl ConnectionCache {
    pub fn new(registry: Arc<DriverRegistry>) -> Self {
        Self {
            registry,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    /// Connected binding for `config`, reused when its ping succeeds.
    pub async fn get(&self, config: &ConnectionConfig) -> DbResult<Arc<dyn Database>> {
        let key = fingerprint(config);
        let mut entries = self.entries.lock().await;

        if let Some(db) = entries.get(&key).cloned() {
            match db.ping().await {
                Ok(()) => return Ok(db),
                Err(e) => {
                    tracing::info!(engine = %config.engine, error = %e, "cached connection failed ping, reconnecting");
                    entries.remove(&key);
                    if let Err(e) = db.close().await {
                        tracing::debug!(error = %e, "closing stale connection failed");
                    }
                }
            }
        }

        let db = self.open(config).await?;
        entries.insert(key, db.clone());
        Ok(db)
    }

    /// Drop any cached entry and connect again.
    pub async fn reconnect(&self, config: &ConnectionConfig) -> DbResult<Arc<dyn Database>> {
        let key = fingerprint(config);
        let mut entries = self.entries.lock().await;

        if let Some(old) = entries.remove(&key) {
            let _ = old.close().await;
        }

        let db = self.open(config).await?;
        entries.insert(key, db.clone());
        Ok(db)
    }

    async fn open(&self, config: &ConnectionConfig) -> DbResult<Arc<dyn Database>> {
        let display = display_name(&config.engine);
        let db = self
            .registry
            .create(&config.engine)
            .map_err(|e| e.with_engine(&display))?;
        db.connect(config).await.map_err(|e| e.with_engine(&display))?;
        tracing::debug!(engine = %config.engine, address = %config.address(), "connection cached");
        Ok(db)
    }

    /// Close and forget the entry for `config`. Returns whether one existed.
    pub async fn remove(&self, config: &ConnectionConfig) -> DbResult<bool> {
        let removed = self.entries.lock().await.remove(&fingerprint(config));
        match removed {
            Some(db) => {
                db.close().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Close every cached connection.
    pub async fn close_all(&self) {
        let drained: Vec<(String, Arc<dyn Database>)> =
            self.entries.lock().await.drain().collect();
        for (_, db) in drained {
            if let Err(e) = db.close().await {
                tracing::warn!(error = %e, "failed to close cached connection");
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
