use async_trait::async_trait;
use dbnexus::config::ConnectionConfig;
use dbnexus::db::{
    ColumnDefinition, ColumnDefinitionWithTable, DriverRegistry, ForeignKeyDefinition,
    IndexDefinition, QueryOutput, TriggerDefinition,
};
use dbnexus::{fingerprint, ConnectionCache, Database, DbError, DbResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared counters for every binding a factory hands out.
#[derive(Default)]
struct Probe {
    connects: AtomicUsize,
    closes: AtomicUsize,
    healthy: AtomicBool,
    refuse: AtomicBool,
}

struct FakeDatabase {
    probe: Arc<Probe>,
}

#[async_trait]
impl Database for FakeDatabase {
    async fn connect(&self, _config: &ConnectionConfig) -> DbResult<()> {
        self.probe.connects.fetch_add(1, Ordering::SeqCst);
        if self.probe.refuse.load(Ordering::SeqCst) {
            return Err(DbError::Connection("refused".into()));
        }
        self.probe.healthy.store(true, Ordering::SeqCst);
        Ok(())
    }
    async fn close(&self) -> DbResult<()> {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn ping(&self) -> DbResult<()> {
        if self.probe.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DbError::Connection("gone away".into()))
        }
    }
    async fn query(&self, _sql: &str) -> DbResult<QueryOutput> {
        Ok(QueryOutput::default())
    }
    async fn exec(&self, _sql: &str) -> DbResult<i64> {
        Ok(0)
    }
    async fn get_databases(&self) -> DbResult<Vec<String>> {
        Ok(vec![])
    }
    async fn get_tables(&self, _db: &str) -> DbResult<Vec<String>> {
        Ok(vec![])
    }
    async fn get_create_statement(&self, _db: &str, _table: &str) -> DbResult<String> {
        Ok(String::new())
    }
    async fn get_columns(&self, _db: &str, _table: &str) -> DbResult<Vec<ColumnDefinition>> {
        Ok(vec![])
    }
    async fn get_all_columns(&self, _db: &str) -> DbResult<Vec<ColumnDefinitionWithTable>> {
        Ok(vec![])
    }
    async fn get_indexes(&self, _db: &str, _table: &str) -> DbResult<Vec<IndexDefinition>> {
        Ok(vec![])
    }
    async fn get_foreign_keys(
        &self,
        _db: &str,
        _table: &str,
    ) -> DbResult<Vec<ForeignKeyDefinition>> {
        Ok(vec![])
    }
    async fn get_triggers(&self, _db: &str, _table: &str) -> DbResult<Vec<TriggerDefinition>> {
        Ok(vec![])
    }
}

fn cache() -> (ConnectionCache, Arc<Probe>) {
    let probe = Arc::new(Probe::default());
    let shared = probe.clone();
    let mut registry = DriverRegistry::new();
    registry.register_fn(&["diros", "mariadb"], move || {
        Arc::new(FakeDatabase {
            probe: shared.clone(),
        }) as Arc<dyn Database>
    });
    (ConnectionCache::new(Arc::new(registry)), probe)
}

fn config(engine: &str) -> ConnectionConfig {
    let mut config = ConnectionConfig::network(engine, "db.internal", 9030, "etl", "secret");
    config.database = "warehouse".into();
    config
}

#[tokio::test]
async fn test_hit_reuses_the_same_connection() {
    let (cache, probe) = cache();
    let first = cache.get(&config("diros")).await.unwrap();
    let second = cache.get(&config("diros")).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(probe.connects.load(Ordering::SeqCst), 1);
    assert_eq!(cache.len().await, 1);
}

#[tokio::test]
async fn test_failed_ping_evicts_and_reconnects_once() {
    let (cache, probe) = cache();
    let first = cache.get(&config("diros")).await.unwrap();

    probe.healthy.store(false, Ordering::SeqCst);
    let second = cache.get(&config("diros")).await.unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(probe.connects.load(Ordering::SeqCst), 2);
    assert_eq!(probe.closes.load(Ordering::SeqCst), 1);
    assert_eq!(cache.len().await, 1);
}

#[tokio::test]
async fn test_doris_and_diros_share_a_bucket() {
    let (cache, probe) = cache();
    let a = cache.get(&config("diros")).await.unwrap();
    let b = cache.get(&config("Doris")).await.unwrap();

    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(probe.connects.load(Ordering::SeqCst), 1);
    assert_eq!(fingerprint(&config("doris")), fingerprint(&config("diros")));
}

#[tokio::test]
async fn test_password_change_hits_the_cached_entry() {
    let (cache, probe) = cache();
    cache.get(&config("mariadb")).await.unwrap();

    let mut changed = config("mariadb");
    changed.password = "rotated".into();
    cache.get(&changed).await.unwrap();

    assert_eq!(probe.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_connect_is_not_cached() {
    let (cache, probe) = cache();
    probe.refuse.store(true, Ordering::SeqCst);

    let err = cache.get(&config("diros")).await.err().unwrap();
    assert!(err.to_string().contains("Doris"));
    assert!(cache.is_empty().await);

    probe.refuse.store(false, Ordering::SeqCst);
    cache.get(&config("diros")).await.unwrap();
    assert_eq!(probe.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_reconnect_replaces_and_close_all_drains() {
    let (cache, probe) = cache();
    let first = cache.get(&config("diros")).await.unwrap();
    let second = cache.reconnect(&config("diros")).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(probe.closes.load(Ordering::SeqCst), 1);

    cache.get(&config("mariadb")).await.unwrap();
    assert_eq!(cache.len().await, 2);
    cache.close_all().await;
    assert!(cache.is_empty().await);
    assert_eq!(probe.closes.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_unknown_engine_is_unsupported() {
    let (cache, _) = cache();
    let err = cache.get(&config("oracle")).await.err().unwrap();
    assert!(matches!(err, DbError::UnsupportedType(_)));
}
