//! Engines that do not offer batch writes must refuse change sets cleanly.

use async_trait::async_trait;
use dbnexus::agent::{methods, AgentRequest, AgentWorker};
use dbnexus::cache::ConnectionCache;
use dbnexus::config::{ChangeSet, ConnectionConfig};
use dbnexus::db::{
    ColumnDefinition, ColumnDefinitionWithTable, Database, DatabaseService, DriverRegistry,
    ForeignKeyDefinition, IndexDefinition, QueryOutput, TriggerDefinition,
};
use dbnexus::{DbError, DbResult};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A binding with reads and exec but no batch applier.
struct ReadMostly {
    execs: Arc<AtomicUsize>,
}

#[async_trait]
impl Database for ReadMostly {
    async fn connect(&self, _config: &ConnectionConfig) -> DbResult<()> {
        Ok(())
    }
    async fn close(&self) -> DbResult<()> {
        Ok(())
    }
    async fn ping(&self) -> DbResult<()> {
        Ok(())
    }
    async fn query(&self, _sql: &str) -> DbResult<QueryOutput> {
        Ok(QueryOutput::default())
    }
    async fn exec(&self, _sql: &str) -> DbResult<i64> {
        self.execs.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }
    async fn get_databases(&self) -> DbResult<Vec<String>> {
        Ok(vec!["default".into()])
    }
    async fn get_tables(&self, _db: &str) -> DbResult<Vec<String>> {
        Ok(vec!["metrics".into()])
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
    async fn get_foreign_keys(&self, _db: &str, _table: &str) -> DbResult<Vec<ForeignKeyDefinition>> {
        Ok(vec![])
    }
    async fn get_triggers(&self, _db: &str, _table: &str) -> DbResult<Vec<TriggerDefinition>> {
        Ok(vec![])
    }
}

fn registry(execs: &Arc<AtomicUsize>) -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    let execs = execs.clone();
    registry.register_fn(&["tdengine"], move || {
        Arc::new(ReadMostly {
            execs: execs.clone(),
        }) as Arc<dyn Database>
    });
    registry
}

fn changes() -> ChangeSet {
    serde_json::from_value(json!({
        "inserts": [{"ts": "2024-01-01T00:00:00Z", "value": 1}],
        "deletes": [{"ts": "2023-12-31T00:00:00Z"}]
    }))
    .unwrap()
}

fn config() -> ConnectionConfig {
    ConnectionConfig::network("tdengine", "td.internal", 6041, "root", "taosdata")
}

#[tokio::test]
async fn test_service_refuses_batch_changes() {
    let execs = Arc::new(AtomicUsize::new(0));
    let registry = Arc::new(registry(&execs));
    let service = DatabaseService::new(Arc::new(ConnectionCache::new(registry)));

    let err = service
        .apply_changes(&config(), "", "metrics", &changes())
        .await
        .unwrap_err();
    match err {
        DbError::UnsupportedOperation(msg) => assert!(msg.contains("TDengine")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(execs.load(Ordering::SeqCst), 0);

    service
        .apply_changes(&config(), "", "metrics", &ChangeSet::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_worker_refuses_apply_changes() {
    let execs = Arc::new(AtomicUsize::new(0));
    let factory = registry(&execs).factory("tdengine").unwrap();
    let mut worker = AgentWorker::new("tdengine", factory);

    let connect = AgentRequest::new(methods::CONNECT).with_config(config());
    assert!(worker.handle(connect).await.success);

    let apply = AgentRequest {
        id: 7,
        ..AgentRequest::new(methods::APPLY_CHANGES).with_changes("metrics", changes())
    };
    let response = worker.handle(apply).await;
    assert!(!response.success);
    assert_eq!(response.id, 7);
    assert!(matches!(response.error(), Some(DbError::UnsupportedOperation(_))));
    assert_eq!(execs.load(Ordering::SeqCst), 0);
}
