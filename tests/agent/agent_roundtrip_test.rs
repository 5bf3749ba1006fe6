//! End-to-end tests against the real `driver-agent` binary hosting SQLite.

use dbnexus::agent::{methods, AgentClient, AgentError, AgentOptions, AgentRequest};
use dbnexus::config::{ChangeSet, ConnectionConfig};
use dbnexus::db::{AgentDatabase, AgentLauncher};
use dbnexus::paths::DriverPaths;
use dbnexus::{Database, DbError};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const AGENT: &str = env!("CARGO_BIN_EXE_driver-agent");

async fn spawn() -> AgentClient {
    AgentClient::spawn(AGENT, "sqlite", AgentOptions::default())
        .await
        .unwrap()
}

fn sqlite_config(dir: &Path) -> ConnectionConfig {
    ConnectionConfig::sqlite(dir.join("agent.db").to_string_lossy())
}

#[tokio::test]
async fn test_ids_follow_request_order() {
    let dir = tempfile::tempdir().unwrap();
    let client = spawn().await;

    let connect = client
        .call(AgentRequest::new(methods::CONNECT).with_config(sqlite_config(dir.path())))
        .await
        .unwrap();
    assert!(connect.success);

    let mut last = connect.id;
    for method in [methods::PING, methods::GET_DATABASES, methods::PING] {
        let response = client.call(AgentRequest::new(method)).await.unwrap();
        assert!(response.success);
        assert_eq!(response.id, last + 1);
        last = response.id;
    }

    client.close().await.unwrap();
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_not_open_comes_back_as_contract_error() {
    let client = spawn().await;
    let err = client
        .call(AgentRequest::new(methods::QUERY).with_query("SELECT 1"))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Remote(DbError::NotOpen)));
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_query_fields_and_rows() {
    let dir = tempfile::tempdir().unwrap();
    let client = spawn().await;
    client
        .call(AgentRequest::new(methods::CONNECT).with_config(sqlite_config(dir.path())))
        .await
        .unwrap();
    client
        .call(AgentRequest::new(methods::EXEC).with_query("CREATE TABLE t (id INTEGER, name TEXT)"))
        .await
        .unwrap();
    let inserted = client
        .call(AgentRequest::new(methods::EXEC).with_query("INSERT INTO t VALUES (1, 'a'), (2, 'b')"))
        .await
        .unwrap();
    assert_eq!(inserted.rows_affected, Some(2));

    let rows = client
        .call(AgentRequest::new(methods::QUERY).with_query("SELECT id, name FROM t ORDER BY id"))
        .await
        .unwrap();
    assert_eq!(rows.fields, Some(vec!["id".to_string(), "name".to_string()]));
    assert_eq!(rows.data, Some(json!([{"id": 1, "name": "a"}, {"id": 2, "name": "b"}])));
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_connect_failure_reaches_the_caller() {
    let client = spawn().await;
    let err = client
        .call_with_timeout(
            AgentRequest::new(methods::CONNECT).with_config(ConnectionConfig::sqlite("db:5432")),
            Duration::from_secs(10),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Remote(DbError::InvalidRequest(_))));
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_calls_after_close_fail() {
    let client = spawn().await;
    client.close().await.unwrap();
    let err = client.call(AgentRequest::new(methods::PING)).await.unwrap_err();
    assert!(matches!(err, AgentError::Closed));
}

/// Install the test binary as the SQLite agent under a fresh driver root.
fn install_agent(root: &Path) -> Arc<DriverPaths> {
    let paths = Arc::new(DriverPaths::new(root));
    std::fs::create_dir_all(paths.install_dir("sqlite")).unwrap();
    std::fs::copy(AGENT, paths.executable("sqlite")).unwrap();
    std::fs::write(paths.marker("sqlite"), r#"{"driverType":"sqlite"}"#).unwrap();
    paths
}

#[tokio::test]
async fn test_agent_backed_binding_end_to_end() {
    let root = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();
    let launcher = AgentLauncher::new(install_agent(root.path()), AgentOptions::default());
    let db = AgentDatabase::new("sqlite", launcher);

    db.connect(&sqlite_config(data.path())).await.unwrap();
    db.exec("CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT NOT NULL)")
        .await
        .unwrap();

    let changes: ChangeSet = serde_json::from_value(json!({
        "inserts": [{"id": 1, "label": "one"}, {"id": 2, "label": "two"}],
        "deletes": [{"id": 2}]
    }))
    .unwrap();
    db.batch_applier()
        .unwrap()
        .apply_changes("items", &changes)
        .await
        .unwrap();

    let out = db.query("SELECT label FROM items").await.unwrap();
    assert_eq!(out.columns, vec!["label".to_string()]);
    assert_eq!(out.rows.len(), 1);

    assert_eq!(db.get_tables("main").await.unwrap(), vec!["items".to_string()]);
    let columns = db.get_columns("main", "items").await.unwrap();
    assert_eq!(columns[0].key, "PRI");
    assert!(db
        .get_create_statement("main", "items")
        .await
        .unwrap()
        .contains("label TEXT NOT NULL"));

    let err = db.query("SELECT * FROM missing").await.unwrap_err();
    assert!(matches!(err, DbError::Query(_)));

    db.close().await.unwrap();
    assert!(matches!(db.ping().await, Err(DbError::NotOpen)));
}
