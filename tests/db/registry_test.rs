use dbnexus::agent::AgentOptions;
use dbnexus::db::{AgentLauncher, BuildCapabilities, DriverRegistry};
use dbnexus::paths::DriverPaths;
use dbnexus::DbError;
use std::sync::Arc;

fn launcher() -> AgentLauncher {
    AgentLauncher::new(
        Arc::new(DriverPaths::new("/nonexistent/dbnexus-drivers")),
        AgentOptions::default(),
    )
}

#[test]
fn test_standard_full_registry_lists_every_engine() {
    let registry = DriverRegistry::standard(&BuildCapabilities::full(), launcher());
    let engines = registry.engines();

    assert!(engines.contains(&"sqlite".to_string()));
    assert!(engines.contains(&"duckdb".to_string()));
    assert!(engines.contains(&"diros".to_string()));
    assert_eq!(engines.len(), 12);
}

#[test]
fn test_doris_and_diros_share_an_entry() {
    let registry = DriverRegistry::standard(&BuildCapabilities::full(), launcher());
    assert!(registry.contains("doris"));
    assert!(registry.contains("DIROS"));
    assert!(!registry.engines().contains(&"doris".to_string()));
}

#[test]
fn test_slim_registry_reports_missing_engines() {
    let registry = DriverRegistry::standard(&BuildCapabilities::slim(), launcher());
    assert_eq!(registry.engines(), vec!["sqlite".to_string()]);

    match registry.create("mongodb") {
        Err(DbError::DriverUnavailable(msg)) => assert!(msg.contains("MongoDB")),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("mongodb should not be available in a slim build"),
    }
    assert!(matches!(registry.create("oracle"), Err(DbError::UnsupportedType(_))));
}

#[tokio::test]
async fn test_agent_binding_without_install_is_unavailable() {
    let registry = DriverRegistry::standard(&BuildCapabilities::full(), launcher());
    let db = registry.create("duckdb").unwrap();

    let config = dbnexus::ConnectionConfig {
        engine: "duckdb".into(),
        host: ":memory:".into(),
        ..Default::default()
    };
    let err = db.connect(&config).await.unwrap_err();
    assert!(matches!(err, DbError::DriverUnavailable(_)));
    assert!(matches!(db.ping().await, Err(DbError::NotOpen)));
}

#[tokio::test]
async fn test_empty_type_creates_sqlite() {
    let registry = DriverRegistry::in_process(&BuildCapabilities::slim());
    let db = registry.create("").unwrap();
    db.connect(&dbnexus::ConnectionConfig::sqlite(":memory:"))
        .await
        .unwrap();
    db.ping().await.unwrap();
    db.close().await.unwrap();
}
