use dbnexus::config::{ChangeSet, ConnectionConfig, Topology};
use dbnexus::db::sqlite;
use dbnexus::{BatchApplier, Database, DbError};
use serde_json::json;

const SCHEMA: &str = "
CREATE TABLE authors (id INTEGER PRIMARY KEY, email TEXT NOT NULL, name TEXT DEFAULT 'anon');
CREATE UNIQUE INDEX idx_authors_email ON authors (email);
CREATE TABLE posts (
    id INTEGER PRIMARY KEY,
    author_id INTEGER REFERENCES authors (id),
    title TEXT
);
CREATE INDEX idx_posts_author ON posts (author_id);
CREATE TRIGGER posts_audit AFTER INSERT ON posts BEGIN SELECT 1; END;
";

async fn open(path: &std::path::Path) -> dbnexus::db::sql::SqlBinding {
    let db = sqlite::binding();
    db.connect(&ConnectionConfig::sqlite(path.to_string_lossy()))
        .await
        .unwrap();
    db.exec(SCHEMA).await.unwrap();
    db
}

#[tokio::test]
async fn test_metadata_of_a_small_schema() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir.path().join("blog.db")).await;

    assert_eq!(db.get_databases().await.unwrap(), vec!["main".to_string()]);
    assert_eq!(
        db.get_tables("main").await.unwrap(),
        vec!["authors".to_string(), "posts".to_string()]
    );

    let columns = db.get_columns("", "authors").await.unwrap();
    assert_eq!(columns.len(), 3);
    assert_eq!(columns[0].key, "PRI");
    assert_eq!(columns[0].extra, "auto_increment");
    assert_eq!(columns[1].key, "UNI");
    assert_eq!(columns[1].nullable, "NO");
    assert_eq!(columns[2].default.as_deref(), Some("'anon'"));

    let posts = db.get_columns("main", "posts").await.unwrap();
    assert_eq!(posts[1].key, "MUL");

    let indexes = db.get_indexes("main", "authors").await.unwrap();
    let email = indexes.iter().find(|i| i.name == "idx_authors_email").unwrap();
    assert_eq!(email.non_unique, 0);
    assert_eq!(email.seq_in_index, 1);

    let keys = db.get_foreign_keys("main", "posts").await.unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].column_name, "author_id");
    assert_eq!(keys[0].ref_table_name, "authors");
    assert_eq!(keys[0].ref_column_name, "id");

    let triggers = db.get_triggers("main", "posts").await.unwrap();
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].timing, "AFTER");
    assert_eq!(triggers[0].event, "INSERT");

    let all = db.get_all_columns("main").await.unwrap();
    assert_eq!(all.len(), 6);
    assert!(all.iter().any(|c| c.table_name == "posts" && c.name == "title"));

    let ddl = db.get_create_statement("main", "posts").await.unwrap();
    assert!(ddl.starts_with("CREATE TABLE posts"));
    assert!(matches!(
        db.get_create_statement("main", "missing").await,
        Err(DbError::Query(_))
    ));
}

#[tokio::test]
async fn test_apply_changes_in_one_transaction() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir.path().join("changes.db")).await;

    let changes: ChangeSet = serde_json::from_value(json!({
        "inserts": [
            {"id": 1, "email": "a@example.com"},
            {"id": 2, "email": "b@example.com"}
        ],
        "updates": [{"keys": {"id": 1}, "values": {"name": "Ada"}}],
        "deletes": [{"id": 2}]
    }))
    .unwrap();
    db.batch_applier()
        .unwrap()
        .apply_changes("authors", &changes)
        .await
        .unwrap();

    let out = db.query("SELECT id, name FROM authors").await.unwrap();
    assert_eq!(out.rows.len(), 1);
    assert_eq!(out.rows[0]["name"], json!("Ada"));

    // the duplicate email violates the unique index, so nothing is written
    let failing: ChangeSet = serde_json::from_value(json!({
        "inserts": [
            {"id": 3, "email": "c@example.com"},
            {"id": 4, "email": "c@example.com"}
        ]
    }))
    .unwrap();
    let err = db
        .batch_applier()
        .unwrap()
        .apply_changes("authors", &failing)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Query(_)));
    let count = db.query("SELECT COUNT(*) AS n FROM authors").await.unwrap();
    assert_eq!(count.rows[0]["n"], json!(1));
}

#[tokio::test]
async fn test_keyless_delete_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir.path().join("keyless.db")).await;
    let changes: ChangeSet = serde_json::from_value(json!({"deletes": [{}]})).unwrap();
    let err = db
        .batch_applier()
        .unwrap()
        .apply_changes("authors", &changes)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_failover_to_second_file() {
    let dir = tempfile::tempdir().unwrap();
    let present = dir.path().join("present.db");
    open(&present).await.close().await.unwrap();

    let mut config = ConnectionConfig::sqlite(dir.path().join("missing.db").to_string_lossy());
    config.hosts = vec![present.to_string_lossy().to_string()];
    config.topology = Topology::Replica;

    let db = sqlite::binding();
    db.connect(&config).await.unwrap();

    let report = db.connect_report();
    assert_eq!(report.bound.unwrap().address, present.to_string_lossy());
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].address.ends_with("missing.db"));

    // replica topology opens read-only
    assert!(db.exec("INSERT INTO authors (email) VALUES ('x')").await.is_err());
}

#[tokio::test]
async fn test_host_port_is_not_a_sqlite_path() {
    let db = sqlite::binding();
    let err = db
        .connect(&ConnectionConfig::sqlite("localhost:5432"))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_parent_directories_are_created() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("a").join("b").join("c.db");
    let db = sqlite::binding();
    db.connect(&ConnectionConfig::sqlite(nested.to_string_lossy()))
        .await
        .unwrap();
    assert!(nested.parent().unwrap().is_dir());
}
