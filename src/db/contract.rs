//! Capability contract definition.
//!
//! Every engine binding, in-process or agent-backed, implements [`Database`].
//! The result types serialize with the same camelCase names the agent wire
//! protocol uses, so an agent can hand them back verbatim.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{ChangeSet, ConnectionConfig};
use crate::error::DbResult;

/// One result row: column name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Rows plus their column names in select order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOutput {
    pub rows: Vec<Row>,
    pub columns: Vec<String>,
}

/// Column metadata for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    /// `YES` or `NO`.
    pub nullable: String,
    /// `PRI`, `UNI`, `MUL` or empty.
    pub key: String,
    pub default: Option<String>,
    pub extra: String,
    pub comment: String,
}

/// Column metadata across tables, used for autocomplete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ColumnDefinitionWithTable {
    pub table_name: String,
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

/// One column of one index. Multi-column indexes yield several entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IndexDefinition {
    pub name: String,
    pub column_name: String,
    /// 0 for unique indexes, 1 otherwise.
    pub non_unique: i32,
    /// 1-based position of the column inside the index.
    pub seq_in_index: i32,
    pub index_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ForeignKeyDefinition {
    pub name: String,
    pub column_name: String,
    pub ref_table_name: String,
    pub ref_column_name: String,
    pub constraint_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerDefinition {
    pub name: String,
    /// BEFORE, AFTER or INSTEAD OF.
    pub timing: String,
    /// INSERT, UPDATE or DELETE.
    pub event: String,
    pub statement: String,
}

/// Operation set every engine binding implements.
///
/// Methods take `&self`; bindings keep their connection behind interior
/// mutability so one instance can be shared through the connection cache.
///
/// # Example
///
/// ```ignore
/// use dbnexus::db::Database;
///
/// async fn show(db: &dyn Database) -> dbnexus::DbResult<()> {
///     for table in db.get_tables("main").await? {
///         let ddl = db.get_create_statement("main", &table).await?;
///         println!("{ddl}");
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait Database: Send + Sync {
    /// Open the underlying connection. Calling it again replaces the old one.
    async fn connect(&self, config: &ConnectionConfig) -> DbResult<()>;

    /// Close the connection. Safe to call when already closed.
    async fn close(&self) -> DbResult<()>;

    /// Liveness probe.
    async fn ping(&self) -> DbResult<()>;

    /// Run a row-returning statement.
    async fn query(&self, sql: &str) -> DbResult<QueryOutput>;

    /// Run a statement and return the number of affected rows.
    async fn exec(&self, sql: &str) -> DbResult<i64>;

    async fn get_databases(&self) -> DbResult<Vec<String>>;

    async fn get_tables(&self, db_name: &str) -> DbResult<Vec<String>>;

    async fn get_create_statement(&self, db_name: &str, table_name: &str) -> DbResult<String>;

    async fn get_columns(&self, db_name: &str, table_name: &str)
        -> DbResult<Vec<ColumnDefinition>>;

    /// Columns of every table in a database.
    async fn get_all_columns(&self, db_name: &str) -> DbResult<Vec<ColumnDefinitionWithTable>>;

    async fn get_indexes(&self, db_name: &str, table_name: &str)
        -> DbResult<Vec<IndexDefinition>>;

    async fn get_foreign_keys(
        &self,
        db_name: &str,
        table_name: &str,
    ) -> DbResult<Vec<ForeignKeyDefinition>>;

    async fn get_triggers(&self, db_name: &str, table_name: &str)
        -> DbResult<Vec<TriggerDefinition>>;

    /// Optional batch-write capability.
    fn batch_applier(&self) -> Option<&dyn BatchApplier> {
        None
    }
}

/// Transactional application of a [`ChangeSet`].
#[async_trait]
pub trait BatchApplier: Send + Sync {
    /// Apply inserts, then updates, then deletes. Either all rows are
    /// written or none are.
    async fn apply_changes(&self, table_name: &str, changes: &ChangeSet) -> DbResult<()>;
}
