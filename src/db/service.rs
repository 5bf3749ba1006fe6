//! Caller-facing database operations.

use std::sync::Arc;

use serde::Serialize;

use super::contract::{
    ColumnDefinition, ColumnDefinitionWithTable, Database, ForeignKeyDefinition, IndexDefinition,
    QueryOutput, TriggerDefinition,
};
use super::statement::{classify, StatementKind};
use crate::cache::ConnectionCache;
use crate::config::{ChangeSet, ConnectionConfig};
use crate::error::{DbError, DbResult};

/// Outcome of [`DatabaseService::run`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StatementResult {
    Rows(QueryOutput),
    #[serde(rename_all = "camelCase")]
    Affected { rows_affected: i64 },
}

/// Operations over cached connections.
///
/// Every method takes the connection config plus an optional database name
/// that overrides `config.database` for that call.
#[derive(Clone)]
pub struct DatabaseService {
    cache: Arc<ConnectionCache>,
}

impl DatabaseService {
    pub fn new(cache: Arc<ConnectionCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &ConnectionCache {
        &self.cache
    }

    async fn db(&self, config: &ConnectionConfig, database: &str) -> DbResult<Arc<dyn Database>> {
        self.cache.get(&config.with_database(database)).await
    }

    /// Connect, replacing any cached connection for the same config.
    pub async fn connect(&self, config: &ConnectionConfig) -> DbResult<()> {
        self.cache.reconnect(config).await.map(|_| ())
    }

    /// Run a statement, routed to `query` or `exec` by its kind.
    pub async fn run(
        &self,
        config: &ConnectionConfig,
        database: &str,
        sql: &str,
    ) -> DbResult<StatementResult> {
        let db = self.db(config, database).await?;
        match classify(sql) {
            StatementKind::Query => Ok(StatementResult::Rows(db.query(sql).await?)),
            StatementKind::Exec => Ok(StatementResult::Affected {
                rows_affected: db.exec(sql).await?,
            }),
        }
    }

    pub async fn databases(&self, config: &ConnectionConfig) -> DbResult<Vec<String>> {
        self.db(config, "").await?.get_databases().await
    }

    pub async fn tables(&self, config: &ConnectionConfig, database: &str) -> DbResult<Vec<String>> {
        self.db(config, database)
            .await?
            .get_tables(target(config, database))
            .await
    }

    pub async fn create_statement(
        &self,
        config: &ConnectionConfig,
        database: &str,
        table: &str,
    ) -> DbResult<String> {
        self.db(config, database)
            .await?
            .get_create_statement(target(config, database), table)
            .await
    }

    pub async fn columns(
        &self,
        config: &ConnectionConfig,
        database: &str,
        table: &str,
    ) -> DbResult<Vec<ColumnDefinition>> {
        self.db(config, database)
            .await?
            .get_columns(target(config, database), table)
            .await
    }

    pub async fn all_columns(
        &self,
        config: &ConnectionConfig,
        database: &str,
    ) -> DbResult<Vec<ColumnDefinitionWithTable>> {
        self.db(config, database)
            .await?
            .get_all_columns(target(config, database))
            .await
    }

    pub async fn indexes(
        &self,
        config: &ConnectionConfig,
        database: &str,
        table: &str,
    ) -> DbResult<Vec<IndexDefinition>> {
        self.db(config, database)
            .await?
            .get_indexes(target(config, database), table)
            .await
    }

    pub async fn foreign_keys(
        &self,
        config: &ConnectionConfig,
        database: &str,
        table: &str,
    ) -> DbResult<Vec<ForeignKeyDefinition>> {
        self.db(config, database)
            .await?
            .get_foreign_keys(target(config, database), table)
            .await
    }

    pub async fn triggers(
        &self,
        config: &ConnectionConfig,
        database: &str,
        table: &str,
    ) -> DbResult<Vec<TriggerDefinition>> {
        self.db(config, database)
            .await?
            .get_triggers(target(config, database), table)
            .await
    }

    /// Apply a change set in one transaction.
    pub async fn apply_changes(
        &self,
        config: &ConnectionConfig,
        database: &str,
        table: &str,
        changes: &ChangeSet,
    ) -> DbResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let db = self.db(config, database).await?;
        let applier = db.batch_applier().ok_or_else(|| {
            DbError::UnsupportedOperation(format!(
                "{} does not support batch changes",
                super::catalog::display_name(&config.engine)
            ))
        })?;
        applier.apply_changes(table, changes).await
    }

    /// Close every cached connection.
    pub async fn shutdown(&self) {
        self.cache.close_all().await;
    }
}

/// Database name passed to metadata calls: the override, else the config's.
fn target<'a>(config: &'a ConnectionConfig, database: &'a str) -> &'a str {
    if database.trim().is_empty() {
        &config.database
    } else {
        database.trim()
    }
}
