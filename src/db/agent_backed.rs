//! Bindings that forward every contract call to a driver agent.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::catalog::display_name;
use super::contract::{
    BatchApplier, ColumnDefinition, ColumnDefinitionWithTable, Database, ForeignKeyDefinition,
    IndexDefinition, QueryOutput, Row, TriggerDefinition,
};
use crate::agent::{methods, AgentClient, AgentOptions, AgentRequest, AgentResponse};
use crate::config::{ChangeSet, ConnectionConfig};
use crate::error::{DbError, DbResult};
use crate::paths::DriverPaths;

/// Starts driver agents from the install directory.
#[derive(Debug, Clone)]
pub struct AgentLauncher {
    paths: Arc<DriverPaths>,
    options: AgentOptions,
}

impl AgentLauncher {
    pub fn new(paths: Arc<DriverPaths>, options: AgentOptions) -> Self {
        Self { paths, options }
    }

    pub fn paths(&self) -> &DriverPaths {
        &self.paths
    }

    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    /// Spawn the installed agent for `engine`.
    ///
    /// Both the executable and its `installed.json` record must be present;
    /// an executable left behind by an interrupted install is not launched.
    pub async fn launch(&self, engine: &str) -> DbResult<AgentClient> {
        let executable = self.paths.executable(engine);
        if !executable.is_file() {
            return Err(DbError::DriverUnavailable(format!(
                "driver agent is not installed (expected {})",
                executable.display()
            )));
        }
        let marker = self.paths.marker(engine);
        if !marker.is_file() {
            return Err(DbError::DriverUnavailable(format!(
                "driver agent install is incomplete (missing {})",
                marker.display()
            )));
        }
        AgentClient::spawn(&executable, engine, self.options.clone())
            .await
            .map_err(|e| e.into_db_error(""))
    }
}

/// Contract implementation backed by an out-of-process driver agent.
///
/// The agent is started on `connect` and stopped on `close`. Reconnecting
/// stops the old agent first.
pub struct AgentDatabase {
    engine: String,
    display: String,
    launcher: AgentLauncher,
    client: RwLock<Option<Arc<AgentClient>>>,
}

impl AgentDatabase {
    pub fn new(engine: &str, launcher: AgentLauncher) -> Self {
        Self {
            engine: engine.to_string(),
            display: display_name(engine),
            launcher,
            client: RwLock::new(None),
        }
    }

    pub fn engine(&self) -> &str {
        &self.engine
    }

    async fn client(&self) -> DbResult<Arc<AgentClient>> {
        self.client.read().await.clone().ok_or(DbError::NotOpen)
    }

    async fn call(&self, request: AgentRequest) -> DbResult<AgentResponse> {
        let client = self.client().await?;
        match client.call(request).await {
            Ok(response) => Ok(response),
            Err(e) => Err(client.enrich(e).await.with_engine(&self.display)),
        }
    }
}

#[async_trait]
impl Database for AgentDatabase {
    async fn connect(&self, config: &ConnectionConfig) -> DbResult<()> {
        let mut slot = self.client.write().await;
        if let Some(old) = slot.take() {
            let _ = old.close().await;
        }

        let client = self
            .launcher
            .launch(&self.engine)
            .await
            .map_err(|e| e.with_engine(&self.display))?;

        let request = AgentRequest::new(methods::CONNECT).with_config(config.clone());
        let timeout = self.launcher.options().connect_timeout;
        match client.call_with_timeout(request, timeout).await {
            Ok(_) => {
                tracing::info!(engine = %self.engine, "connected through driver agent");
                *slot = Some(Arc::new(client));
                Ok(())
            }
            Err(e) => {
                let err = client.enrich(e).await.with_engine(&self.display);
                let _ = client.close().await;
                Err(err)
            }
        }
    }

    async fn close(&self) -> DbResult<()> {
        let client = self.client.write().await.take();
        if let Some(client) = client {
            client.close().await.map_err(|e| e.into_db_error(""))?;
        }
        Ok(())
    }

    async fn ping(&self) -> DbResult<()> {
        self.call(AgentRequest::new(methods::PING)).await.map(|_| ())
    }

    async fn query(&self, sql: &str) -> DbResult<QueryOutput> {
        let response = self.call(AgentRequest::new(methods::QUERY).with_query(sql)).await?;
        let rows: Vec<Row> = match response.data {
            None | Some(Value::Null) => Vec::new(),
            Some(data) => serde_json::from_value(data)
                .map_err(|e| DbError::Protocol(format!("unexpected query rows: {}", e)))?,
        };
        Ok(QueryOutput {
            rows,
            columns: response.fields.unwrap_or_default(),
        })
    }

    async fn exec(&self, sql: &str) -> DbResult<i64> {
        let response = self.call(AgentRequest::new(methods::EXEC).with_query(sql)).await?;
        Ok(response.rows_affected.unwrap_or(0))
    }

    async fn get_databases(&self) -> DbResult<Vec<String>> {
        self.call(AgentRequest::new(methods::GET_DATABASES))
            .await?
            .list()
    }

    async fn get_tables(&self, db_name: &str) -> DbResult<Vec<String>> {
        self.call(AgentRequest::new(methods::GET_TABLES).with_db(db_name))
            .await?
            .list()
    }

    async fn get_create_statement(&self, db_name: &str, table_name: &str) -> DbResult<String> {
        self.call(AgentRequest::new(methods::GET_CREATE_STATEMENT).with_table(db_name, table_name))
            .await?
            .text()
    }

    async fn get_columns(
        &self,
        db_name: &str,
        table_name: &str,
    ) -> DbResult<Vec<ColumnDefinition>> {
        self.call(AgentRequest::new(methods::GET_COLUMNS).with_table(db_name, table_name))
            .await?
            .list()
    }

    async fn get_all_columns(&self, db_name: &str) -> DbResult<Vec<ColumnDefinitionWithTable>> {
        self.call(AgentRequest::new(methods::GET_ALL_COLUMNS).with_db(db_name))
            .await?
            .list()
    }

    async fn get_indexes(
        &self,
        db_name: &str,
        table_name: &str,
    ) -> DbResult<Vec<IndexDefinition>> {
        self.call(AgentRequest::new(methods::GET_INDEXES).with_table(db_name, table_name))
            .await?
            .list()
    }

    async fn get_foreign_keys(
        &self,
        db_name: &str,
        table_name: &str,
    ) -> DbResult<Vec<ForeignKeyDefinition>> {
        self.call(AgentRequest::new(methods::GET_FOREIGN_KEYS).with_table(db_name, table_name))
            .await?
            .list()
    }

    async fn get_triggers(
        &self,
        db_name: &str,
        table_name: &str,
    ) -> DbResult<Vec<TriggerDefinition>> {
        self.call(AgentRequest::new(methods::GET_TRIGGERS).with_table(db_name, table_name))
            .await?
            .list()
    }

    fn batch_applier(&self) -> Option<&dyn BatchApplier> {
        Some(self)
    }
}

#[async_trait]
impl BatchApplier for AgentDatabase {
    async fn apply_changes(&self, table_name: &str, changes: &ChangeSet) -> DbResult<()> {
        self.call(AgentRequest::new(methods::APPLY_CHANGES).with_changes(table_name, changes.clone()))
            .await
            .map(|_| ())
    }
}
