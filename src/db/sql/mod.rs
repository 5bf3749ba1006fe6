//! Shared binding for SQL engines.
//!
//! [`SqlBinding`] implements the whole capability contract on top of any
//! [`SqlEngine`]. An engine only knows how to resolve endpoints and open a
//! [`SqlSession`]; failover, change-set transactions and connection state
//! live here. Specialized bindings hold a `SqlBinding` and delegate to it,
//! overriding only what differs.

pub mod changes;
pub mod failover;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

pub use changes::{plan_changes, PlannedStatement, SqlDialect};
pub use failover::{
    candidate_addresses, connect_in_order, credentials_for, with_port, ConnectReport, Credentials,
    Endpoint, EndpointFailure, TunnelDialer,
};

use super::contract::{
    BatchApplier, ColumnDefinition, ColumnDefinitionWithTable, Database, ForeignKeyDefinition,
    IndexDefinition, QueryOutput, TriggerDefinition,
};
use crate::config::{ChangeSet, ConnectionConfig};
use crate::error::{DbError, DbResult};

/// An open connection to one SQL endpoint.
///
/// Sessions are used from one thread at a time behind the binding's lock.
pub trait SqlSession: Send {
    fn ping(&mut self) -> DbResult<()>;

    fn query(&mut self, sql: &str) -> DbResult<QueryOutput>;

    fn exec(&mut self, sql: &str) -> DbResult<i64>;

    /// Execute one statement with bound parameters.
    fn exec_params(&mut self, sql: &str, params: &[Value]) -> DbResult<i64>;

    fn begin(&mut self) -> DbResult<()> {
        self.exec("BEGIN").map(|_| ())
    }

    fn commit(&mut self) -> DbResult<()> {
        self.exec("COMMIT").map(|_| ())
    }

    fn rollback(&mut self) -> DbResult<()> {
        self.exec("ROLLBACK").map(|_| ())
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::ANSI
    }

    fn databases(&mut self) -> DbResult<Vec<String>>;

    fn tables(&mut self, db_name: &str) -> DbResult<Vec<String>>;

    fn create_statement(&mut self, db_name: &str, table_name: &str) -> DbResult<String>;

    fn columns(&mut self, db_name: &str, table_name: &str) -> DbResult<Vec<ColumnDefinition>>;

    /// Columns of every table; the default walks [`SqlSession::tables`].
    fn all_columns(&mut self, db_name: &str) -> DbResult<Vec<ColumnDefinitionWithTable>> {
        let mut out = Vec::new();
        for table in self.tables(db_name)? {
            for column in self.columns(db_name, &table)? {
                out.push(ColumnDefinitionWithTable {
                    table_name: table.clone(),
                    name: column.name,
                    data_type: column.data_type,
                });
            }
        }
        Ok(out)
    }

    fn indexes(&mut self, db_name: &str, table_name: &str) -> DbResult<Vec<IndexDefinition>>;

    fn foreign_keys(
        &mut self,
        db_name: &str,
        table_name: &str,
    ) -> DbResult<Vec<ForeignKeyDefinition>>;

    fn triggers(&mut self, db_name: &str, table_name: &str) -> DbResult<Vec<TriggerDefinition>>;
}

/// Engine-specific half of a SQL binding.
pub trait SqlEngine: Send + Sync + 'static {
    /// Display name used in error messages.
    fn name(&self) -> &str;

    /// Port appended to hosts without one.
    fn default_port(&self) -> u16 {
        0
    }

    /// File engines have no network endpoint to tunnel.
    fn uses_network(&self) -> bool {
        true
    }

    /// Candidate endpoints in failover order.
    fn endpoints(&self, config: &ConnectionConfig) -> DbResult<Vec<Endpoint>> {
        Ok(candidate_addresses(config, self.default_port())
            .into_iter()
            .enumerate()
            .map(|(i, address)| Endpoint::new(address, i))
            .collect())
    }

    fn open(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
        config: &ConnectionConfig,
    ) -> DbResult<Box<dyn SqlSession>>;
}

type SessionSlot = Arc<Mutex<Option<Box<dyn SqlSession>>>>;

/// Capability contract over a [`SqlEngine`].
///
/// Engine calls block, so every operation runs on tokio's blocking pool
/// with the session moved behind a shared lock.
pub struct SqlBinding {
    engine: Arc<dyn SqlEngine>,
    session: SessionSlot,
    report: Arc<Mutex<ConnectReport>>,
    tunnel: Option<Arc<dyn TunnelDialer>>,
}

impl SqlBinding {
    pub fn new<E: SqlEngine>(engine: E) -> Self {
        Self {
            engine: Arc::new(engine),
            session: Arc::new(Mutex::new(None)),
            report: Arc::new(Mutex::new(ConnectReport::default())),
            tunnel: None,
        }
    }

    /// Route network endpoints through an SSH tunnel when a config asks
    /// for one.
    pub fn with_tunnel(mut self, dialer: Arc<dyn TunnelDialer>) -> Self {
        self.tunnel = Some(dialer);
        self
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Bound endpoint and earlier failures of the last connect.
    pub fn connect_report(&self) -> ConnectReport {
        lock(&self.report).clone()
    }

    pub fn is_open(&self) -> bool {
        lock(&self.session).is_some()
    }

    /// Run `f` against the open session on the blocking pool.
    pub async fn with_session<T, F>(&self, f: F) -> DbResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn SqlSession) -> DbResult<T> + Send + 'static,
    {
        let slot = self.session.clone();
        blocking(move || {
            let mut guard = lock(&slot);
            match guard.as_mut() {
                Some(session) => f(session.as_mut()),
                None => Err(DbError::NotOpen),
            }
        })
        .await
    }
}

async fn blocking<T, F>(f: F) -> DbResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> DbResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DbError::Io(std::io::Error::other(e)))?
}

fn resolve_endpoints(
    engine: &dyn SqlEngine,
    tunnel: Option<&dyn TunnelDialer>,
    config: &ConnectionConfig,
) -> DbResult<Vec<Endpoint>> {
    let endpoints = engine.endpoints(config)?;
    if !config.use_ssh || !engine.uses_network() {
        return Ok(endpoints);
    }

    match tunnel {
        Some(dialer) => endpoints
            .into_iter()
            .map(|ep| {
                let local = dialer.dial(&config.ssh, &ep.address)?;
                Ok(Endpoint::new(local, ep.index))
            })
            .collect(),
        None => {
            tracing::warn!(
                engine = engine.name(),
                "SSH requested but no tunnel dialer is available, connecting directly"
            );
            Ok(endpoints)
        }
    }
}

fn apply_plan(session: &mut dyn SqlSession, table_name: &str, changes: &ChangeSet) -> DbResult<()> {
    let plan = plan_changes(table_name, changes, session.dialect())?;
    if plan.is_empty() {
        return Ok(());
    }

    session.begin()?;
    for statement in &plan {
        if let Err(e) = session.exec_params(&statement.sql, &statement.params) {
            if let Err(rollback) = session.rollback() {
                tracing::warn!(error = %rollback, "rollback failed");
            }
            return Err(e);
        }
    }
    session.commit()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Database for SqlBinding {
    async fn connect(&self, config: &ConnectionConfig) -> DbResult<()> {
        let engine = self.engine.clone();
        let tunnel = self.tunnel.clone();
        let slot = self.session.clone();
        let report_slot = self.report.clone();
        let config = config.clone();

        blocking(move || {
            // re-connect always replaces the old session
            lock(&slot).take();

            let endpoints = resolve_endpoints(engine.as_ref(), tunnel.as_deref(), &config)?;
            let (result, report) = connect_in_order(&endpoints, engine.name(), |endpoint| {
                let credentials = credentials_for(&config, endpoint);
                let mut session = engine.open(endpoint, &credentials, &config)?;
                session.ping()?;
                Ok(session)
            });

            *lock(&report_slot) = report;
            let session = result?;
            *lock(&slot) = Some(session);
            Ok(())
        })
        .await
    }

    async fn close(&self) -> DbResult<()> {
        let slot = self.session.clone();
        blocking(move || {
            lock(&slot).take();
            Ok(())
        })
        .await
    }

    async fn ping(&self) -> DbResult<()> {
        self.with_session(|s| s.ping()).await
    }

    async fn query(&self, sql: &str) -> DbResult<QueryOutput> {
        let sql = sql.to_string();
        self.with_session(move |s| s.query(&sql)).await
    }

    async fn exec(&self, sql: &str) -> DbResult<i64> {
        let sql = sql.to_string();
        self.with_session(move |s| s.exec(&sql)).await
    }

    async fn get_databases(&self) -> DbResult<Vec<String>> {
        self.with_session(|s| s.databases()).await
    }

    async fn get_tables(&self, db_name: &str) -> DbResult<Vec<String>> {
        let db_name = db_name.to_string();
        self.with_session(move |s| s.tables(&db_name)).await
    }

    async fn get_create_statement(&self, db_name: &str, table_name: &str) -> DbResult<String> {
        let (db_name, table_name) = (db_name.to_string(), table_name.to_string());
        self.with_session(move |s| s.create_statement(&db_name, &table_name))
            .await
    }

    async fn get_columns(
        &self,
        db_name: &str,
        table_name: &str,
    ) -> DbResult<Vec<ColumnDefinition>> {
        let (db_name, table_name) = (db_name.to_string(), table_name.to_string());
        self.with_session(move |s| s.columns(&db_name, &table_name)).await
    }

    async fn get_all_columns(&self, db_name: &str) -> DbResult<Vec<ColumnDefinitionWithTable>> {
        let db_name = db_name.to_string();
        self.with_session(move |s| s.all_columns(&db_name)).await
    }

    async fn get_indexes(&self, db_name: &str, table_name: &str) -> DbResult<Vec<IndexDefinition>> {
        let (db_name, table_name) = (db_name.to_string(), table_name.to_string());
        self.with_session(move |s| s.indexes(&db_name, &table_name)).await
    }

    async fn get_foreign_keys(
        &self,
        db_name: &str,
        table_name: &str,
    ) -> DbResult<Vec<ForeignKeyDefinition>> {
        let (db_name, table_name) = (db_name.to_string(), table_name.to_string());
        self.with_session(move |s| s.foreign_keys(&db_name, &table_name))
            .await
    }

    async fn get_triggers(
        &self,
        db_name: &str,
        table_name: &str,
    ) -> DbResult<Vec<TriggerDefinition>> {
        let (db_name, table_name) = (db_name.to_string(), table_name.to_string());
        self.with_session(move |s| s.triggers(&db_name, &table_name)).await
    }

    fn batch_applier(&self) -> Option<&dyn BatchApplier> {
        Some(self)
    }
}

#[async_trait]
impl BatchApplier for SqlBinding {
    async fn apply_changes(&self, table_name: &str, changes: &ChangeSet) -> DbResult<()> {
        let table_name = table_name.to_string();
        let changes = changes.clone();
        self.with_session(move |s| apply_plan(s, &table_name, &changes))
            .await
    }
}
