//! DuckDB engine, linked only into agents built with the `duckdb` feature.
//!
//! [`DuckDbDatabase`] holds a [`SqlBinding`] and forwards everything to it
//! except database and table listing, where DuckDB needs fallbacks.

use std::sync::Arc;

use async_trait::async_trait;
use duckdb::types::Value as DuckValue;
use duckdb::{params_from_iter, AccessMode, Config, Connection};
use serde_json::Value;

use super::contract::{
    BatchApplier, ColumnDefinition, ColumnDefinitionWithTable, Database, ForeignKeyDefinition,
    IndexDefinition, QueryOutput, Row, TriggerDefinition,
};
use super::sql::{Credentials, Endpoint, SqlBinding, SqlEngine, SqlSession};
use crate::config::{ChangeSet, ConnectionConfig, Topology};
use crate::error::{DbError, DbResult};

pub struct DuckDbEngine;

impl SqlEngine for DuckDbEngine {
    fn name(&self) -> &str {
        "DuckDB"
    }

    fn uses_network(&self) -> bool {
        false
    }

    fn endpoints(&self, config: &ConnectionConfig) -> DbResult<Vec<Endpoint>> {
        let mut path = config.host.trim();
        if path.is_empty() {
            path = config.database.trim();
        }
        if path.is_empty() {
            path = ":memory:";
        }
        Ok(vec![Endpoint::new(path, 0)])
    }

    fn open(
        &self,
        endpoint: &Endpoint,
        _credentials: &Credentials,
        config: &ConnectionConfig,
    ) -> DbResult<Box<dyn SqlSession>> {
        let path = endpoint.address.as_str();
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else if config.topology == Topology::Replica {
            Config::default()
                .access_mode(AccessMode::ReadOnly)
                .and_then(|cfg| Connection::open_with_flags(path, cfg))
        } else {
            Connection::open(path)
        }
        .map_err(|e| DbError::Connection(format!("{}: {}", path, e)))?;

        Ok(Box::new(DuckDbSession { conn }))
    }
}

pub struct DuckDbSession {
    conn: Connection,
}

fn query_err(e: duckdb::Error) -> DbError {
    DbError::Query(e.to_string())
}

fn to_json(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Bool(b),
        DuckValue::TinyInt(i) => Value::from(i),
        DuckValue::SmallInt(i) => Value::from(i),
        DuckValue::Int(i) => Value::from(i),
        DuckValue::BigInt(i) => Value::from(i),
        DuckValue::HugeInt(i) => Value::String(i.to_string()),
        DuckValue::UTinyInt(i) => Value::from(i),
        DuckValue::USmallInt(i) => Value::from(i),
        DuckValue::UInt(i) => Value::from(i),
        DuckValue::UBigInt(i) => Value::from(i),
        DuckValue::Float(f) => serde_json::Number::from_f64(f64::from(f))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        DuckValue::Double(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        DuckValue::Text(s) => Value::String(s),
        DuckValue::Blob(b) => Value::String(String::from_utf8_lossy(&b).into_owned()),
        other => Value::String(format!("{:?}", other)),
    }
}

fn to_duck(value: &Value) -> DuckValue {
    match value {
        Value::Null => DuckValue::Null,
        Value::Bool(b) => DuckValue::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => DuckValue::BigInt(i),
            None => DuckValue::Double(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => DuckValue::Text(s.clone()),
        other => DuckValue::Text(other.to_string()),
    }
}

fn literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Split `schema.table`; the schema falls back to `db_name`, then `main`.
fn split_table(db_name: &str, table_name: &str) -> (String, String) {
    match table_name.split_once('.') {
        Some((schema, table)) => (schema.to_string(), table.to_string()),
        None if !db_name.trim().is_empty() => (db_name.trim().to_string(), table_name.to_string()),
        None => ("main".to_string(), table_name.to_string()),
    }
}

impl DuckDbSession {
    fn first_column(&mut self, sql: &str) -> DbResult<Vec<String>> {
        let output = self.query(sql)?;
        let Some(column) = output.columns.first().cloned() else {
            return Ok(Vec::new());
        };
        Ok(output
            .rows
            .iter()
            .filter_map(|row| row.get(&column).and_then(Value::as_str).map(str::to_string))
            .collect())
    }
}

impl SqlSession for DuckDbSession {
    fn ping(&mut self) -> DbResult<()> {
        self.conn
            .execute_batch("SELECT 1")
            .map_err(|e| DbError::Connection(e.to_string()))
    }

    fn query(&mut self, sql: &str) -> DbResult<QueryOutput> {
        let mut stmt = self.conn.prepare(sql).map_err(query_err)?;
        let mut rows = stmt.query([]).map_err(query_err)?;
        let columns: Vec<String> = rows
            .as_ref()
            .map(|s| s.column_names().into_iter().map(|c| c.to_string()).collect())
            .unwrap_or_default();

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(query_err)? {
            let mut record = Row::new();
            for (i, name) in columns.iter().enumerate() {
                let value: DuckValue = row.get(i).map_err(query_err)?;
                record.insert(name.clone(), to_json(value));
            }
            out.push(record);
        }
        Ok(QueryOutput { rows: out, columns })
    }

    fn exec(&mut self, sql: &str) -> DbResult<i64> {
        match self.conn.execute(sql, []) {
            Ok(n) => Ok(n as i64),
            Err(_) => {
                self.conn.execute_batch(sql).map_err(query_err)?;
                Ok(0)
            }
        }
    }

    fn exec_params(&mut self, sql: &str, params: &[Value]) -> DbResult<i64> {
        self.conn
            .execute(sql, params_from_iter(params.iter().map(to_duck)))
            .map(|n| n as i64)
            .map_err(query_err)
    }

    fn databases(&mut self) -> DbResult<Vec<String>> {
        self.first_column("SELECT database_name FROM duckdb_databases() WHERE NOT internal")
    }

    fn tables(&mut self, _db_name: &str) -> DbResult<Vec<String>> {
        let output = self.query(
            "SELECT table_schema, table_name FROM information_schema.tables \
             WHERE table_type = 'BASE TABLE' \
             AND table_schema NOT IN ('information_schema', 'pg_catalog') \
             ORDER BY table_schema, table_name",
        )?;

        let mut tables: Vec<String> = Vec::new();
        for row in &output.rows {
            let schema = row.get("table_schema").and_then(Value::as_str).unwrap_or("");
            let Some(name) = row.get("table_name").and_then(Value::as_str) else {
                continue;
            };
            let qualified = if schema.is_empty() || schema.eq_ignore_ascii_case("main") {
                name.to_string()
            } else {
                format!("{}.{}", schema, name)
            };
            if !tables.contains(&qualified) {
                tables.push(qualified);
            }
        }
        Ok(tables)
    }

    fn create_statement(&mut self, db_name: &str, table_name: &str) -> DbResult<String> {
        let (schema, table) = split_table(db_name, table_name);
        let sql = format!(
            "SELECT sql FROM duckdb_tables() WHERE schema_name = {} AND table_name = {} \
             UNION ALL SELECT sql FROM duckdb_views() WHERE schema_name = {} AND view_name = {}",
            literal(&schema),
            literal(&table),
            literal(&schema),
            literal(&table)
        );
        self.first_column(&sql)?
            .into_iter()
            .next()
            .ok_or_else(|| DbError::Query(format!("table {} not found", table_name)))
    }

    fn columns(&mut self, db_name: &str, table_name: &str) -> DbResult<Vec<ColumnDefinition>> {
        let (schema, table) = split_table(db_name, table_name);
        let output = self.query(&format!(
            "SELECT column_name, data_type, is_nullable, column_default \
             FROM information_schema.columns \
             WHERE table_schema = {} AND table_name = {} ORDER BY ordinal_position",
            literal(&schema),
            literal(&table)
        ))?;
        let pk = self.first_column(&format!(
            "SELECT unnest(constraint_column_names) FROM duckdb_constraints() \
             WHERE schema_name = {} AND table_name = {} AND constraint_type = 'PRIMARY KEY'",
            literal(&schema),
            literal(&table)
        ))?;

        Ok(output
            .rows
            .iter()
            .map(|row| {
                let text = |key: &str| row.get(key).and_then(Value::as_str).unwrap_or("").to_string();
                let name = text("column_name");
                ColumnDefinition {
                    key: if pk.contains(&name) { "PRI".into() } else { String::new() },
                    data_type: text("data_type"),
                    nullable: text("is_nullable"),
                    default: row
                        .get("column_default")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    name,
                    ..Default::default()
                }
            })
            .collect())
    }

    fn indexes(&mut self, db_name: &str, table_name: &str) -> DbResult<Vec<IndexDefinition>> {
        let (schema, table) = split_table(db_name, table_name);
        let output = self.query(&format!(
            "SELECT index_name, is_unique, expressions FROM duckdb_indexes() \
             WHERE schema_name = {} AND table_name = {}",
            literal(&schema),
            literal(&table)
        ))?;
        Ok(output
            .rows
            .iter()
            .map(|row| IndexDefinition {
                name: row.get("index_name").and_then(Value::as_str).unwrap_or("").to_string(),
                column_name: row.get("expressions").and_then(Value::as_str).unwrap_or("").to_string(),
                non_unique: if row.get("is_unique").and_then(Value::as_bool).unwrap_or(false) {
                    0
                } else {
                    1
                },
                seq_in_index: 1,
                index_type: "ART".to_string(),
            })
            .collect())
    }

    fn foreign_keys(
        &mut self,
        db_name: &str,
        table_name: &str,
    ) -> DbResult<Vec<ForeignKeyDefinition>> {
        let (schema, table) = split_table(db_name, table_name);
        let output = self.query(&format!(
            "SELECT constraint_index, unnest(constraint_column_names) AS column_name, constraint_text \
             FROM duckdb_constraints() \
             WHERE schema_name = {} AND table_name = {} AND constraint_type = 'FOREIGN KEY'",
            literal(&schema),
            literal(&table)
        ))?;
        Ok(output
            .rows
            .iter()
            .map(|row| {
                let name = format!(
                    "fk_{}_{}",
                    table,
                    row.get("constraint_index").map(Value::to_string).unwrap_or_default()
                );
                let text = row.get("constraint_text").and_then(Value::as_str).unwrap_or("");
                let (ref_table, ref_column) = parse_references(text);
                ForeignKeyDefinition {
                    constraint_name: name.clone(),
                    name,
                    column_name: row.get("column_name").and_then(Value::as_str).unwrap_or("").to_string(),
                    ref_table_name: ref_table,
                    ref_column_name: ref_column,
                }
            })
            .collect())
    }

    fn triggers(&mut self, _db_name: &str, _table_name: &str) -> DbResult<Vec<TriggerDefinition>> {
        // DuckDB has no triggers
        Ok(Vec::new())
    }
}

/// `... REFERENCES other(id)` to `("other", "id")`.
fn parse_references(constraint: &str) -> (String, String) {
    let upper = constraint.to_uppercase();
    let Some(pos) = upper.find("REFERENCES") else {
        return (String::new(), String::new());
    };
    let rest = constraint[pos + "REFERENCES".len()..].trim();
    match rest.split_once('(') {
        Some((table, cols)) => (
            table.trim().trim_matches('"').to_string(),
            cols.trim_end_matches(')').trim().trim_matches('"').to_string(),
        ),
        None => (rest.trim_matches('"').to_string(), String::new()),
    }
}

/// DuckDB binding: shared SQL binding plus listing fallbacks.
pub struct DuckDbDatabase {
    inner: Arc<SqlBinding>,
}

impl DuckDbDatabase {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SqlBinding::new(DuckDbEngine)),
        }
    }
}

impl Default for DuckDbDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Database for DuckDbDatabase {
    async fn connect(&self, config: &ConnectionConfig) -> DbResult<()> {
        self.inner.connect(config).await
    }

    async fn close(&self) -> DbResult<()> {
        self.inner.close().await
    }

    async fn ping(&self) -> DbResult<()> {
        self.inner.ping().await
    }

    async fn query(&self, sql: &str) -> DbResult<QueryOutput> {
        self.inner.query(sql).await
    }

    async fn exec(&self, sql: &str) -> DbResult<i64> {
        self.inner.exec(sql).await
    }

    async fn get_databases(&self) -> DbResult<Vec<String>> {
        match self.inner.get_databases().await {
            Ok(names) if !names.is_empty() => Ok(names),
            Ok(_) => Ok(vec!["main".to_string()]),
            Err(DbError::NotOpen) => Err(DbError::NotOpen),
            Err(e) => {
                tracing::debug!(error = %e, "duckdb database listing failed, using main");
                Ok(vec!["main".to_string()])
            }
        }
    }

    async fn get_tables(&self, db_name: &str) -> DbResult<Vec<String>> {
        match self.inner.get_tables(db_name).await {
            Ok(tables) => Ok(tables),
            Err(DbError::NotOpen) => Err(DbError::NotOpen),
            Err(e) => {
                tracing::debug!(error = %e, "information_schema listing failed, trying SHOW TABLES");
                let output = self.inner.query("SHOW TABLES").await?;
                let column = output.columns.first().cloned().unwrap_or_else(|| "name".to_string());
                Ok(output
                    .rows
                    .iter()
                    .filter_map(|r| r.get(&column).and_then(Value::as_str).map(str::to_string))
                    .collect())
            }
        }
    }

    async fn get_create_statement(&self, db_name: &str, table_name: &str) -> DbResult<String> {
        self.inner.get_create_statement(db_name, table_name).await
    }

    async fn get_columns(
        &self,
        db_name: &str,
        table_name: &str,
    ) -> DbResult<Vec<ColumnDefinition>> {
        self.inner.get_columns(db_name, table_name).await
    }

    async fn get_all_columns(&self, db_name: &str) -> DbResult<Vec<ColumnDefinitionWithTable>> {
        self.inner.get_all_columns(db_name).await
    }

    async fn get_indexes(&self, db_name: &str, table_name: &str) -> DbResult<Vec<IndexDefinition>> {
        self.inner.get_indexes(db_name, table_name).await
    }

    async fn get_foreign_keys(
        &self,
        db_name: &str,
        table_name: &str,
    ) -> DbResult<Vec<ForeignKeyDefinition>> {
        self.inner.get_foreign_keys(db_name, table_name).await
    }

    async fn get_triggers(
        &self,
        db_name: &str,
        table_name: &str,
    ) -> DbResult<Vec<TriggerDefinition>> {
        self.inner.get_triggers(db_name, table_name).await
    }

    fn batch_applier(&self) -> Option<&dyn BatchApplier> {
        Some(self)
    }
}

#[async_trait]
impl BatchApplier for DuckDbDatabase {
    async fn apply_changes(&self, table_name: &str, changes: &ChangeSet) -> DbResult<()> {
        self.inner.apply_changes(table_name, changes).await
    }
}
