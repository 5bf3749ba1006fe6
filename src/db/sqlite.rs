//! Built-in SQLite engine.
//!
//! Connection "addresses" are file paths. The path comes from `host`, or
//! `database` when `host` is empty; extra `hosts` entries act as failover
//! files. Saved configs from older releases sometimes carry a `:port`
//! suffix or a leading slash before a Windows drive, both are cleaned up.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags, OptionalExtension};
use serde_json::Value;

use super::contract::{
    ColumnDefinition, ForeignKeyDefinition, IndexDefinition, QueryOutput, Row, TriggerDefinition,
};
use super::sql::{Credentials, Endpoint, SqlBinding, SqlDialect, SqlEngine, SqlSession};
use crate::config::{ConnectionConfig, Topology};
use crate::error::{DbError, DbResult};

static HOST_PORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]*[A-Za-z0-9_-]:\d{1,5}$").unwrap());
static PORT_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":\d{1,5}$").unwrap());
static WINDOWS_DRIVE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z]:[\\/]").unwrap());
static TRIGGER_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\bTRIGGER\b.*?\b(BEFORE|AFTER|INSTEAD\s+OF)?\s*\b(INSERT|UPDATE|DELETE)\b")
        .unwrap()
});

const DEFAULT_BUSY_TIMEOUT_SECS: u64 = 5;
const DIALECT: SqlDialect = SqlDialect::ANSI;

/// Fresh, unconnected SQLite binding.
pub fn binding() -> SqlBinding {
    SqlBinding::new(SqliteEngine)
}

/// Whether `input` is a `host:port` pair rather than a file path.
pub fn looks_like_host_port(input: &str) -> bool {
    let input = input.trim();
    if WINDOWS_DRIVE.is_match(input) || input.contains('/') || input.contains('\\') {
        return false;
    }
    HOST_PORT.is_match(input)
}

/// Clean a user-supplied SQLite path.
pub fn normalize_sqlite_path(raw: &str) -> DbResult<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(DbError::InvalidRequest(
            "SQLite needs a local database file path".to_string(),
        ));
    }
    if raw == ":memory:" || raw.starts_with("file:") {
        return Ok(raw.to_string());
    }
    if looks_like_host_port(raw) {
        return Err(DbError::InvalidRequest(format!(
            "SQLite expects a local database file path, got host:port {:?}",
            raw
        )));
    }

    let mut path = raw;
    // "/F:\dir\db" written by older path pickers
    if let Some(rest) = path.strip_prefix(['/', '\\']) {
        if WINDOWS_DRIVE.is_match(rest) {
            path = rest;
        }
    }

    let mut cleaned = path.to_string();
    while let Some(m) = PORT_SUFFIX.find(&cleaned) {
        if m.start() == 0 {
            break;
        }
        cleaned.truncate(m.start());
    }
    Ok(cleaned)
}

/// Database path of a config: `host` first, `database` as fallback.
pub fn resolve_sqlite_dsn(config: &ConnectionConfig) -> DbResult<String> {
    let host = config.host.trim();
    if !host.is_empty() {
        return normalize_sqlite_path(host);
    }
    normalize_sqlite_path(&config.database)
}

/// Create the parent directory of a database file.
pub fn ensure_sqlite_parent_dir(path: &str) -> DbResult<()> {
    if path == ":memory:" || path.starts_with("file:") {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

pub struct SqliteEngine;

impl SqlEngine for SqliteEngine {
    fn name(&self) -> &str {
        "SQLite"
    }

    fn uses_network(&self) -> bool {
        false
    }

    fn endpoints(&self, config: &ConnectionConfig) -> DbResult<Vec<Endpoint>> {
        let mut paths: Vec<String> = Vec::new();
        let has_primary = !config.host.trim().is_empty() || !config.database.trim().is_empty();
        if has_primary || config.hosts.is_empty() {
            paths.push(resolve_sqlite_dsn(config)?);
        }
        for extra in &config.hosts {
            if extra.trim().is_empty() {
                continue;
            }
            let path = normalize_sqlite_path(extra)?;
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
        Ok(paths
            .into_iter()
            .enumerate()
            .map(|(i, p)| Endpoint::new(p, i))
            .collect())
    }

    fn open(
        &self,
        endpoint: &Endpoint,
        _credentials: &Credentials,
        config: &ConnectionConfig,
    ) -> DbResult<Box<dyn SqlSession>> {
        let path = endpoint.address.as_str();
        let read_only = config.topology == Topology::Replica;

        let flags = if read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            ensure_sqlite_parent_dir(path)
                .map_err(|e| DbError::Connection(format!("{}: {}", path, e.detail())))?;
            OpenFlags::default()
        };

        let conn = Connection::open_with_flags(path, flags)
            .map_err(|e| DbError::Connection(format!("{}: {}", path, e)))?;

        let timeout = if config.timeout == 0 {
            DEFAULT_BUSY_TIMEOUT_SECS
        } else {
            config.timeout
        };
        conn.busy_timeout(Duration::from_secs(timeout))
            .map_err(|e| DbError::Connection(e.to_string()))?;

        Ok(Box::new(SqliteSession { conn }))
    }
}

pub struct SqliteSession {
    conn: Connection,
}

fn query_err(e: rusqlite::Error) -> DbError {
    DbError::Query(e.to_string())
}

fn schema_of(db_name: &str) -> String {
    let name = db_name.trim();
    if name.is_empty() {
        "main".to_string()
    } else {
        name.to_string()
    }
}

/// SQLite cell to JSON. Blobs come back as lossy UTF-8 text.
fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

/// JSON parameter to SQLite value. Arrays and objects are stored as JSON text.
fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

impl SqliteSession {
    /// Names of single-column unique indexes and of any indexed column.
    fn indexed_columns(&mut self, db_name: &str, table: &str) -> DbResult<(Vec<String>, Vec<String>)> {
        let indexes = self.indexes(db_name, table)?;
        let mut unique = Vec::new();
        let mut any = Vec::new();
        for idx in &indexes {
            let width = indexes.iter().filter(|i| i.name == idx.name).count();
            if idx.non_unique == 0 && width == 1 {
                unique.push(idx.column_name.clone());
            }
            any.push(idx.column_name.clone());
        }
        Ok((unique, any))
    }
}

impl SqlSession for SqliteSession {
    fn ping(&mut self) -> DbResult<()> {
        self.conn
            .query_row("SELECT 1", [], |_| Ok(()))
            .map_err(|e| DbError::Connection(e.to_string()))
    }

    fn query(&mut self, sql: &str) -> DbResult<QueryOutput> {
        let mut stmt = self.conn.prepare(sql).map_err(query_err)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt.query([]).map_err(query_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(query_err)? {
            let mut record = Row::new();
            for (i, name) in columns.iter().enumerate() {
                record.insert(name.clone(), to_json(row.get_ref(i).map_err(query_err)?));
            }
            out.push(record);
        }

        Ok(QueryOutput { rows: out, columns })
    }

    fn exec(&mut self, sql: &str) -> DbResult<i64> {
        match self.conn.execute(sql, []) {
            Ok(n) => Ok(n as i64),
            // multiple statements, or a statement that returns rows
            Err(_) => {
                self.conn.execute_batch(sql).map_err(query_err)?;
                Ok(self.conn.changes() as i64)
            }
        }
    }

    fn exec_params(&mut self, sql: &str, params: &[Value]) -> DbResult<i64> {
        self.conn
            .execute(sql, params_from_iter(params.iter().map(to_sql)))
            .map(|n| n as i64)
            .map_err(query_err)
    }

    fn dialect(&self) -> SqlDialect {
        DIALECT
    }

    fn databases(&mut self) -> DbResult<Vec<String>> {
        let mut stmt = self.conn.prepare("PRAGMA database_list").map_err(query_err)?;
        let names = stmt
            .query_map([], |r| r.get::<_, String>(1))
            .map_err(query_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_err)?;
        if names.is_empty() {
            return Ok(vec!["main".to_string()]);
        }
        Ok(names)
    }

    fn tables(&mut self, db_name: &str) -> DbResult<Vec<String>> {
        let sql = format!(
            "SELECT name FROM {}.sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            DIALECT.quote_ident(&schema_of(db_name))
        );
        let mut stmt = self.conn.prepare(&sql).map_err(query_err)?;
        let names = stmt
            .query_map([], |r| r.get::<_, String>(0))
            .map_err(query_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_err)?;
        Ok(names)
    }

    fn create_statement(&mut self, db_name: &str, table_name: &str) -> DbResult<String> {
        let sql = format!(
            "SELECT sql FROM {}.sqlite_master WHERE name = ?1 AND type IN ('table', 'view')",
            DIALECT.quote_ident(&schema_of(db_name))
        );
        let ddl: Option<Option<String>> = self
            .conn
            .query_row(&sql, [table_name], |r| r.get(0))
            .optional()
            .map_err(query_err)?;
        match ddl.flatten() {
            Some(ddl) => Ok(ddl),
            None => Err(DbError::Query(format!("table {} not found", table_name))),
        }
    }

    fn columns(&mut self, db_name: &str, table_name: &str) -> DbResult<Vec<ColumnDefinition>> {
        let (unique, indexed) = self.indexed_columns(db_name, table_name)?;

        let sql = format!(
            "PRAGMA {}.table_info({})",
            DIALECT.quote_ident(&schema_of(db_name)),
            DIALECT.quote_ident(table_name)
        );
        let mut stmt = self.conn.prepare(&sql).map_err(query_err)?;
        let raw = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, String>(1)?,
                    r.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    r.get::<_, i64>(3)?,
                    r.get::<_, Option<String>>(4)?,
                    r.get::<_, i64>(5)?,
                ))
            })
            .map_err(query_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_err)?;

        let pk_count = raw.iter().filter(|c| c.4 > 0).count();
        Ok(raw
            .into_iter()
            .map(|(name, data_type, notnull, default, pk)| {
                let key = if pk > 0 {
                    "PRI"
                } else if unique.contains(&name) {
                    "UNI"
                } else if indexed.contains(&name) {
                    "MUL"
                } else {
                    ""
                };
                let extra = if pk > 0 && pk_count == 1 && data_type.eq_ignore_ascii_case("INTEGER") {
                    "auto_increment"
                } else {
                    ""
                };
                ColumnDefinition {
                    nullable: if notnull != 0 || pk > 0 { "NO" } else { "YES" }.to_string(),
                    key: key.to_string(),
                    extra: extra.to_string(),
                    name,
                    data_type,
                    default,
                    comment: String::new(),
                }
            })
            .collect())
    }

    fn indexes(&mut self, db_name: &str, table_name: &str) -> DbResult<Vec<IndexDefinition>> {
        let schema = DIALECT.quote_ident(&schema_of(db_name));
        let list_sql = format!(
            "PRAGMA {}.index_list({})",
            schema,
            DIALECT.quote_ident(table_name)
        );
        let mut stmt = self.conn.prepare(&list_sql).map_err(query_err)?;
        let list = stmt
            .query_map([], |r| Ok((r.get::<_, String>(1)?, r.get::<_, i64>(2)?)))
            .map_err(query_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_err)?;
        drop(stmt);

        let mut out = Vec::new();
        for (index_name, unique) in list {
            let info_sql = format!(
                "PRAGMA {}.index_info({})",
                schema,
                DIALECT.quote_ident(&index_name)
            );
            let mut info = self.conn.prepare(&info_sql).map_err(query_err)?;
            let cols = info
                .query_map([], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, Option<String>>(2)?)))
                .map_err(query_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(query_err)?;
            for (seqno, column) in cols {
                out.push(IndexDefinition {
                    name: index_name.clone(),
                    column_name: column.unwrap_or_default(),
                    non_unique: if unique != 0 { 0 } else { 1 },
                    seq_in_index: seqno as i32 + 1,
                    index_type: "BTREE".to_string(),
                });
            }
        }
        Ok(out)
    }

    fn foreign_keys(
        &mut self,
        db_name: &str,
        table_name: &str,
    ) -> DbResult<Vec<ForeignKeyDefinition>> {
        let sql = format!(
            "PRAGMA {}.foreign_key_list({})",
            DIALECT.quote_ident(&schema_of(db_name)),
            DIALECT.quote_ident(table_name)
        );
        let mut stmt = self.conn.prepare(&sql).map_err(query_err)?;
        let keys = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, Option<String>>(4)?,
                ))
            })
            .map_err(query_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_err)?;

        Ok(keys
            .into_iter()
            .map(|(id, ref_table, from, to)| {
                let name = format!("fk_{}_{}", table_name, id);
                ForeignKeyDefinition {
                    constraint_name: name.clone(),
                    name,
                    column_name: from,
                    ref_table_name: ref_table,
                    ref_column_name: to.unwrap_or_default(),
                }
            })
            .collect())
    }

    fn triggers(&mut self, db_name: &str, table_name: &str) -> DbResult<Vec<TriggerDefinition>> {
        let sql = format!(
            "SELECT name, COALESCE(sql, '') FROM {}.sqlite_master WHERE type = 'trigger' AND tbl_name = ?1 ORDER BY name",
            DIALECT.quote_ident(&schema_of(db_name))
        );
        let mut stmt = self.conn.prepare(&sql).map_err(query_err)?;
        let rows = stmt
            .query_map([table_name], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
            .map_err(query_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_err)?;

        Ok(rows
            .into_iter()
            .map(|(name, statement)| {
                let (timing, event) = parse_trigger_head(&statement);
                TriggerDefinition {
                    name,
                    timing,
                    event,
                    statement,
                }
            })
            .collect())
    }
}

/// Timing and event of a `CREATE TRIGGER` statement. SQLite defaults the
/// timing to BEFORE.
fn parse_trigger_head(statement: &str) -> (String, String) {
    match TRIGGER_HEAD.captures(statement) {
        Some(caps) => {
            let timing = caps
                .get(1)
                .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase())
                .unwrap_or_else(|| "BEFORE".to_string());
            let event = caps.get(2).map(|m| m.as_str().to_uppercase()).unwrap_or_default();
            (timing, event)
        }
        None => (String::new(), String::new()),
    }
}
