//! ChangeSet to parameterized SQL.
//!
//! Planning is separate from execution so a change set is fully validated
//! before the transaction starts.

use serde_json::Value;

use crate::config::{ChangeSet, ValueMap};
use crate::error::{DbError, DbResult};

/// Identifier quoting and placeholder style of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlDialect {
    pub quote_open: char,
    pub quote_close: char,
    /// `$1, $2` instead of `?`.
    pub numbered_params: bool,
}

impl SqlDialect {
    /// Double-quoted identifiers, `?` placeholders.
    pub const ANSI: SqlDialect = SqlDialect {
        quote_open: '"',
        quote_close: '"',
        numbered_params: false,
    };

    /// Backtick identifiers, `?` placeholders.
    pub const BACKTICK: SqlDialect = SqlDialect {
        quote_open: '`',
        quote_close: '`',
        numbered_params: false,
    };

    pub fn quote_ident(&self, ident: &str) -> String {
        let escaped = ident.replace(
            self.quote_close,
            &format!("{}{}", self.quote_close, self.quote_close),
        );
        format!("{}{}{}", self.quote_open, escaped, self.quote_close)
    }

    /// Quote `schema.table` part by part.
    pub fn quote_table(&self, table: &str) -> String {
        table
            .split('.')
            .map(|part| self.quote_ident(part.trim()))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Placeholder for the 1-based parameter `n`.
    pub fn placeholder(&self, n: usize) -> String {
        if self.numbered_params {
            format!("${}", n)
        } else {
            "?".to_string()
        }
    }
}

impl Default for SqlDialect {
    fn default() -> Self {
        Self::ANSI
    }
}

/// One statement of a planned change set.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Translate a change set into statements: inserts, then updates, then
/// deletes, each in the order given.
///
/// Updates and deletes without keys are rejected so a change set can never
/// rewrite or wipe a whole table.
pub fn plan_changes(
    table: &str,
    changes: &ChangeSet,
    dialect: SqlDialect,
) -> DbResult<Vec<PlannedStatement>> {
    if table.trim().is_empty() {
        return Err(DbError::InvalidRequest("table name is required".to_string()));
    }
    let target = dialect.quote_table(table.trim());
    let mut planned = Vec::with_capacity(changes.len());

    for row in &changes.inserts {
        planned.push(plan_insert(&target, row, dialect));
    }

    for (i, update) in changes.updates.iter().enumerate() {
        if update.keys.is_empty() {
            return Err(DbError::InvalidRequest(format!(
                "update #{} has no key columns",
                i + 1
            )));
        }
        if update.values.is_empty() {
            continue;
        }
        let mut params = Vec::new();
        let assignments: Vec<String> = update
            .values
            .iter()
            .map(|(column, value)| {
                params.push(value.clone());
                format!(
                    "{} = {}",
                    dialect.quote_ident(column),
                    dialect.placeholder(params.len())
                )
            })
            .collect();
        let predicate = where_clause(&update.keys, dialect, &mut params);
        planned.push(PlannedStatement {
            sql: format!("UPDATE {} SET {} WHERE {}", target, assignments.join(", "), predicate),
            params,
        });
    }

    for (i, keys) in changes.deletes.iter().enumerate() {
        if keys.is_empty() {
            return Err(DbError::InvalidRequest(format!(
                "delete #{} has no key columns",
                i + 1
            )));
        }
        let mut params = Vec::new();
        let predicate = where_clause(keys, dialect, &mut params);
        planned.push(PlannedStatement {
            sql: format!("DELETE FROM {} WHERE {}", target, predicate),
            params,
        });
    }

    Ok(planned)
}

fn plan_insert(target: &str, row: &ValueMap, dialect: SqlDialect) -> PlannedStatement {
    if row.is_empty() {
        return PlannedStatement {
            sql: format!("INSERT INTO {} DEFAULT VALUES", target),
            params: Vec::new(),
        };
    }
    let columns: Vec<String> = row.keys().map(|c| dialect.quote_ident(c)).collect();
    let placeholders: Vec<String> = (1..=row.len()).map(|n| dialect.placeholder(n)).collect();
    PlannedStatement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({})",
            target,
            columns.join(", "),
            placeholders.join(", ")
        ),
        params: row.values().cloned().collect(),
    }
}

fn where_clause(keys: &ValueMap, dialect: SqlDialect, params: &mut Vec<Value>) -> String {
    keys.iter()
        .map(|(column, value)| {
            let column = dialect.quote_ident(column);
            if value.is_null() {
                format!("{} IS NULL", column)
            } else {
                params.push(value.clone());
                format!("{} = {}", column, dialect.placeholder(params.len()))
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}
