//! Route a statement to `query` or `exec`.
//!
//! The statement is parsed with sqlparser's generic dialect. Engines accept
//! plenty of syntax the parser does not (vendor `SHOW` forms, `PRAGMA`,
//! Mongo shell commands), so anything unparsed falls back to a leading
//! keyword check.

use sqlparser::ast::{SetExpr, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

/// Keywords that start a row-returning statement.
const ROW_KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "SHOW", "DESCRIBE", "DESC", "EXPLAIN", "PRAGMA", "VALUES", "TABLE", "CALL",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Returns rows.
    Query,
    /// Returns an affected-row count.
    Exec,
}

/// Classify the first statement of `sql`.
pub fn classify(sql: &str) -> StatementKind {
    match Parser::parse_sql(&GenericDialect {}, sql) {
        Ok(statements) => match statements.first() {
            Some(statement) => classify_parsed(statement).unwrap_or_else(|| classify_prefix(sql)),
            None => StatementKind::Exec,
        },
        Err(_) => classify_prefix(sql),
    }
}

fn classify_parsed(statement: &Statement) -> Option<StatementKind> {
    match statement {
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Insert(_) | SetExpr::Update(_) => Some(StatementKind::Exec),
            _ => Some(StatementKind::Query),
        },
        Statement::Explain { .. } | Statement::ExplainTable { .. } => Some(StatementKind::Query),
        Statement::Insert(insert) if insert.returning.is_some() => Some(StatementKind::Query),
        Statement::Insert(_)
        | Statement::Update { .. }
        | Statement::Delete(_)
        | Statement::CreateTable(_)
        | Statement::CreateIndex(_)
        | Statement::CreateView { .. }
        | Statement::AlterTable { .. }
        | Statement::Drop { .. }
        | Statement::Truncate { .. } => Some(StatementKind::Exec),
        // SHOW variants, PRAGMA and friends
        _ => None,
    }
}

/// Keyword check used when the parser cannot decide.
pub fn classify_prefix(sql: &str) -> StatementKind {
    let trimmed = strip_leading_comments(sql).trim_start_matches('(');
    let keyword: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();

    if keyword == "PRAGMA" && trimmed.contains('=') {
        return StatementKind::Exec;
    }
    if ROW_KEYWORDS.contains(&keyword.as_str()) {
        return StatementKind::Query;
    }
    // mongo shell style: db.users.find(...)
    if trimmed.starts_with("db.") && is_mongo_read(trimmed) {
        return StatementKind::Query;
    }
    StatementKind::Exec
}

fn is_mongo_read(command: &str) -> bool {
    [".find(", ".findOne(", ".aggregate(", ".count(", ".countDocuments(", ".distinct("]
        .iter()
        .any(|op| command.contains(op))
}

fn strip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map(|(_, r)| r).unwrap_or("").trim_start();
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map(|(_, r)| r).unwrap_or("").trim_start();
        } else {
            return rest;
        }
    }
}
