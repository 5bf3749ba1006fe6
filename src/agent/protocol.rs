//! Wire types for driver agent communication.
//!
//! One JSON object per line in each direction. The main process writes
//! [`AgentRequest`]s to the agent's stdin and reads [`AgentResponse`]s from
//! its stdout. Field names are camelCase and must stay stable: agents built
//! from other releases speak the same schema.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{ChangeSet, ConnectionConfig};
use crate::error::{DbError, DbResult};

// ============================================================================
// Method names
// ============================================================================

/// Method name constants.
pub mod methods {
    pub const CONNECT: &str = "connect";
    pub const CLOSE: &str = "close";
    pub const PING: &str = "ping";
    pub const QUERY: &str = "query";
    pub const EXEC: &str = "exec";
    pub const GET_DATABASES: &str = "getDatabases";
    pub const GET_TABLES: &str = "getTables";
    pub const GET_CREATE_STATEMENT: &str = "getCreateStatement";
    pub const GET_COLUMNS: &str = "getColumns";
    pub const GET_ALL_COLUMNS: &str = "getAllColumns";
    pub const GET_INDEXES: &str = "getIndexes";
    pub const GET_FOREIGN_KEYS: &str = "getForeignKeys";
    pub const GET_TRIGGERS: &str = "getTriggers";
    pub const APPLY_CHANGES: &str = "applyChanges";

    /// The closed set of methods an agent understands.
    pub const ALL: &[&str] = &[
        CONNECT,
        CLOSE,
        PING,
        QUERY,
        EXEC,
        GET_DATABASES,
        GET_TABLES,
        GET_CREATE_STATEMENT,
        GET_COLUMNS,
        GET_ALL_COLUMNS,
        GET_INDEXES,
        GET_FOREIGN_KEYS,
        GET_TRIGGERS,
        APPLY_CHANGES,
    ];

    pub fn is_known(method: &str) -> bool {
        ALL.contains(&method)
    }
}

// ============================================================================
// Request/Response Envelope
// ============================================================================

/// Request sent to an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    /// Correlation id, assigned by the client.
    pub id: u64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConnectionConfig>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub query: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub db_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub table_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<ChangeSet>,
}

impl AgentRequest {
    pub fn new(method: &str) -> Self {
        Self {
            method: method.to_string(),
            ..Default::default()
        }
    }

    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_query(mut self, query: &str) -> Self {
        self.query = query.to_string();
        self
    }

    pub fn with_db(mut self, db_name: &str) -> Self {
        self.db_name = db_name.to_string();
        self
    }

    pub fn with_table(mut self, db_name: &str, table_name: &str) -> Self {
        self.db_name = db_name.to_string();
        self.table_name = table_name.to_string();
        self
    }

    pub fn with_changes(mut self, table_name: &str, changes: ChangeSet) -> Self {
        self.table_name = table_name.to_string();
        self.changes = Some(changes);
        self
    }
}

/// Response written by an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    /// Id of the request this answers.
    pub id: u64,
    pub success: bool,
    /// Error message when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error kind, see [`DbError::code`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Method-specific result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Column names of a query result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<i64>,
}

impl AgentResponse {
    pub fn ok(id: u64) -> Self {
        Self {
            id,
            success: true,
            ..Default::default()
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn failure(id: u64, error: &DbError) -> Self {
        Self {
            id,
            success: false,
            error: Some(error.detail()),
            code: Some(error.code().to_string()),
            ..Default::default()
        }
    }

    /// Error carried by a failed response, `None` on success.
    pub fn error(&self) -> Option<DbError> {
        if self.success {
            return None;
        }
        let message = self
            .error
            .clone()
            .unwrap_or_else(|| "driver agent reported an unknown error".to_string());
        Some(DbError::from_code(self.code.as_deref().unwrap_or(""), message))
    }

    /// Decode `data` as a list; a missing or null payload is an empty list.
    pub fn list<T: DeserializeOwned>(&self) -> DbResult<Vec<T>> {
        match &self.data {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| DbError::Protocol(format!("unexpected data shape: {}", e))),
        }
    }

    /// Decode `data` as a string.
    pub fn text(&self) -> DbResult<String> {
        match &self.data {
            None | Some(Value::Null) => Ok(String::new()),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Err(DbError::Protocol(format!(
                "expected string data, got {}",
                other
            ))),
        }
    }
}

/// Serialize a message as one NDJSON line, newline included.
pub fn encode_line<T: Serialize>(message: &T) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
