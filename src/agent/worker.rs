//! Agent side of the protocol: serve one engine binding over stdin/stdout.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use super::protocol::{encode_line, methods, AgentRequest, AgentResponse};
use crate::db::{Database, DatabaseFactory};
use crate::error::{DbError, DbResult};

/// Dispatches requests to a single in-process binding.
///
/// One worker serves one engine for the life of the process. `connect`
/// builds a fresh binding from the factory and replaces any earlier one.
pub struct AgentWorker {
    engine: String,
    factory: DatabaseFactory,
    db: Option<Arc<dyn Database>>,
}

impl AgentWorker {
    pub fn new(engine: &str, factory: DatabaseFactory) -> Self {
        Self {
            engine: engine.to_string(),
            factory,
            db: None,
        }
    }

    pub fn engine(&self) -> &str {
        &self.engine
    }

    pub fn is_connected(&self) -> bool {
        self.db.is_some()
    }

    /// Handle one request. Never fails: errors become failure responses.
    pub async fn handle(&mut self, request: AgentRequest) -> AgentResponse {
        let id = request.id;
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(id, error = %err, "request failed");
                AgentResponse::failure(id, &err)
            }
        }
    }

    /// Handle one raw line. An unparseable line yields a failure with id 0.
    pub async fn handle_line(&mut self, line: &str) -> AgentResponse {
        match serde_json::from_str::<AgentRequest>(line) {
            Ok(request) => self.handle(request).await,
            Err(e) => AgentResponse::failure(
                0,
                &DbError::InvalidRequest(format!("malformed request: {}", e)),
            ),
        }
    }

    async fn dispatch(&mut self, request: AgentRequest) -> DbResult<AgentResponse> {
        let id = request.id;
        let method = request.method.as_str();

        if !methods::is_known(method) {
            return Err(DbError::InvalidRequest(format!("unknown method: {}", method)));
        }

        match method {
            methods::CONNECT => {
                let config = request.config.ok_or_else(|| {
                    DbError::InvalidRequest("connect requires a config".to_string())
                })?;
                if let Some(old) = self.db.take() {
                    let _ = old.close().await;
                }
                let db = (self.factory)();
                db.connect(&config).await?;
                tracing::info!(engine = %self.engine, "connected");
                self.db = Some(db);
                return Ok(AgentResponse::ok(id));
            }
            methods::CLOSE => {
                if let Some(db) = self.db.take() {
                    db.close().await?;
                }
                return Ok(AgentResponse::ok(id));
            }
            _ => {}
        }

        let db = self.db.clone().ok_or(DbError::NotOpen)?;
        let db_name = request.db_name.as_str();
        let table_name = request.table_name.as_str();

        let response = match method {
            methods::PING => {
                db.ping().await?;
                AgentResponse::ok(id)
            }
            methods::QUERY => {
                let output = db.query(&request.query).await?;
                AgentResponse {
                    fields: Some(output.columns),
                    ..AgentResponse::ok(id).with_data(Value::Array(
                        output.rows.into_iter().map(Value::Object).collect(),
                    ))
                }
            }
            methods::EXEC => {
                let affected = db.exec(&request.query).await?;
                AgentResponse {
                    rows_affected: Some(affected),
                    ..AgentResponse::ok(id)
                }
            }
            methods::GET_DATABASES => ok_data(id, &db.get_databases().await?)?,
            methods::GET_TABLES => ok_data(id, &db.get_tables(db_name).await?)?,
            methods::GET_CREATE_STATEMENT => AgentResponse::ok(id).with_data(json!(
                db.get_create_statement(db_name, table_name).await?
            )),
            methods::GET_COLUMNS => ok_data(id, &db.get_columns(db_name, table_name).await?)?,
            methods::GET_ALL_COLUMNS => ok_data(id, &db.get_all_columns(db_name).await?)?,
            methods::GET_INDEXES => ok_data(id, &db.get_indexes(db_name, table_name).await?)?,
            methods::GET_FOREIGN_KEYS => {
                ok_data(id, &db.get_foreign_keys(db_name, table_name).await?)?
            }
            methods::GET_TRIGGERS => ok_data(id, &db.get_triggers(db_name, table_name).await?)?,
            methods::APPLY_CHANGES => {
                let changes = request.changes.ok_or_else(|| {
                    DbError::InvalidRequest("applyChanges requires changes".to_string())
                })?;
                let applier = db.batch_applier().ok_or_else(|| {
                    DbError::UnsupportedOperation(format!(
                        "{} does not support applyChanges",
                        self.engine
                    ))
                })?;
                applier.apply_changes(table_name, &changes).await?;
                AgentResponse::ok(id)
            }
            other => return Err(DbError::InvalidRequest(format!("unknown method: {}", other))),
        };

        Ok(response)
    }

    /// Close the current binding, if any.
    pub async fn shutdown(&mut self) {
        if let Some(db) = self.db.take() {
            if let Err(e) = db.close().await {
                tracing::warn!(engine = %self.engine, error = %e, "close on shutdown failed");
            }
        }
    }

    /// Serve requests until the reader hits EOF.
    ///
    /// Requests are handled strictly in order; each response is flushed
    /// before the next line is read.
    pub async fn serve<R, W>(&mut self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let response = self.handle_line(&line).await;
            let out = encode_line(&response).map_err(std::io::Error::other)?;
            writer.write_all(out.as_bytes()).await?;
            writer.flush().await?;
        }

        tracing::debug!(engine = %self.engine, "stdin closed, shutting down");
        self.shutdown().await;
        Ok(())
    }
}

fn ok_data<T: serde::Serialize>(id: u64, value: &T) -> DbResult<AgentResponse> {
    Ok(AgentResponse::ok(id).with_data(serde_json::to_value(value)?))
}
