//! Async client for a driver agent process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::task::JoinHandle;

use super::error::{AgentError, AgentResult};
use super::protocol::{encode_line, methods, AgentRequest, AgentResponse};
use crate::config::AgentSettings;
use crate::error::DbError;

/// Windows `CREATE_NO_WINDOW`: no console window for the agent.
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Grace period for the best-effort `close` request.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// How long error enrichment waits for stderr to drain after an exit.
const STDERR_DRAIN_WAIT: Duration = Duration::from_millis(250);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<AgentResult<AgentResponse>>>>>;

/// Timeouts and limits for one agent process.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub call_timeout: Duration,
    pub connect_timeout: Duration,
    pub stderr_limit: usize,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self::from(&AgentSettings::default())
    }
}

impl From<&AgentSettings> for AgentOptions {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            call_timeout: settings.call_timeout(),
            connect_timeout: settings.connect_timeout(),
            stderr_limit: settings.stderr_limit_bytes.max(1),
        }
    }
}

/// Bounded tail of an agent's stderr, lines joined with ` | `.
#[derive(Debug)]
pub struct StderrBuffer {
    limit: usize,
    text: std::sync::Mutex<String>,
    drained: AtomicBool,
    notify: Notify,
}

impl StderrBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            text: std::sync::Mutex::new(String::new()),
            drained: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Append one line, dropping the oldest text beyond the limit.
    pub fn push(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let mut text = self.text.lock().unwrap_or_else(|e| e.into_inner());
        if !text.is_empty() {
            text.push_str(" | ");
        }
        text.push_str(line);

        if text.len() > self.limit {
            let mut cut = text.len() - self.limit;
            while !text.is_char_boundary(cut) {
                cut += 1;
            }
            text.drain(..cut);
        }
    }

    pub fn snapshot(&self) -> String {
        self.text.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn mark_drained(&self) {
        self.drained.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    async fn wait_drained(&self, max: Duration) {
        if self.drained.load(Ordering::SeqCst) {
            return;
        }
        let _ = tokio::time::timeout(max, self.notify.notified()).await;
    }
}

/// Client for one driver agent process.
///
/// The client spawns the agent as a child process and exchanges NDJSON
/// over its stdin/stdout. Calls are serialized: the stdin lock is held for
/// the whole request/response exchange, so at most one request is in
/// flight. Responses are still routed through a correlation map keyed by
/// request id, which lets late or stray responses be detected.
///
/// # Example
///
/// ```ignore
/// use dbnexus::agent::{AgentClient, AgentOptions, protocol::*};
///
/// let client = AgentClient::spawn("./sqlite-driver-agent", "sqlite", AgentOptions::default()).await?;
/// client.call(AgentRequest::new(methods::CONNECT).with_config(config)).await?;
/// let tables = client.call(AgentRequest::new(methods::GET_TABLES).with_db("main")).await?;
/// client.close().await?;
/// ```
#[derive(Debug)]
pub struct AgentClient {
    engine: String,
    path: PathBuf,

    /// Writer for agent stdin. `None` once closed. Doubles as the call lock.
    stdin: Mutex<Option<BufWriter<ChildStdin>>>,

    /// Map of pending request IDs to response channels.
    pending: Pending,

    child: Mutex<Option<Child>>,

    next_id: AtomicU64,

    stderr: Arc<StderrBuffer>,

    _reader_task: JoinHandle<()>,
    _stderr_task: JoinHandle<()>,

    options: AgentOptions,
}

impl AgentClient {
    /// Spawn an agent process for `engine`.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be started.
    pub async fn spawn<P: AsRef<Path>>(
        path: P,
        engine: &str,
        options: AgentOptions,
    ) -> AgentResult<Self> {
        let path = path.as_ref().to_path_buf();

        let mut command = Command::new(&path);
        command
            .arg("--engine")
            .arg(engine)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(windows)]
        command.creation_flags(CREATE_NO_WINDOW);

        let mut child = command.spawn().map_err(|source| AgentError::SpawnFailed {
            path: path.clone(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or(AgentError::PipeUnavailable("stdin"))?;
        let stdout = child.stdout.take().ok_or(AgentError::PipeUnavailable("stdout"))?;
        let stderr_pipe = child.stderr.take().ok_or(AgentError::PipeUnavailable("stderr"))?;

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let stderr = Arc::new(StderrBuffer::new(options.stderr_limit));

        let reader_task = Self::spawn_reader_task(stdout, pending.clone());
        let stderr_task = Self::spawn_stderr_task(stderr_pipe, stderr.clone(), engine.to_string());

        tracing::debug!(engine, path = %path.display(), pid = ?child.id(), "driver agent started");

        Ok(Self {
            engine: engine.to_string(),
            path,
            stdin: Mutex::new(Some(BufWriter::new(stdin))),
            pending,
            child: Mutex::new(Some(child)),
            next_id: AtomicU64::new(0),
            stderr,
            _reader_task: reader_task,
            _stderr_task: stderr_task,
            options,
        })
    }

    /// Spawn the background task that reads responses from the agent.
    fn spawn_reader_task(stdout: ChildStdout, pending: Pending) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<AgentResponse>(&line) {
                            Ok(resp) => {
                                let mut pending = pending.lock().await;
                                match pending.remove(&resp.id) {
                                    Some(tx) => {
                                        let _ = tx.send(Ok(resp));
                                    }
                                    None => {
                                        tracing::warn!(id = resp.id, "response for unknown request id");
                                    }
                                }
                            }
                            Err(e) => {
                                // only one call is ever in flight; fail it
                                let mut pending = pending.lock().await;
                                for (_, tx) in pending.drain() {
                                    let _ = tx.send(Err(AgentError::Malformed(e.to_string())));
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let mut pending = pending.lock().await;
                        for (_, tx) in pending.drain() {
                            let _ = tx.send(Err(AgentError::ReadFailed(std::io::Error::new(
                                e.kind(),
                                e.to_string(),
                            ))));
                        }
                        break;
                    }
                }
            }

            // Agent exited - fail everything still waiting
            let mut pending = pending.lock().await;
            for (_, tx) in pending.drain() {
                let _ = tx.send(Err(AgentError::AgentExited));
            }
        })
    }

    fn spawn_stderr_task(
        stderr: ChildStderr,
        buffer: Arc<StderrBuffer>,
        engine: String,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(engine = %engine, "agent: {}", line);
                buffer.push(&line);
            }
            buffer.mark_drained();
        })
    }

    /// Send a request and wait for its response, with the call deadline.
    ///
    /// A response with `success: false` is returned as
    /// [`AgentError::Remote`].
    pub async fn call(&self, request: AgentRequest) -> AgentResult<AgentResponse> {
        self.call_with_timeout(request, self.options.call_timeout).await
    }

    /// Send a request with an explicit deadline.
    ///
    /// On timeout the agent is killed: its stdout may still carry the late
    /// response, so the process cannot be reused.
    pub async fn call_with_timeout(
        &self,
        mut request: AgentRequest,
        timeout: Duration,
    ) -> AgentResult<AgentResponse> {
        let mut stdin_guard = self.stdin.lock().await;
        let stdin = stdin_guard.as_mut().ok_or(AgentError::Closed)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        request.id = id;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let line = match encode_line(&request) {
            Ok(line) => line,
            Err(e) => {
                self.pending.lock().await.remove(&id);
                return Err(AgentError::SerializeFailed(e));
            }
        };

        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = written {
            self.pending.lock().await.remove(&id);
            return Err(AgentError::WriteFailed(e));
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(AgentError::AgentExited),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                stdin_guard.take();
                tracing::warn!(
                    engine = %self.engine,
                    method = %request.method,
                    timeout_secs = timeout.as_secs(),
                    "driver agent call timed out, stopping agent"
                );
                self.kill().await;
                return Err(AgentError::Timeout(timeout.as_secs()));
            }
        };

        if response.id != id {
            return Err(AgentError::Malformed(format!(
                "response id {} does not match request id {}",
                response.id, id
            )));
        }

        match response.error() {
            Some(err) => Err(AgentError::Remote(err)),
            None => Ok(response),
        }
    }

    /// Close the agent: best-effort `close` request, close stdin, kill,
    /// wait. Safe to call more than once.
    pub async fn close(&self) -> AgentResult<()> {
        let open = self.stdin.lock().await.is_some();
        if open {
            if let Err(e) = self
                .call_with_timeout(AgentRequest::new(methods::CLOSE), CLOSE_GRACE)
                .await
            {
                tracing::debug!(engine = %self.engine, error = %e, "close request failed");
            }
        }

        // dropping the writer closes the pipe
        self.stdin.lock().await.take();
        self.kill().await;
        Ok(())
    }

    async fn kill(&self) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        if let Err(e) = child.start_kill() {
            tracing::debug!(engine = %self.engine, error = %e, "agent already exited");
        }
        match child.wait().await {
            Ok(status) => tracing::debug!(engine = %self.engine, %status, "driver agent stopped"),
            Err(e) => tracing::warn!(engine = %self.engine, error = %e, "failed to reap driver agent"),
        }
    }

    /// Convert an agent error into a contract error, attaching stderr.
    pub async fn enrich(&self, err: AgentError) -> DbError {
        if err.is_agent_exited() || matches!(err, AgentError::Malformed(_)) {
            self.stderr.wait_drained(STDERR_DRAIN_WAIT).await;
        }
        err.into_db_error(&self.stderr.snapshot())
    }

    pub fn engine(&self) -> &str {
        &self.engine
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &AgentOptions {
        &self.options
    }
}
