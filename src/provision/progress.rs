//! Install progress events.

use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Start,
    Downloading,
    Done,
    Error,
}

/// One progress notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    #[serde(rename = "driverType")]
    pub engine: String,
    pub status: ProgressStatus,
    /// 0..=100, forced to 100 on `done`.
    pub percent: f64,
    pub downloaded: u64,
    pub total: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl ProgressEvent {
    pub fn new(
        engine: &str,
        status: ProgressStatus,
        downloaded: u64,
        total: u64,
        message: impl Into<String>,
    ) -> Self {
        let mut percent = if total > 0 {
            (downloaded as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };
        if status == ProgressStatus::Done {
            percent = 100.0;
        }
        let engine = engine.trim();
        Self {
            engine: if engine.is_empty() { "unknown".to_string() } else { engine.to_string() },
            status,
            percent,
            downloaded,
            total,
            message: message.into().trim().to_string(),
        }
    }
}

/// Receiver of progress events. Emitting never blocks the installer.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        // receiver gone means nobody is listening
        let _ = self.tx.send(event);
    }
}

/// Logs events at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn emit(&self, event: ProgressEvent) {
        tracing::debug!(
            engine = %event.engine,
            status = ?event.status,
            percent = event.percent,
            "{}",
            event.message
        );
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Map `downloaded/total` into the `start..end` band of a 0..100 scale.
///
/// Returns `(value, 100)`. Unknown totals report the band start.
pub fn scale_progress(downloaded: u64, total: u64, start: u64, end: u64) -> (u64, u64) {
    if end <= start {
        return (end, 100);
    }
    if total == 0 {
        return (start, 100);
    }
    let downloaded = downloaded.min(total);
    (start + downloaded * (end - start) / total, 100)
}
