//! Append-only audit trail for liquidation decisions.
//!
//! Events are handed off through a bounded channel to a background writer
//! task, so emitting an event never blocks the liquidation critical path
//! beyond the enqueue itself. A full queue drops the event, counts it, and
//! logs the rejection instead of stalling the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::error::Result;

const AUDIT_QUEUE_CAPACITY: usize = 1024;

/// Audit event types, serialized exactly as persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    LiquidationStart,
    OrderCancelled,
    OrderPlaced,
    OrderRejected,
    LiquidationComplete,
}

/// One write-once audit record; ordered by emission time within a single
/// liquidation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub correlation_id: String,
    pub symbol: Option<String>,
    pub details: serde_json::Map<String, Value>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, correlation_id: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            correlation_id: correlation_id.to_string(),
            symbol: None,
            details: serde_json::Map::new(),
        }
    }

    pub fn with_symbol(mut self, symbol: &str) -> Self {
        self.symbol = Some(symbol.to_string());
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

enum AuditMessage {
    Record(AuditEvent),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle to the audit sink
#[derive(Clone)]
pub struct AuditLogger {
    tx: mpsc::Sender<AuditMessage>,
    dropped: Arc<AtomicU64>,
}

impl AuditLogger {
    /// Open the audit log for appending and spawn the writer task.
    pub async fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let (tx, rx) = mpsc::channel(AUDIT_QUEUE_CAPACITY);
        tokio::spawn(writer_loop(file, rx, path));

        Ok(Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Fire-and-forget enqueue; never blocks the caller.
    pub fn log(&self, event: AuditEvent) {
        match self.tx.try_send(AuditMessage::Record(event)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped, "Audit queue full, event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Audit writer stopped, event dropped");
            }
        }
    }

    /// Number of events rejected because the queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Wait until every event enqueued so far has reached the file.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(AuditMessage::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Drain the queue and stop the writer; called once at host shutdown.
    pub async fn close(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(AuditMessage::Shutdown(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn writer_loop(
    mut file: tokio::fs::File,
    mut rx: mpsc::Receiver<AuditMessage>,
    path: PathBuf,
) {
    while let Some(message) = rx.recv().await {
        match message {
            AuditMessage::Record(event) => {
                let mut line = match serde_json::to_string(&event) {
                    Ok(line) => line,
                    Err(e) => {
                        error!("Failed to serialize audit event: {}", e);
                        continue;
                    }
                };
                line.push('\n');

                if let Err(e) = file.write_all(line.as_bytes()).await {
                    error!("Failed to append audit record to {:?}: {}", path, e);
                    continue;
                }
                if let Err(e) = file.flush().await {
                    error!("Failed to flush audit log {:?}: {}", path, e);
                }
            }
            AuditMessage::Flush(ack) => {
                let _ = file.flush().await;
                let _ = ack.send(());
            }
            AuditMessage::Shutdown(ack) => {
                let _ = file.flush().await;
                let _ = ack.send(());
                debug!("Audit writer stopped");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_audit_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("krait-audit-{}-{}.jsonl", tag, uuid::Uuid::new_v4()))
    }

    async fn read_lines(path: &PathBuf) -> Vec<serde_json::Value> {
        let content = tokio::fs::read_to_string(path).await.expect("read audit");
        content
            .lines()
            .map(|l| serde_json::from_str(l).expect("valid JSON line"))
            .collect()
    }

    #[tokio::test]
    async fn events_are_written_as_ordered_jsonl() {
        let path = temp_audit_path("order");
        let audit = AuditLogger::open(&path).await.expect("open");

        audit.log(AuditEvent::new(AuditEventType::LiquidationStart, "corr-1"));
        audit.log(
            AuditEvent::new(AuditEventType::OrderPlaced, "corr-1")
                .with_symbol("BTCUSDT")
                .with_detail("order_id", "42"),
        );
        audit.log(
            AuditEvent::new(AuditEventType::LiquidationComplete, "corr-1")
                .with_detail("positions_closed", 1),
        );
        audit.flush().await;

        let lines = read_lines(&path).await;
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["event_type"], "LIQUIDATION_START");
        assert_eq!(lines[1]["event_type"], "ORDER_PLACED");
        assert_eq!(lines[1]["symbol"], "BTCUSDT");
        assert_eq!(lines[1]["details"]["order_id"], "42");
        assert_eq!(lines[2]["event_type"], "LIQUIDATION_COMPLETE");
        for line in &lines {
            assert_eq!(line["correlation_id"], "corr-1");
        }

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn append_survives_reopen() {
        let path = temp_audit_path("reopen");

        let audit = AuditLogger::open(&path).await.expect("open");
        audit.log(AuditEvent::new(AuditEventType::LiquidationStart, "a"));
        audit.close().await;

        let audit = AuditLogger::open(&path).await.expect("reopen");
        audit.log(AuditEvent::new(AuditEventType::LiquidationComplete, "b"));
        audit.close().await;

        let lines = read_lines(&path).await;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["correlation_id"], "a");
        assert_eq!(lines[1]["correlation_id"], "b");

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn no_events_dropped_under_normal_load() {
        let path = temp_audit_path("load");
        let audit = AuditLogger::open(&path).await.expect("open");

        for i in 0..200 {
            audit.log(
                AuditEvent::new(AuditEventType::OrderCancelled, "corr")
                    .with_detail("seq", i),
            );
        }
        audit.flush().await;

        assert_eq!(audit.dropped_events(), 0);
        assert_eq!(read_lines(&path).await.len(), 200);

        let _ = tokio::fs::remove_file(&path).await;
    }
}
