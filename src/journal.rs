//! Structured event journal.
//!
//! The hot path never blocks on logging: `submit` is a bounded `try_send`
//! that drops on backpressure. A background task drains the channel and
//! appends JSONL to disk. The journal is constructed once at startup, passed
//! by `Arc` to every consumer, and stopped explicitly with a bounded wait.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::core::Result;
use crate::events::LogEvent;

/// Fire-and-forget sink for structured events.
pub trait EventSink: Send + Sync {
    fn submit(&self, event: LogEvent);
}

/// Discards every event. Useful when running headless without a journal.
pub struct NullSink;

impl EventSink for NullSink {
    fn submit(&self, _event: LogEvent) {}
}

const CHANNEL_CAPACITY: usize = 4096;
const STOP_WAIT: Duration = Duration::from_secs(3);

/// JSONL journal backed by a bounded channel and a background writer task.
pub struct Journal {
    tx: Mutex<Option<flume::Sender<LogEvent>>>,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
    dropped: AtomicU64,
}

impl Journal {
    /// Open the journal file (creating parent directories) and spawn the
    /// writer task. Must be called from within a tokio runtime.
    pub async fn start(path: &Path) -> Result<Arc<Self>> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        let (tx, rx) = flume::bounded::<LogEvent>(CHANNEL_CAPACITY);
        let worker = tokio::spawn(async move {
            let mut writer = tokio::io::BufWriter::new(file);
            while let Ok(event) = rx.recv_async().await {
                let line = match serde_json::to_string(&event) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("journal: failed to serialize event: {}", e);
                        continue;
                    }
                };
                if writer.write_all(line.as_bytes()).await.is_err()
                    || writer.write_all(b"\n").await.is_err()
                {
                    warn!("journal: write failed, event lost");
                }
                if rx.is_empty() {
                    let _ = writer.flush().await;
                }
            }
            let _ = writer.flush().await;
        });

        Ok(Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            dropped: AtomicU64::new(0),
        }))
    }

    /// Close the channel and wait for the writer to drain, bounded. On
    /// timeout the remaining backlog is abandoned and the abandonment logged.
    pub async fn stop(&self) {
        self.tx.lock().take();
        let handle = self.worker.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(STOP_WAIT, &mut handle).await.is_err() {
                handle.abort();
                warn!("journal: writer did not drain in time, backlog abandoned");
            }
        }
        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            warn!("journal: {} events dropped under backpressure", dropped);
        }
    }
}

impl EventSink for Journal {
    fn submit(&self, event: LogEvent) {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return;
        };
        if tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("journal: channel full, event dropped");
        }
    }
}

/// In-memory sink capturing events for assertions.
#[cfg(test)]
pub struct CollectSink {
    events: Mutex<Vec<LogEvent>>,
}

#[cfg(test)]
impl CollectSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, kind: crate::events::EventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }
}

#[cfg(test)]
impl EventSink for CollectSink {
    fn submit(&self, event: LogEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, LogEvent};

    #[tokio::test]
    async fn writes_events_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let journal = Journal::start(&path).await.unwrap();

        journal.submit(LogEvent::engine(EventKind::EngineStarted, "up"));
        journal.submit(LogEvent::engine(EventKind::EngineStopped, "down"));
        journal.stop().await;

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event_type"], "engine_started");
        assert_eq!(first["source"], "engine");
    }

    #[tokio::test]
    async fn submit_after_stop_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let journal = Journal::start(&path).await.unwrap();
        journal.stop().await;
        journal.submit(LogEvent::engine(EventKind::EngineStarted, "late"));
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.is_empty());
    }
}
