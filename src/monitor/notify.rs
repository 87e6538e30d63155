//! Operator notification: dedupe, rate limiting and dispatch.
//!
//! The gate decides and records under one lock; the actual dispatch goes
//! through a non-blocking sink so I/O never sits inside detection logic.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::{error, warn};

use crate::core::{Notification, Priority};
use crate::events::{EventKind, EventSource, LogEvent};
use crate::journal::EventSink;

/// Destination for notifications that passed the gate. Enqueue must never
/// block; delivery and retry are the sink's own business.
pub trait NotificationSink: Send + Sync {
    fn enqueue(&self, notification: Notification);
}

/// Fallback sink when no webhook is configured.
pub struct LogOnlySink;

impl NotificationSink for LogOnlySink {
    fn enqueue(&self, n: Notification) {
        warn!(
            key = %n.key,
            priority = n.priority.as_u8(),
            "NOTIFY {}: {}",
            n.title,
            n.message
        );
    }
}

const DISPATCH_CAPACITY: usize = 256;
const STOP_WAIT: StdDuration = StdDuration::from_secs(3);

/// Posts notification JSON to a webhook from a background task.
pub struct WebhookSink {
    tx: Mutex<Option<flume::Sender<Notification>>>,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WebhookSink {
    /// Must be called from within a tokio runtime.
    pub fn start(url: String) -> Arc<Self> {
        let (tx, rx) = flume::bounded::<Notification>(DISPATCH_CAPACITY);
        let client = reqwest::Client::new();
        let worker = tokio::spawn(async move {
            while let Ok(n) = rx.recv_async().await {
                let payload = json!({
                    "key": n.key,
                    "title": n.title,
                    "message": n.message,
                    "priority": n.priority.as_u8(),
                });
                if let Err(e) = client.post(&url).json(&payload).send().await {
                    error!("notification {} failed to deliver: {}", n.key, e);
                }
            }
        });
        Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub async fn stop(&self) {
        self.tx.lock().take();
        let handle = self.worker.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(STOP_WAIT, &mut handle).await.is_err() {
                handle.abort();
                warn!("notification dispatcher did not drain in time, backlog abandoned");
            }
        }
    }
}

impl NotificationSink for WebhookSink {
    fn enqueue(&self, notification: Notification) {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return;
        };
        if tx.try_send(notification).is_err() {
            error!("notification queue full, dropping");
        }
    }
}

struct GateState {
    last_sent: HashMap<String, DateTime<Utc>>,
    critical_sent: HashSet<String>,
    run_id: Option<String>,
    trading_date: Option<NaiveDate>,
    unknown_run_warned: bool,
}

/// Deduplicating, rate-limiting front door for all outbound notifications.
pub struct NotificationGate {
    min_interval: Duration,
    sink: Arc<dyn NotificationSink>,
    journal: Arc<dyn EventSink>,
    state: Mutex<GateState>,
}

impl NotificationGate {
    pub fn new(
        min_interval_secs: u64,
        sink: Arc<dyn NotificationSink>,
        journal: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            min_interval: Duration::seconds(min_interval_secs as i64),
            sink,
            journal,
            state: Mutex::new(GateState {
                last_sent: HashMap::new(),
                critical_sent: HashSet::new(),
                run_id: None,
                trading_date: None,
                unknown_run_warned: false,
            }),
        }
    }

    pub fn set_run_id(&self, run_id: impl Into<String>) {
        self.state.lock().run_id = Some(run_id.into());
    }

    pub fn set_trading_date(&self, date: Option<NaiveDate>) {
        self.state.lock().trading_date = date;
    }

    /// Send one notification. Emergency priority always bypasses the per-key
    /// minimum interval. Returns whether the notification was dispatched.
    pub fn send(
        &self,
        key: &str,
        title: &str,
        message: &str,
        priority: Priority,
        skip_rate_limit: bool,
        now: DateTime<Utc>,
    ) -> bool {
        let suppressed = {
            let mut state = self.state.lock();
            let bypass = skip_rate_limit || priority == Priority::Emergency;
            let too_soon = !bypass
                && state
                    .last_sent
                    .get(key)
                    .is_some_and(|last| now - *last < self.min_interval);
            if !too_soon {
                state.last_sent.insert(key.to_string(), now);
            }
            too_soon
        };

        if suppressed {
            self.journal.submit(
                LogEvent::engine(
                    EventKind::NotificationSuppressed,
                    format!("notification {} suppressed by rate limit", key),
                )
                .from_source(EventSource::Monitor)
                .with("key", key),
            );
            return false;
        }

        self.sink.enqueue(Notification {
            key: key.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            priority,
        });
        true
    }

    /// Report a critical event. Only the whitelisted kinds are accepted; the
    /// first occurrence per run-scope key sends exactly one emergency.
    pub fn report_critical(&self, kind: EventKind, payload: Value, now: DateTime<Utc>) -> bool {
        if !kind.is_critical_alert() {
            self.journal.submit(
                LogEvent::engine(
                    EventKind::CriticalRejected,
                    format!("critical report {:?} rejected for safety", kind),
                )
                .from_source(EventSource::Monitor)
                .with("requested_kind", format!("{:?}", kind))
                .with("payload", payload),
            );
            return false;
        }

        let (tag, title) = critical_profile(kind);

        // check-and-mark is atomic so concurrent reporters cannot double-send
        let (key, warn_missing_scope) = {
            let mut state = self.state.lock();
            let mut warn_missing = false;
            let scope = if let Some(run_id) = &state.run_id {
                run_id.clone()
            } else if let Some(date) = state.trading_date {
                date.to_string()
            } else {
                if !state.unknown_run_warned {
                    state.unknown_run_warned = true;
                    warn_missing = true;
                }
                "UNKNOWN_RUN".to_string()
            };
            let key = format!("{}:{}", tag, scope);
            if !state.critical_sent.insert(key.clone()) {
                return false;
            }
            (key, warn_missing)
        };

        if warn_missing_scope {
            warn!(
                "critical report without run id or trading date; dedupe scope is UNKNOWN_RUN (missing identifiers are a bug)"
            );
        }

        let message = render_critical(title, &payload);
        self.journal
            .submit(LogEvent::execution(kind, message.clone()).with("payload", payload));
        self.send(&key, title, &message, Priority::Emergency, true, now)
    }
}

fn critical_profile(kind: EventKind) -> (&'static str, &'static str) {
    match kind {
        EventKind::ExecutionInvariantViolation => (
            "execution_invariant_violation",
            "Execution invariant violated",
        ),
        EventKind::FailClosedEntered => ("fail_closed_entered", "Engine entered fail-closed mode"),
        _ => ("unsupported_critical", "Unsupported critical event"),
    }
}

/// Per-event-type message template applied to the payload.
fn render_critical(title: &str, payload: &Value) -> String {
    let detail = payload
        .get("reason")
        .or_else(|| payload.get("detail"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| payload.to_string());
    format!("{}: {}", title, detail)
}

/// Captures notifications in memory for assertions.
#[cfg(test)]
pub struct RecordingSink {
    sent: Mutex<Vec<Notification>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[cfg(test)]
impl NotificationSink for RecordingSink {
    fn enqueue(&self, notification: Notification) {
        self.sent.lock().push(notification);
    }
}
