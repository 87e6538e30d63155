//! Incident monitor: connection, staleness and heartbeat watchdog.
//!
//! Detection is edge-triggered and latched: an alert fires on the
//! Healthy→Stalled transition only, and recovery is log-only. Evaluation is
//! rate-limited internally, so the synchronous call from the engine tick and
//! the independent background loop converge safely.

pub mod notify;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::warn;

pub use notify::{LogOnlySink, NotificationGate, NotificationSink, WebhookSink};

use crate::core::config::MonitorConfig;
use crate::core::{ConnectionStatus, Instrument, Priority};
use crate::events::{EventKind, EventSource, LogEvent};
use crate::journal::EventSink;

/// Answers whether any stream is currently in an active trading phase.
/// Non-critical checks are suppressed while nothing is active.
pub trait ActivityProbe: Send + Sync {
    fn any_stream_active(&self) -> bool;
}

#[derive(Debug, Clone, Copy)]
enum ConnState {
    Connected,
    Disconnected {
        since: DateTime<Utc>,
        sustained_notified: bool,
    },
}

struct MonitorState {
    conn: ConnState,
    last_bar: HashMap<Instrument, DateTime<Utc>>,
    data_stalled: HashSet<Instrument>,
    last_engine_tick: Option<DateTime<Utc>>,
    engine_stalled: bool,
    last_poll: Option<DateTime<Utc>>,
    poll_stalled: bool,
    last_eval: Option<DateTime<Utc>>,
}

enum PendingAlert {
    SustainedDisconnect { outage_secs: i64 },
    EngineStall { silent_secs: i64 },
    PollStall { silent_secs: i64 },
    DataStall { instrument: Instrument, silent_secs: i64 },
}

const STOP_WAIT: StdDuration = StdDuration::from_secs(3);

pub struct IncidentMonitor {
    cfg: MonitorConfig,
    sustained: Duration,
    engine_stall: Duration,
    poll_stall: Duration,
    data_stall: Duration,
    gate: Arc<NotificationGate>,
    journal: Arc<dyn EventSink>,
    probe: Arc<dyn ActivityProbe>,
    state: Mutex<MonitorState>,
    loop_ctl: Mutex<Option<(watch::Sender<bool>, tokio::task::JoinHandle<()>)>>,
}

// TODO: session-aware "initial data missing" check (armed stream whose
// instrument never delivered a first bar) is pending product clarification
// on thresholds; only bar-gap staleness is implemented.

impl IncidentMonitor {
    pub fn new(
        cfg: MonitorConfig,
        gate: Arc<NotificationGate>,
        journal: Arc<dyn EventSink>,
        probe: Arc<dyn ActivityProbe>,
    ) -> Self {
        Self {
            sustained: Duration::seconds(cfg.sustained_disconnect_secs as i64),
            engine_stall: Duration::seconds(cfg.engine_stall_secs as i64),
            poll_stall: Duration::seconds(cfg.poll_stall_secs as i64),
            data_stall: Duration::seconds(cfg.data_stall_secs as i64),
            cfg,
            gate,
            journal,
            probe,
            state: Mutex::new(MonitorState {
                conn: ConnState::Connected,
                last_bar: HashMap::new(),
                data_stalled: HashSet::new(),
                last_engine_tick: None,
                engine_stalled: false,
                last_poll: None,
                poll_stalled: false,
                last_eval: None,
            }),
            loop_ctl: Mutex::new(None),
        }
    }

    /// Track broker connectivity. First loss and recovery are log-only; the
    /// sustained-disconnect alert is raised by `evaluate`.
    pub fn on_connection_status(&self, status: ConnectionStatus, now: DateTime<Utc>) {
        let event = {
            let mut st = self.state.lock();
            match (status, st.conn) {
                (ConnectionStatus::Disconnected, ConnState::Connected) => {
                    st.conn = ConnState::Disconnected {
                        since: now,
                        sustained_notified: false,
                    };
                    Some(
                        LogEvent::engine(EventKind::ConnectionLost, "broker connection lost")
                            .from_source(EventSource::Monitor),
                    )
                }
                (ConnectionStatus::Connected, ConnState::Disconnected { since, .. }) => {
                    st.conn = ConnState::Connected;
                    Some(
                        LogEvent::engine(
                            EventKind::ConnectionRestored,
                            format!(
                                "broker connection restored after {}s",
                                (now - since).num_seconds()
                            ),
                        )
                        .from_source(EventSource::Monitor)
                        .with("outage_secs", (now - since).num_seconds()),
                    )
                }
                _ => None,
            }
        };
        if let Some(event) = event {
            self.journal.submit(event);
        }
    }

    /// Record a bar for staleness tracking and clear an active stall.
    pub fn on_bar(&self, instrument: &Instrument, ts: DateTime<Utc>) {
        let recovered = {
            let mut st = self.state.lock();
            st.last_bar.insert(instrument.clone(), ts);
            st.data_stalled.remove(instrument)
        };
        if recovered {
            self.journal.submit(
                LogEvent::engine(
                    EventKind::StallRecovered,
                    format!("bar data for {} recovered", instrument),
                )
                .from_source(EventSource::Monitor)
                .with_instrument(instrument),
            );
        }
    }

    /// Engine tick heartbeat.
    pub fn update_engine_tick(&self, now: DateTime<Utc>) {
        let recovered = {
            let mut st = self.state.lock();
            st.last_engine_tick = Some(now);
            std::mem::take(&mut st.engine_stalled)
        };
        if recovered {
            self.journal.submit(
                LogEvent::engine(EventKind::StallRecovered, "engine heartbeat recovered")
                    .from_source(EventSource::Monitor),
            );
        }
    }

    /// Timetable poll heartbeat.
    pub fn update_timetable_poll(&self, now: DateTime<Utc>) {
        let recovered = {
            let mut st = self.state.lock();
            st.last_poll = Some(now);
            std::mem::take(&mut st.poll_stalled)
        };
        if recovered {
            self.journal.submit(
                LogEvent::engine(EventKind::StallRecovered, "timetable polling recovered")
                    .from_source(EventSource::Monitor),
            );
        }
    }

    /// Run all incident checks. Internally rate-limited to once per second,
    /// so calling it from both the tick path and the background loop is safe.
    pub fn evaluate(&self, now: DateTime<Utc>) {
        let active = self.probe.any_stream_active();

        let pending = {
            let mut st = self.state.lock();
            if st.last_eval.is_some_and(|t| now - t < Duration::seconds(1)) {
                return;
            }
            st.last_eval = Some(now);

            let mut pending = Vec::new();

            if let ConnState::Disconnected {
                since,
                sustained_notified,
            } = st.conn
            {
                if !sustained_notified && now - since >= self.sustained && active {
                    st.conn = ConnState::Disconnected {
                        since,
                        sustained_notified: true,
                    };
                    pending.push(PendingAlert::SustainedDisconnect {
                        outage_secs: (now - since).num_seconds(),
                    });
                }
            }

            if active && !st.engine_stalled {
                if let Some(last) = st.last_engine_tick {
                    if now - last >= self.engine_stall {
                        st.engine_stalled = true;
                        pending.push(PendingAlert::EngineStall {
                            silent_secs: (now - last).num_seconds(),
                        });
                    }
                }
            }

            if !st.poll_stalled {
                if let Some(last) = st.last_poll {
                    if now - last >= self.poll_stall {
                        st.poll_stalled = true;
                        pending.push(PendingAlert::PollStall {
                            silent_secs: (now - last).num_seconds(),
                        });
                    }
                }
            }

            if active {
                let stale: Vec<(Instrument, i64)> = st
                    .last_bar
                    .iter()
                    .filter(|(instrument, last)| {
                        now - **last >= self.data_stall && !st.data_stalled.contains(*instrument)
                    })
                    .map(|(instrument, last)| (instrument.clone(), (now - *last).num_seconds()))
                    .collect();
                for (instrument, silent_secs) in stale {
                    st.data_stalled.insert(instrument.clone());
                    pending.push(PendingAlert::DataStall {
                        instrument,
                        silent_secs,
                    });
                }
            }

            pending
        };

        for alert in pending {
            self.dispatch(alert, now);
        }
    }

    fn dispatch(&self, alert: PendingAlert, now: DateTime<Utc>) {
        match alert {
            PendingAlert::SustainedDisconnect { outage_secs } => {
                let message = format!("broker disconnected for {}s with active streams", outage_secs);
                self.journal.submit(
                    LogEvent::engine(EventKind::SustainedDisconnect, message.clone())
                        .from_source(EventSource::Monitor)
                        .with("outage_secs", outage_secs),
                );
                self.gate.send(
                    "sustained_disconnect",
                    "Broker connection lost",
                    &message,
                    Priority::Emergency,
                    true,
                    now,
                );
            }
            PendingAlert::EngineStall { silent_secs } => {
                let message = format!("engine heartbeat silent for {}s", silent_secs);
                self.journal.submit(
                    LogEvent::engine(EventKind::EngineStall, message.clone())
                        .from_source(EventSource::Monitor)
                        .with("silent_secs", silent_secs),
                );
                self.gate.send(
                    "engine_stall",
                    "Engine stalled",
                    &message,
                    Priority::Emergency,
                    true,
                    now,
                );
            }
            PendingAlert::PollStall { silent_secs } => {
                let message = format!("timetable poll silent for {}s", silent_secs);
                self.journal.submit(
                    LogEvent::engine(EventKind::PollStall, message.clone())
                        .from_source(EventSource::Monitor)
                        .with("silent_secs", silent_secs),
                );
                // notification intentionally policy-gated, default log-only
                if self.cfg.notify_on_poll_stall {
                    self.gate.send(
                        "timetable_poll_stall",
                        "Timetable polling stalled",
                        &message,
                        Priority::High,
                        false,
                        now,
                    );
                }
            }
            PendingAlert::DataStall {
                instrument,
                silent_secs,
            } => {
                let message = format!("no bars for {} in {}s", instrument, silent_secs);
                self.journal.submit(
                    LogEvent::engine(EventKind::DataStall, message.clone())
                        .from_source(EventSource::Monitor)
                        .with_instrument(&instrument)
                        .with("silent_secs", silent_secs),
                );
                // notification intentionally policy-gated, default log-only
                // (per-stream gap tolerance mitigates isolated bar gaps)
                if self.cfg.notify_on_data_stall {
                    self.gate.send(
                        &format!("data_stall:{}", instrument),
                        "Market data stalled",
                        &message,
                        Priority::High,
                        false,
                        now,
                    );
                }
            }
        }
    }

    /// Spawn the independent periodic evaluation loop. Must be called from
    /// within a tokio runtime.
    pub fn spawn_loop(self: Arc<Self>) {
        let (tx, mut rx) = watch::channel(false);
        let monitor = Arc::clone(&self);
        let period = StdDuration::from_secs(self.cfg.eval_interval_secs.max(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => monitor.evaluate(Utc::now()),
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        *self.loop_ctl.lock() = Some((tx, handle));
    }

    /// Cooperative shutdown with a bounded join; on timeout the loop is
    /// abandoned and the abandonment journaled rather than blocking exit.
    pub async fn stop(&self) {
        let ctl = self.loop_ctl.lock().take();
        if let Some((tx, mut handle)) = ctl {
            let _ = tx.send(true);
            if tokio::time::timeout(STOP_WAIT, &mut handle).await.is_err() {
                handle.abort();
                warn!("incident monitor loop did not stop in time, abandoned");
                self.journal.submit(
                    LogEvent::engine(
                        EventKind::MonitorAbandoned,
                        "evaluation loop abandoned on shutdown timeout",
                    )
                    .from_source(EventSource::Monitor),
                );
            }
        }
    }
}
