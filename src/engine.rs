//! Trading-day orchestrator.
//!
//! Owns the trading date and the stream registry, sequences startup,
//! reconciliation, bar routing and shutdown. Date validation always precedes
//! routing, and stream creation never precedes the trading-date lock. A
//! stand-down clears in-flight state but never stops the tick loop, so
//! reconciliation is retried on the next poll.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::Mutex;
use serde_json::json;
use tracing::{error, info, warn};

use crate::core::config::EngineConfig;
use crate::core::{Bar, ConnectionStatus, Error, ExecutionMode, Priority, Result};
use crate::events::{EventKind, EventSource, LogEvent};
use crate::execution::{ExecutionAdapter, ExecutionSummary, build_adapter, write_summary};
use crate::host::MarketEvents;
use crate::journal::EventSink;
use crate::monitor::{IncidentMonitor, NotificationGate};
use crate::stream::StreamRegistry;
use crate::timetable::{PollOutcome, TimetablePoller, TimetableError, TimetableSnapshot, reconcile};
use crate::tradespec::TradeSpec;

/// Engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
}

struct DayState {
    trading_date: Option<NaiveDate>,
    fingerprint: Option<String>,
    standing_down: bool,
    next_forced_reconcile: Option<DateTime<Utc>>,
}

pub struct Engine {
    cfg: EngineConfig,
    spec: TradeSpec,
    tz: chrono_tz::Tz,
    bar_period: Duration,
    force_interval: Duration,
    run_id: String,
    state: Mutex<EngineState>,
    day: Mutex<DayState>,
    registry: Arc<Mutex<StreamRegistry>>,
    poller: Mutex<TimetablePoller>,
    monitor: Arc<IncidentMonitor>,
    gate: Arc<NotificationGate>,
    journal: Arc<dyn EventSink>,
    adapter: Mutex<Option<Box<dyn ExecutionAdapter>>>,
}

impl Engine {
    pub fn new(
        cfg: EngineConfig,
        spec: TradeSpec,
        registry: Arc<Mutex<StreamRegistry>>,
        monitor: Arc<IncidentMonitor>,
        gate: Arc<NotificationGate>,
        journal: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let tz = cfg.exchange_tz()?;
        let poller = TimetablePoller::new(
            cfg.timetable.path.clone(),
            cfg.timetable.poll_interval_secs,
            tz,
        );
        Ok(Self {
            bar_period: Duration::seconds(cfg.exchange.bar_period_secs as i64),
            force_interval: Duration::seconds(cfg.timetable.force_reconcile_secs as i64),
            tz,
            cfg,
            spec,
            run_id: uuid::Uuid::new_v4().to_string(),
            state: Mutex::new(EngineState::NotStarted),
            day: Mutex::new(DayState {
                trading_date: None,
                fingerprint: None,
                standing_down: false,
                next_forced_reconcile: None,
            }),
            registry,
            poller: Mutex::new(poller),
            monitor,
            gate,
            journal,
            adapter: Mutex::new(None),
        })
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn trading_date(&self) -> Option<NaiveDate> {
        self.day.lock().trading_date
    }

    /// Start the engine: reject live mode, build the execution adapter, run a
    /// forced reconciliation and emit the startup banner once a trading date
    /// is locked. Without a lock the engine starts in a standing-down posture.
    pub fn start(&self, now: DateTime<Utc>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != EngineState::NotStarted {
                return Err(Error::InvalidState(format!(
                    "start() called in state {:?}",
                    *state
                )));
            }
            *state = EngineState::Starting;
        }

        if self.cfg.app.mode == ExecutionMode::Live {
            let message = "live execution mode is not enabled in this build; refusing to start";
            error!("{}", message);
            self.journal
                .submit(LogEvent::execution(EventKind::LiveModeRejected, message));
            self.gate.send(
                "live_mode_rejected",
                "Live mode rejected",
                message,
                Priority::Emergency,
                true,
                now,
            );
            *self.state.lock() = EngineState::Stopped;
            return Err(Error::InvalidState(message.into()));
        }

        let adapter = build_adapter(self.cfg.app.mode, &self.spec.policy)?;
        *self.adapter.lock() = Some(adapter);
        self.gate.set_run_id(self.run_id.clone());
        self.journal.submit(LogEvent::engine(
            EventKind::EngineStarted,
            format!("engine {} starting in {} mode", self.run_id, self.cfg.app.mode),
        ));

        let outcome = self.poller.lock().force_poll(now);
        self.monitor.update_timetable_poll(now);
        self.day.lock().next_forced_reconcile = Some(now + self.force_interval);
        self.apply_poll_outcome(outcome, now);

        if self.trading_date().is_some() {
            self.emit_banner();
        } else {
            warn!("no trading date locked at startup; standing down until a valid timetable loads");
        }

        *self.state.lock() = EngineState::Running;
        Ok(())
    }

    /// Periodic heartbeat: poll and reconcile the timetable as due, propagate
    /// the tick to every stream, then run incident evaluation (which is
    /// internally rate-limited).
    pub fn tick(&self, now: DateTime<Utc>) {
        if self.state() != EngineState::Running {
            return;
        }
        self.monitor.update_engine_tick(now);

        let forced_due = self
            .day
            .lock()
            .next_forced_reconcile
            .is_some_and(|at| now >= at);
        let outcome = {
            let mut poller = self.poller.lock();
            if forced_due {
                poller.force_poll(now)
            } else {
                poller.poll(now)
            }
        };
        if !matches!(outcome, PollOutcome::NotDue) {
            self.monitor.update_timetable_poll(now);
            if forced_due {
                self.day.lock().next_forced_reconcile = Some(now + self.force_interval);
            }
            self.apply_poll_outcome(outcome, now);
        }

        self.registry.lock().tick_all(now);
        self.monitor.evaluate(now);
    }

    /// Gate one incoming bar and route it to matching streams. Rejections are
    /// journaled with a reason, never raised.
    pub fn on_bar(&self, bar: &Bar, now: DateTime<Utc>) {
        if now - bar.timestamp < self.bar_period {
            self.reject_bar(bar, "partial_bar", "bar is younger than one bar period");
            return;
        }
        let Some(trading_date) = self.trading_date() else {
            self.reject_bar(bar, "trading_date_not_locked", "no trading date is locked");
            return;
        };
        let bar_date = bar.timestamp.with_timezone(&self.tz).date_naive();
        if bar_date != trading_date {
            self.reject_bar(
                bar,
                "foreign_trading_date",
                &format!("bar date {} != locked {}", bar_date, trading_date),
            );
            return;
        }

        let routed = self.registry.lock().route_bar(bar, now);
        self.monitor.on_bar(&bar.instrument, bar.timestamp);
        self.journal.submit(
            LogEvent::engine(
                EventKind::BarRouted,
                format!("bar routed to {} streams", routed),
            )
            .with_instrument(&bar.instrument)
            .with("routed", routed as u64),
        );
    }

    /// Forward broker connectivity to the incident monitor.
    pub fn on_connection_status(&self, status: ConnectionStatus, now: DateTime<Utc>) {
        self.monitor.on_connection_status(status, now);
    }

    /// Stop the engine: persist the execution summary in non-dry-run modes,
    /// then release the incident monitor with a bounded wait.
    pub async fn stop(&self, now: DateTime<Utc>) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != EngineState::Running {
                return Err(Error::InvalidState(format!(
                    "stop() called in state {:?}",
                    *state
                )));
            }
            *state = EngineState::Stopping;
        }

        if !self.cfg.app.mode.is_dry_run() {
            let summary = self.build_summary(now);
            match write_summary(&self.cfg.app.summaries_dir, &summary) {
                Ok(path) => {
                    info!("execution summary written to {}", path.display());
                    self.journal.submit(
                        LogEvent::execution(EventKind::SummaryWritten, "execution summary written")
                            .with("path", path.display().to_string()),
                    );
                }
                Err(e) => error!("failed to write execution summary: {}", e),
            }
        }

        self.monitor.stop().await;
        *self.state.lock() = EngineState::Stopped;
        self.journal
            .submit(LogEvent::engine(EventKind::EngineStopped, "engine stopped"));
        Ok(())
    }

    fn apply_poll_outcome(&self, outcome: PollOutcome, now: DateTime<Utc>) {
        match outcome {
            PollOutcome::NotDue | PollOutcome::Unchanged => {}
            PollOutcome::Changed(snapshot) => self.apply_snapshot(&snapshot),
            PollOutcome::Failed(err) => self.handle_timetable_error(err, now),
        }
    }

    fn apply_snapshot(&self, snapshot: &TimetableSnapshot) {
        self.journal.submit(
            LogEvent::engine(
                EventKind::TimetableChanged,
                format!("timetable loaded for {}", snapshot.trading_date),
            )
            .from_source(EventSource::Timetable)
            .with("fingerprint", snapshot.fingerprint.as_str())
            .with("replay", snapshot.replay),
        );

        self.lock_trading_date(snapshot);

        let summary = {
            let mut registry = self.registry.lock();
            reconcile(snapshot, &mut registry, &self.spec, self.journal.as_ref())
        };
        {
            let mut day = self.day.lock();
            day.fingerprint = Some(snapshot.fingerprint.clone());
            day.standing_down = false;
        }
        info!(
            "reconciled timetable: {} accepted, {} streams live",
            summary.accepted, summary.stream_count
        );
    }

    /// Lock the trading date on first valid load. A differing later value
    /// keeps the original and logs the mismatch.
    fn lock_trading_date(&self, snapshot: &TimetableSnapshot) {
        let locked = {
            let mut day = self.day.lock();
            match day.trading_date {
                None => {
                    day.trading_date = Some(snapshot.trading_date);
                    None
                }
                Some(existing) => Some(existing),
            }
        };
        match locked {
            None => {
                self.gate.set_trading_date(Some(snapshot.trading_date));
                info!("trading date locked: {}", snapshot.trading_date);
                self.journal.submit(
                    LogEvent::engine(
                        EventKind::TradingDateLocked,
                        format!("trading date locked: {}", snapshot.trading_date),
                    )
                    .with("trading_date", snapshot.trading_date.to_string()),
                );
            }
            Some(existing) if existing != snapshot.trading_date => {
                warn!(
                    "timetable declares trading date {} but {} is locked; keeping {}",
                    snapshot.trading_date, existing, existing
                );
                self.journal.submit(
                    LogEvent::engine(
                        EventKind::TradingDateMismatch,
                        format!(
                            "timetable declares {} but {} is locked",
                            snapshot.trading_date, existing
                        ),
                    )
                    .with("declared", snapshot.trading_date.to_string())
                    .with("locked", existing.to_string()),
                );
            }
            Some(_) => {}
        }
    }

    fn handle_timetable_error(&self, err: TimetableError, now: DateTime<Utc>) {
        self.journal.submit(
            LogEvent::engine(EventKind::TimetableRejected, err.to_string())
                .from_source(EventSource::Timetable),
        );
        self.stand_down(&err.to_string(), now);
    }

    /// Fail-closed reset: clear the registry and the trading date, halt
    /// trading until the next successful reconciliation. Edge-triggered so a
    /// persistently broken timetable does not re-alert every poll.
    fn stand_down(&self, reason: &str, now: DateTime<Utc>) {
        let first = {
            let mut day = self.day.lock();
            let first = !day.standing_down;
            day.standing_down = true;
            day.trading_date = None;
            day.fingerprint = None;
            first
        };
        self.registry.lock().clear();
        self.gate.set_trading_date(None);

        if first {
            error!("stand-down: {}; all streams cleared, trading halted", reason);
            self.journal.submit(LogEvent::engine(
                EventKind::StandDown,
                format!("stand-down: {}; all streams cleared, trading halted", reason),
            ));
            self.gate
                .report_critical(EventKind::FailClosedEntered, json!({ "reason": reason }), now);
        }
    }

    fn reject_bar(&self, bar: &Bar, reason: &str, detail: &str) {
        self.journal.submit(
            LogEvent::engine(
                EventKind::BarRejected,
                format!("bar rejected ({}): {}", reason, detail),
            )
            .with_instrument(&bar.instrument)
            .with("reason", reason)
            .with("bar_timestamp", bar.timestamp.to_rfc3339()),
        );
    }

    fn build_summary(&self, now: DateTime<Utc>) -> ExecutionSummary {
        let (trading_date, fingerprint) = {
            let day = self.day.lock();
            (day.trading_date, day.fingerprint.clone())
        };
        ExecutionSummary {
            run_id: self.run_id.clone(),
            mode: self.cfg.app.mode,
            trading_date,
            timetable_fingerprint: fingerprint,
            generated_at: now,
            streams: self.registry.lock().summaries(),
        }
    }

    /// One startup banner so an operator can see at a glance what this run
    /// is authorized to do.
    fn emit_banner(&self) {
        let (streams, instruments) = {
            let registry = self.registry.lock();
            (registry.ids_sorted(), registry.instruments_sorted())
        };
        let (trading_date, fingerprint) = {
            let day = self.day.lock();
            (day.trading_date, day.fingerprint.clone())
        };
        let account = self
            .adapter
            .lock()
            .as_ref()
            .map(|a| a.account_label().to_string())
            .unwrap_or_default();
        let fingerprint = fingerprint.unwrap_or_default();
        let short_fp = &fingerprint[..12.min(fingerprint.len())];

        info!(
            "=== daybreak {} | mode={} account={} date={} timetable={} streams=[{}] instruments=[{}] spec={} kill_switch={} monitor=armed ===",
            self.run_id,
            self.cfg.app.mode,
            account,
            trading_date.map(|d| d.to_string()).unwrap_or_default(),
            short_fp,
            streams.join(","),
            instruments.join(","),
            self.spec.identity(),
            self.spec.policy.kill_switch_enabled,
        );
        self.journal.submit(
            LogEvent::engine(EventKind::StartupBanner, "startup banner emitted")
                .with("run_id", self.run_id.as_str())
                .with("mode", self.cfg.app.mode.as_str())
                .with("account", account)
                .with(
                    "trading_date",
                    trading_date.map(|d| d.to_string()).unwrap_or_default(),
                )
                .with("timetable_fingerprint", fingerprint.as_str())
                .with("streams", streams)
                .with("instruments", instruments)
                .with("spec", self.spec.identity())
                .with("kill_switch_enabled", self.spec.policy.kill_switch_enabled)
                .with("incident_monitor", "armed"),
        );
    }
}

impl MarketEvents for Engine {
    fn on_connection_status(&self, status: ConnectionStatus, now: DateTime<Utc>) {
        Engine::on_connection_status(self, status, now);
    }
    fn on_bar(&self, bar: &Bar, now: DateTime<Utc>) {
        Engine::on_bar(self, bar, now);
    }
    fn on_tick(&self, now: DateTime<Utc>) {
        Engine::tick(self, now);
    }
}
