//! Structured event model.
//!
//! Every rejection, skip and incident carries one of a closed set of kinds;
//! severity is a static table over that set. Events are tagged envelopes with
//! a fixed header and a structured data map, built through three constructors
//! matching the three event families: engine-level, stream-level and
//! execution-level.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::Instrument;

/// Closed set of journal event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    EngineStarted,
    StartupBanner,
    EngineStopped,
    StandDown,
    LiveModeRejected,
    TradingDateLocked,
    TradingDateMismatch,
    TimetableChanged,
    TimetableRejected,
    ReconcileSummary,
    DirectiveSkipped,
    DuplicateStreamId,
    StreamCreated,
    StreamUpdated,
    BarRouted,
    BarRejected,
    ConnectionLost,
    ConnectionRestored,
    SustainedDisconnect,
    EngineStall,
    PollStall,
    DataStall,
    StallRecovered,
    ExecutionInvariantViolation,
    FailClosedEntered,
    CriticalRejected,
    NotificationSuppressed,
    SummaryWritten,
    MonitorAbandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl EventKind {
    /// Static kind → severity table. Kinds without an explicit entry fall
    /// through to `Info` so logging stays fail-open.
    pub fn severity(self) -> Severity {
        use EventKind::*;
        match self {
            StandDown | LiveModeRejected | TimetableRejected | SustainedDisconnect | EngineStall
            | ExecutionInvariantViolation | FailClosedEntered => Severity::Error,
            TradingDateMismatch | DirectiveSkipped | DuplicateStreamId | BarRejected
            | ConnectionLost | PollStall | DataStall | CriticalRejected | MonitorAbandoned => {
                Severity::Warn
            }
            BarRouted | NotificationSuppressed => Severity::Debug,
            _ => Severity::Info,
        }
    }

    /// The two kinds allowed through the critical-event reporter.
    pub fn is_critical_alert(self) -> bool {
        matches!(
            self,
            EventKind::ExecutionInvariantViolation | EventKind::FailClosedEntered
        )
    }
}

/// Which subsystem emitted the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Engine,
    Stream,
    Execution,
    Timetable,
    Monitor,
}

/// Tagged event envelope: fixed header fields plus a structured data map.
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: Severity,
    pub source: EventSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instrument: Option<Instrument>,
    #[serde(rename = "event_type")]
    pub kind: EventKind,
    pub message: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

impl LogEvent {
    fn base(kind: EventKind, source: EventSource, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level: kind.severity(),
            source,
            instrument: None,
            kind,
            message: message.into(),
            data: Map::new(),
        }
    }

    /// Engine-level event (lifecycle, timetable, monitor plumbing).
    pub fn engine(kind: EventKind, message: impl Into<String>) -> Self {
        Self::base(kind, EventSource::Engine, message)
    }

    /// Stream-level event, keyed by instrument and stream id.
    pub fn stream(
        kind: EventKind,
        instrument: &Instrument,
        stream_id: &str,
        message: impl Into<String>,
    ) -> Self {
        let mut ev = Self::base(kind, EventSource::Stream, message);
        ev.instrument = Some(instrument.clone());
        ev.data
            .insert("stream_id".into(), Value::String(stream_id.to_string()));
        ev
    }

    /// Execution-level event (mode, summary artifact, invariants).
    pub fn execution(kind: EventKind, message: impl Into<String>) -> Self {
        Self::base(kind, EventSource::Execution, message)
    }

    /// Retag the emitting subsystem while keeping the event family shape.
    pub fn from_source(mut self, source: EventSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_instrument(mut self, instrument: &Instrument) -> Self {
        self.instrument = Some(instrument.clone());
        self
    }

    /// Attach one structured data field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_table_flags_fail_closed_kinds() {
        assert_eq!(EventKind::FailClosedEntered.severity(), Severity::Error);
        assert_eq!(EventKind::DirectiveSkipped.severity(), Severity::Warn);
        // unmapped kinds fall through to info, never panic
        assert_eq!(EventKind::StreamCreated.severity(), Severity::Info);
    }

    #[test]
    fn critical_whitelist_is_two_kinds() {
        let critical: Vec<EventKind> = [
            EventKind::ExecutionInvariantViolation,
            EventKind::FailClosedEntered,
            EventKind::StandDown,
            EventKind::EngineStall,
            EventKind::DataStall,
        ]
        .into_iter()
        .filter(|k| k.is_critical_alert())
        .collect();
        assert_eq!(
            critical,
            vec![
                EventKind::ExecutionInvariantViolation,
                EventKind::FailClosedEntered
            ]
        );
    }

    #[test]
    fn stream_events_carry_id_and_instrument() {
        let inst = Instrument::new("fdax");
        let ev = LogEvent::stream(EventKind::StreamCreated, &inst, "s1", "created")
            .with("slot_time", "10:30");
        assert_eq!(ev.instrument.as_ref().unwrap().as_str(), "FDAX");
        assert_eq!(ev.data["stream_id"], "s1");
        assert_eq!(ev.data["slot_time"], "10:30");
    }
}
