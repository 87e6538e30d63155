//! Timetable-to-stream reconciliation.
//!
//! Fail-closed per directive: the first invalid field skips the whole
//! directive with a reason code and never partially mutates a stream.

use std::collections::HashMap;

use serde::Serialize;

use super::{StreamDirective, TimetableSnapshot};
use crate::events::{EventKind, EventSource, LogEvent};
use crate::journal::EventSink;
use crate::stream::StreamRegistry;
use crate::tradespec::TradeSpec;

/// Why a directive was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    MissingFields,
    UnknownSession,
    InvalidSlotTime,
    UnknownInstrument,
    EmptySlotTime,
    UpdateIgnoredCommitted,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::MissingFields => "MISSING_FIELDS",
            SkipReason::UnknownSession => "UNKNOWN_SESSION",
            SkipReason::InvalidSlotTime => "INVALID_SLOT_TIME",
            SkipReason::UnknownInstrument => "UNKNOWN_INSTRUMENT",
            SkipReason::EmptySlotTime => "EMPTY_SLOT_TIME",
            SkipReason::UpdateIgnoredCommitted => "UPDATE_IGNORED_COMMITTED",
        };
        write!(f, "{}", s)
    }
}

/// Aggregate outcome of one reconciliation pass.
#[derive(Debug, Default, Clone)]
pub struct ReconcileSummary {
    pub accepted: usize,
    pub skipped: HashMap<SkipReason, usize>,
    pub stream_count: usize,
}

impl ReconcileSummary {
    pub fn skipped_for(&self, reason: SkipReason) -> usize {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }

    fn record_skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_insert(0) += 1;
    }
}

/// Validate a directive against the trading spec. Field order matters: the
/// first failure wins and the directive is dropped whole.
fn validate(directive: &StreamDirective, spec: &TradeSpec) -> Option<SkipReason> {
    if directive.stream_id.is_empty()
        || directive.instrument.is_empty()
        || directive.session.is_empty()
    {
        return Some(SkipReason::MissingFields);
    }
    let Some(session) = spec.session(&directive.session) else {
        return Some(SkipReason::UnknownSession);
    };
    if !directive.slot_time.is_empty() && !session.allows_slot(&directive.slot_time) {
        return Some(SkipReason::InvalidSlotTime);
    }
    if !spec.has_instrument(&directive.instrument) {
        return Some(SkipReason::UnknownInstrument);
    }
    None
}

/// Apply a structurally valid snapshot to the stream registry.
///
/// Duplicate stream ids within the snapshot are logged once with their
/// occurrence count; processing order means the last occurrence wins.
pub fn reconcile(
    snapshot: &TimetableSnapshot,
    registry: &mut StreamRegistry,
    spec: &TradeSpec,
    journal: &dyn EventSink,
) -> ReconcileSummary {
    let mut summary = ReconcileSummary::default();

    let mut occurrences: HashMap<&str, usize> = HashMap::new();
    for directive in snapshot.directives.iter().filter(|d| d.enabled) {
        if !directive.stream_id.is_empty() {
            *occurrences.entry(directive.stream_id.as_str()).or_insert(0) += 1;
        }
    }
    for (id, count) in occurrences.iter().filter(|(_, c)| **c > 1) {
        journal.submit(
            LogEvent::engine(
                EventKind::DuplicateStreamId,
                format!("stream id {} appears {} times in timetable", id, count),
            )
            .from_source(EventSource::Timetable)
            .with("stream_id", *id)
            .with("occurrence_count", *count as u64),
        );
    }

    for directive in snapshot.directives.iter().filter(|d| d.enabled) {
        match apply_directive(directive, registry, spec, journal) {
            Ok(()) => summary.accepted += 1,
            Err(reason) => {
                summary.record_skip(reason);
                journal.submit(
                    LogEvent::engine(
                        EventKind::DirectiveSkipped,
                        format!("directive {} skipped: {}", directive.stream_id, reason),
                    )
                    .from_source(EventSource::Timetable)
                    .with("stream_id", directive.stream_id.as_str())
                    .with("reason", reason.to_string()),
                );
            }
        }
    }

    summary.stream_count = registry.len();
    journal.submit(summary_event(&summary, snapshot));
    summary
}

fn apply_directive(
    directive: &StreamDirective,
    registry: &mut StreamRegistry,
    spec: &TradeSpec,
    journal: &dyn EventSink,
) -> Result<(), SkipReason> {
    if let Some(reason) = validate(directive, spec) {
        return Err(reason);
    }

    let existing = registry
        .get(&directive.stream_id)
        .map(|handle| handle.is_committed());
    match existing {
        None => {
            if directive.slot_time.is_empty() {
                return Err(SkipReason::EmptySlotTime);
            }
            registry.create(directive);
            if let Some(handle) = registry.get(&directive.stream_id) {
                journal.submit(LogEvent::stream(
                    EventKind::StreamCreated,
                    &handle.instrument,
                    &handle.id,
                    format!(
                        "stream {} armed for {} {}/{}",
                        handle.id, handle.instrument, handle.session, handle.slot_time
                    ),
                ));
            }
            Ok(())
        }
        Some(true) => Err(SkipReason::UpdateIgnoredCommitted),
        Some(false) => {
            if directive.slot_time.is_empty() {
                return Err(SkipReason::EmptySlotTime);
            }
            if let Some(handle) = registry.get_mut(&directive.stream_id) {
                handle.apply(directive);
                journal.submit(LogEvent::stream(
                    EventKind::StreamUpdated,
                    &handle.instrument,
                    &handle.id,
                    format!("stream {} updated to slot {}", handle.id, handle.slot_time),
                ));
            }
            Ok(())
        }
    }
}

fn summary_event(summary: &ReconcileSummary, snapshot: &TimetableSnapshot) -> LogEvent {
    let mut event = LogEvent::engine(
        EventKind::ReconcileSummary,
        format!(
            "reconciled timetable {}: {} accepted, {} skipped, {} streams",
            &snapshot.fingerprint[..12.min(snapshot.fingerprint.len())],
            summary.accepted,
            summary.skipped.values().sum::<usize>(),
            summary.stream_count
        ),
    )
    .from_source(EventSource::Timetable)
    .with("fingerprint", snapshot.fingerprint.as_str())
    .with("accepted", summary.accepted as u64)
    .with("stream_count", summary.stream_count as u64);
    for (reason, count) in &summary.skipped {
        event = event.with(&reason.to_string(), *count as u64);
    }
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::CollectSink;
    use crate::stream::InertFactory;
    use crate::timetable::parse_timetable;
    use crate::tradespec;

    const TZ: chrono_tz::Tz = chrono_tz::Europe::Berlin;

    fn snapshot(streams_json: &str) -> TimetableSnapshot {
        let doc = format!(
            r#"{{"trading_date": "2026-08-06", "timezone": "Europe/Berlin", "streams": {streams_json}}}"#
        );
        parse_timetable(doc.as_bytes(), TZ).unwrap()
    }

    fn registry() -> StreamRegistry {
        StreamRegistry::new(Box::new(InertFactory))
    }

    #[test]
    fn creates_and_arms_valid_directives() {
        let snap = snapshot(
            r#"[{"stream": "s1", "instrument": "FDAX", "session": "morning", "slot_time": "10:30"}]"#,
        );
        let mut reg = registry();
        let sink = CollectSink::new();
        let summary = reconcile(&snap, &mut reg, &tradespec::fixture(), sink.as_ref());
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.stream_count, 1);
        assert!(reg.get("s1").unwrap().is_active());
        assert_eq!(sink.count(EventKind::StreamCreated), 1);
    }

    #[test]
    fn invalid_slot_time_never_creates_a_stream() {
        let snap = snapshot(
            r#"[{"stream": "s1", "instrument": "FDAX", "session": "morning", "slot_time": "11:45"}]"#,
        );
        let mut reg = registry();
        let sink = CollectSink::new();
        let summary = reconcile(&snap, &mut reg, &tradespec::fixture(), sink.as_ref());
        assert_eq!(summary.accepted, 0);
        assert_eq!(summary.skipped_for(SkipReason::InvalidSlotTime), 1);
        assert!(reg.is_empty());
    }

    #[test]
    fn validation_order_is_fields_session_slot_instrument() {
        let snap = snapshot(
            r#"[{"stream": "s1", "instrument": "", "session": "morning", "slot_time": "10:30"},
                {"stream": "s2", "instrument": "FDAX", "session": "lunch", "slot_time": "10:30"},
                {"stream": "s3", "instrument": "UNLISTED", "session": "morning", "slot_time": "10:30"}]"#,
        );
        let mut reg = registry();
        let sink = CollectSink::new();
        let summary = reconcile(&snap, &mut reg, &tradespec::fixture(), sink.as_ref());
        assert_eq!(summary.skipped_for(SkipReason::MissingFields), 1);
        assert_eq!(summary.skipped_for(SkipReason::UnknownSession), 1);
        assert_eq!(summary.skipped_for(SkipReason::UnknownInstrument), 1);
        assert!(reg.is_empty());
    }

    #[test]
    fn duplicate_ids_log_occurrences_and_last_wins() {
        let snap = snapshot(
            r#"[{"stream": "s1", "instrument": "FDAX", "session": "morning", "slot_time": "10:00"},
                {"stream": "s1", "instrument": "FDAX", "session": "morning", "slot_time": "10:30"}]"#,
        );
        let mut reg = registry();
        let sink = CollectSink::new();
        reconcile(&snap, &mut reg, &tradespec::fixture(), sink.as_ref());

        let dupes: Vec<_> = sink
            .events()
            .into_iter()
            .filter(|e| e.kind == EventKind::DuplicateStreamId)
            .collect();
        assert_eq!(dupes.len(), 1);
        assert_eq!(dupes[0].data["occurrence_count"], 2);
        assert_eq!(reg.get("s1").unwrap().slot_time, "10:30");
    }

    #[test]
    fn committed_streams_ignore_updates() {
        let snap = snapshot(
            r#"[{"stream": "s1", "instrument": "FDAX", "session": "morning", "slot_time": "10:00"}]"#,
        );
        let mut reg = registry();
        let sink = CollectSink::new();
        reconcile(&snap, &mut reg, &tradespec::fixture(), sink.as_ref());
        reg.get_mut("s1").unwrap().force_commit();

        let update = snapshot(
            r#"[{"stream": "s1", "instrument": "FDAX", "session": "morning", "slot_time": "10:30"}]"#,
        );
        let summary = reconcile(&update, &mut reg, &tradespec::fixture(), sink.as_ref());
        assert_eq!(summary.skipped_for(SkipReason::UpdateIgnoredCommitted), 1);
        assert_eq!(reg.get("s1").unwrap().slot_time, "10:00");
    }

    #[test]
    fn empty_slot_time_skips_create_and_update() {
        let create = snapshot(
            r#"[{"stream": "s1", "instrument": "FDAX", "session": "morning", "slot_time": ""}]"#,
        );
        let mut reg = registry();
        let sink = CollectSink::new();
        let summary = reconcile(&create, &mut reg, &tradespec::fixture(), sink.as_ref());
        assert_eq!(summary.skipped_for(SkipReason::EmptySlotTime), 1);
        assert!(reg.is_empty());

        let seed = snapshot(
            r#"[{"stream": "s1", "instrument": "FDAX", "session": "morning", "slot_time": "10:00"}]"#,
        );
        reconcile(&seed, &mut reg, &tradespec::fixture(), sink.as_ref());
        let summary = reconcile(&create, &mut reg, &tradespec::fixture(), sink.as_ref());
        assert_eq!(summary.skipped_for(SkipReason::EmptySlotTime), 1);
        assert_eq!(reg.get("s1").unwrap().slot_time, "10:00");
    }

    #[test]
    fn disabled_directives_are_not_processed() {
        let snap = snapshot(
            r#"[{"stream": "s1", "instrument": "FDAX", "session": "morning", "slot_time": "10:30", "enabled": false}]"#,
        );
        let mut reg = registry();
        let sink = CollectSink::new();
        let summary = reconcile(&snap, &mut reg, &tradespec::fixture(), sink.as_ref());
        assert_eq!(summary.accepted, 0);
        assert!(summary.skipped.is_empty());
        assert!(reg.is_empty());
    }

    #[test]
    fn reconcile_is_idempotent_over_identical_snapshots() {
        let snap = snapshot(
            r#"[{"stream": "s1", "instrument": "FDAX", "session": "morning", "slot_time": "10:30"},
                {"stream": "s2", "instrument": "FESX", "session": "afternoon", "slot_time": "15:30"}]"#,
        );
        let mut reg = registry();
        let sink = CollectSink::new();
        let first = reconcile(&snap, &mut reg, &tradespec::fixture(), sink.as_ref());
        let ids_after_first = reg.ids_sorted();
        let second = reconcile(&snap, &mut reg, &tradespec::fixture(), sink.as_ref());
        assert_eq!(first.stream_count, second.stream_count);
        assert_eq!(ids_after_first, reg.ids_sorted());
        assert_eq!(reg.get("s1").unwrap().slot_time, "10:30");
    }
}
