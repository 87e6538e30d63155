//! Stream registry: per-opportunity handles owned by the orchestrator.
//!
//! The breakout/range state machine itself is an external collaborator and
//! sits behind the `StreamLogic` seam; the core owns the handle's lifecycle
//! phase and the terminal committed flag.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::core::{Bar, Instrument};
use crate::timetable::StreamDirective;

/// Lifecycle phase of one opportunity stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamPhase {
    PreHydration,
    Armed,
    RangeBuilding,
    RangeLocked,
}

/// What the injected trading logic asks the core to do with the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicAction {
    Hold,
    Advance(StreamPhase),
    Commit,
}

/// Seam for the external per-opportunity state machine.
pub trait StreamLogic: Send {
    fn on_bar(&mut self, bar: &Bar, now: DateTime<Utc>) -> LogicAction;
    fn on_tick(&mut self, now: DateTime<Utc>) -> LogicAction;
}

/// Default logic that never advances. Used in dry runs and tests.
pub struct InertLogic;

impl StreamLogic for InertLogic {
    fn on_bar(&mut self, _bar: &Bar, _now: DateTime<Utc>) -> LogicAction {
        LogicAction::Hold
    }
    fn on_tick(&mut self, _now: DateTime<Utc>) -> LogicAction {
        LogicAction::Hold
    }
}

/// Builds the trading logic for a newly created stream.
pub trait LogicFactory: Send + Sync {
    fn build(&self, directive: &StreamDirective) -> Box<dyn StreamLogic>;
}

pub struct InertFactory;

impl LogicFactory for InertFactory {
    fn build(&self, _directive: &StreamDirective) -> Box<dyn StreamLogic> {
        Box::new(InertLogic)
    }
}

/// Snapshot of one handle for the execution summary artifact.
#[derive(Debug, Clone, Serialize)]
pub struct StreamSummary {
    pub id: String,
    pub instrument: String,
    pub session: String,
    pub slot_time: String,
    pub phase: StreamPhase,
    pub committed: bool,
}

/// One per-(instrument, session, slot_time) opportunity handle.
pub struct StreamHandle {
    pub id: String,
    pub instrument: Instrument,
    pub session: String,
    pub slot_time: String,
    phase: StreamPhase,
    committed: bool,
    logic: Box<dyn StreamLogic>,
}

impl StreamHandle {
    fn new(directive: &StreamDirective, logic: Box<dyn StreamLogic>) -> Self {
        Self {
            id: directive.stream_id.clone(),
            instrument: Instrument::new(&directive.instrument),
            session: directive.session.clone(),
            slot_time: directive.slot_time.clone(),
            phase: StreamPhase::PreHydration,
            committed: false,
            logic,
        }
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    /// A committed handle is terminal; no directive may mutate it again.
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Whether the stream is in an active trading phase. Drives the incident
    /// monitor's session-awareness.
    pub fn is_active(&self) -> bool {
        !self.committed
            && matches!(
                self.phase,
                StreamPhase::Armed | StreamPhase::RangeBuilding | StreamPhase::RangeLocked
            )
    }

    pub fn arm(&mut self) {
        if self.phase == StreamPhase::PreHydration {
            self.phase = StreamPhase::Armed;
        }
    }

    /// Apply an update directive. Caller must have checked `is_committed`.
    pub fn apply(&mut self, directive: &StreamDirective) {
        debug_assert!(!self.committed);
        self.instrument = Instrument::new(&directive.instrument);
        self.session = directive.session.clone();
        self.slot_time = directive.slot_time.clone();
    }

    pub fn handle_bar(&mut self, bar: &Bar, now: DateTime<Utc>) {
        if self.committed {
            return;
        }
        let action = self.logic.on_bar(bar, now);
        self.apply_action(action);
    }

    pub fn handle_tick(&mut self, now: DateTime<Utc>) {
        if self.committed {
            return;
        }
        let action = self.logic.on_tick(now);
        self.apply_action(action);
    }

    fn apply_action(&mut self, action: LogicAction) {
        match action {
            LogicAction::Hold => {}
            LogicAction::Advance(phase) => self.phase = phase,
            LogicAction::Commit => self.committed = true,
        }
    }

    #[cfg(test)]
    pub fn force_commit(&mut self) {
        self.committed = true;
    }

    pub fn summary(&self) -> StreamSummary {
        StreamSummary {
            id: self.id.clone(),
            instrument: self.instrument.as_str().to_string(),
            session: self.session.clone(),
            slot_time: self.slot_time.clone(),
            phase: self.phase,
            committed: self.committed,
        }
    }
}

/// Registry of stream handles, owned exclusively by the orchestrator.
pub struct StreamRegistry {
    streams: HashMap<String, StreamHandle>,
    factory: Box<dyn LogicFactory>,
}

impl StreamRegistry {
    pub fn new(factory: Box<dyn LogicFactory>) -> Self {
        Self {
            streams: HashMap::new(),
            factory,
        }
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&StreamHandle> {
        self.streams.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut StreamHandle> {
        self.streams.get_mut(id)
    }

    /// Create a handle for a validated directive and arm it immediately.
    pub fn create(&mut self, directive: &StreamDirective) {
        let logic = self.factory.build(directive);
        let mut handle = StreamHandle::new(directive, logic);
        handle.arm();
        self.streams.insert(directive.stream_id.clone(), handle);
    }

    /// Full reset. Used by stand-down.
    pub fn clear(&mut self) {
        self.streams.clear();
    }

    pub fn any_active(&self) -> bool {
        self.streams.values().any(|s| s.is_active())
    }

    pub fn tick_all(&mut self, now: DateTime<Utc>) {
        for handle in self.streams.values_mut() {
            handle.handle_tick(now);
        }
    }

    /// Route a bar to every handle trading the bar's instrument. Returns the
    /// number of handles reached.
    pub fn route_bar(&mut self, bar: &Bar, now: DateTime<Utc>) -> usize {
        let mut routed = 0;
        for handle in self
            .streams
            .values_mut()
            .filter(|h| h.instrument == bar.instrument)
        {
            handle.handle_bar(bar, now);
            routed += 1;
        }
        routed
    }

    pub fn ids_sorted(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.streams.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn instruments_sorted(&self) -> Vec<String> {
        let mut instruments: Vec<String> = self
            .streams
            .values()
            .map(|s| s.instrument.as_str().to_string())
            .collect();
        instruments.sort();
        instruments.dedup();
        instruments
    }

    pub fn summaries(&self) -> Vec<StreamSummary> {
        let mut summaries: Vec<StreamSummary> =
            self.streams.values().map(|s| s.summary()).collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }
}

/// Lets the incident monitor ask whether any stream is active without
/// owning the registry.
pub struct RegistryProbe(pub Arc<Mutex<StreamRegistry>>);

impl crate::monitor::ActivityProbe for RegistryProbe {
    fn any_stream_active(&self) -> bool {
        self.0.lock().any_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn directive(id: &str, instrument: &str) -> StreamDirective {
        StreamDirective {
            stream_id: id.to_string(),
            instrument: instrument.to_string(),
            session: "morning".to_string(),
            slot_time: "10:30".to_string(),
            enabled: true,
        }
    }

    fn bar(instrument: &str) -> Bar {
        Bar {
            instrument: Instrument::new(instrument),
            timestamp: Utc::now(),
            open: Decimal::from(100),
            high: Decimal::from(101),
            low: Decimal::from(99),
            close: Decimal::from(100),
        }
    }

    struct CommitOnBar;

    impl StreamLogic for CommitOnBar {
        fn on_bar(&mut self, _bar: &Bar, _now: DateTime<Utc>) -> LogicAction {
            LogicAction::Commit
        }
        fn on_tick(&mut self, _now: DateTime<Utc>) -> LogicAction {
            LogicAction::Hold
        }
    }

    struct CommitFactory;

    impl LogicFactory for CommitFactory {
        fn build(&self, _directive: &StreamDirective) -> Box<dyn StreamLogic> {
            Box::new(CommitOnBar)
        }
    }

    #[test]
    fn created_streams_are_armed_and_active() {
        let mut registry = StreamRegistry::new(Box::new(InertFactory));
        registry.create(&directive("s1", "FDAX"));
        assert_eq!(registry.get("s1").unwrap().phase(), StreamPhase::Armed);
        assert!(registry.any_active());
    }

    #[test]
    fn bars_route_by_instrument_only() {
        let mut registry = StreamRegistry::new(Box::new(InertFactory));
        registry.create(&directive("s1", "FDAX"));
        registry.create(&directive("s2", "FESX"));
        assert_eq!(registry.route_bar(&bar("FDAX"), Utc::now()), 1);
        assert_eq!(registry.route_bar(&bar("FGBL"), Utc::now()), 0);
    }

    #[test]
    fn committed_handle_is_terminal_and_inactive() {
        let mut registry = StreamRegistry::new(Box::new(CommitFactory));
        registry.create(&directive("s1", "FDAX"));
        registry.route_bar(&bar("FDAX"), Utc::now());
        let handle = registry.get("s1").unwrap();
        assert!(handle.is_committed());
        assert!(!handle.is_active());
        assert!(!registry.any_active());
    }
}
