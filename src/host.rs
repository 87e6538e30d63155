//! Host capability seam.
//!
//! The trading platform calls into the engine by inversion of control. That
//! surface is one trait, so the platform-specific binding and the
//! deterministic replay binding below are interchangeable and the core can
//! run headless.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::core::{Bar, ConnectionStatus, Error, Instrument, Result};

/// Everything the host runtime delivers to the decision core.
pub trait MarketEvents: Send + Sync {
    fn on_connection_status(&self, status: ConnectionStatus, now: DateTime<Utc>);
    fn on_bar(&self, bar: &Bar, now: DateTime<Utc>);
    fn on_tick(&self, now: DateTime<Utc>);
}

#[derive(Debug, Deserialize)]
struct ReplayRecord {
    timestamp: DateTime<Utc>,
    instrument: String,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
}

/// Drives a `MarketEvents` impl from recorded bars. "Now" is derived from
/// each bar's close time, so a replay is reproducible run to run.
pub struct ReplayFeed {
    bars: Vec<Bar>,
    bar_period: Duration,
}

impl ReplayFeed {
    /// Load a JSONL file of bar records.
    pub fn from_jsonl(path: &Path, bar_period_secs: u64) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut bars = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let record: ReplayRecord = serde_json::from_str(line)
                .map_err(|e| Error::Config(format!("bad replay record: {}", e)))?;
            bars.push(Bar {
                instrument: Instrument::new(record.instrument),
                timestamp: record.timestamp,
                open: record.open,
                high: record.high,
                low: record.low,
                close: record.close,
            });
        }
        Ok(Self {
            bars,
            bar_period: Duration::seconds(bar_period_secs as i64),
        })
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Replay every bar in order: connect, then bar + tick per record, each
    /// stamped one bar period after its open so the bar counts as closed.
    pub fn run(&self, target: &dyn MarketEvents) {
        let Some(first) = self.bars.first() else {
            return;
        };
        target.on_connection_status(ConnectionStatus::Connected, first.timestamp);
        for bar in &self.bars {
            let now = bar.timestamp + self.bar_period;
            target.on_bar(bar, now);
            target.on_tick(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Capture {
        calls: Mutex<Vec<String>>,
    }

    impl MarketEvents for Capture {
        fn on_connection_status(&self, status: ConnectionStatus, _now: DateTime<Utc>) {
            self.calls.lock().push(format!("conn:{:?}", status));
        }
        fn on_bar(&self, bar: &Bar, now: DateTime<Utc>) {
            self.calls.lock().push(format!(
                "bar:{}@{}",
                bar.instrument,
                (now - bar.timestamp).num_seconds()
            ));
        }
        fn on_tick(&self, _now: DateTime<Utc>) {
            self.calls.lock().push("tick".into());
        }
    }

    #[test]
    fn replay_is_deterministic_and_stamps_closed_bars() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bars.jsonl");
        let ts = Utc.with_ymd_and_hms(2026, 8, 6, 8, 0, 0).unwrap();
        let lines: Vec<String> = (0..2)
            .map(|i| {
                format!(
                    r#"{{"timestamp": "{}", "instrument": "FDAX", "open": 24000, "high": 24010, "low": 23990, "close": 24005}}"#,
                    (ts + Duration::minutes(i)).to_rfc3339()
                )
            })
            .collect();
        std::fs::write(&path, lines.join("\n")).unwrap();

        let feed = ReplayFeed::from_jsonl(&path, 60).unwrap();
        assert_eq!(feed.len(), 2);

        let capture = Capture::default();
        feed.run(&capture);
        let calls = capture.calls.lock().clone();
        assert_eq!(
            calls,
            vec![
                "conn:Connected",
                "bar:FDAX@60",
                "tick",
                "bar:FDAX@60",
                "tick"
            ]
        );
    }

    #[test]
    fn malformed_replay_record_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bars.jsonl");
        std::fs::write(&path, "{nope").unwrap();
        assert!(matches!(
            ReplayFeed::from_jsonl(&path, 60),
            Err(Error::Config(_))
        ));
    }
}
