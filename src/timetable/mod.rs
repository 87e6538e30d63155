//! Timetable document model and structural validation.
//!
//! The timetable is a polled JSON file declaring the trading date, the
//! exchange zone and the day's stream directives. Change detection is a
//! sha256 fingerprint over the raw bytes; any structural error is fail-closed
//! and puts the engine into stand-down.

pub mod poller;
pub mod reconciler;

use std::path::PathBuf;

use chrono::NaiveDate;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use poller::{PollOutcome, TimetablePoller};
pub use reconciler::{ReconcileSummary, SkipReason, reconcile};

/// Structural timetable errors. Every variant triggers stand-down.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimetableError {
    #[error("timetable file missing: {0}")]
    MissingFile(PathBuf),

    #[error("timetable parse error: {0}")]
    Parse(String),

    #[error("timetable timezone invalid or foreign: {0}")]
    BadTimezone(String),

    #[error("timetable trading date missing or unparsable: {0}")]
    BadTradingDate(String),
}

/// One timetable entry describing a desired stream configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDirective {
    pub stream_id: String,
    pub instrument: String,
    pub session: String,
    pub slot_time: String,
    pub enabled: bool,
}

/// A structurally valid timetable load.
#[derive(Debug, Clone)]
pub struct TimetableSnapshot {
    /// Hex sha256 of the raw document bytes
    pub fingerprint: String,
    pub trading_date: NaiveDate,
    pub timezone: chrono_tz::Tz,
    pub replay: bool,
    pub directives: Vec<StreamDirective>,
}

#[derive(Debug, Deserialize)]
struct RawTimetable {
    #[serde(default)]
    trading_date: Option<String>,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    metadata: RawMetadata,
    #[serde(default)]
    streams: Vec<RawDirective>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    replay: bool,
}

#[derive(Debug, Deserialize)]
struct RawDirective {
    #[serde(default)]
    stream: String,
    #[serde(default)]
    instrument: String,
    #[serde(default)]
    session: String,
    #[serde(default)]
    slot_time: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Parse and structurally validate a raw timetable document. The declared
/// zone must name a real IANA zone and match the configured exchange zone.
pub fn parse_timetable(
    bytes: &[u8],
    expected_tz: chrono_tz::Tz,
) -> Result<TimetableSnapshot, TimetableError> {
    let raw: RawTimetable =
        serde_json::from_slice(bytes).map_err(|e| TimetableError::Parse(e.to_string()))?;

    let date_str = raw
        .trading_date
        .ok_or_else(|| TimetableError::BadTradingDate("<missing>".into()))?;
    let trading_date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
        .map_err(|_| TimetableError::BadTradingDate(date_str.clone()))?;

    let tz_str = raw
        .timezone
        .ok_or_else(|| TimetableError::BadTimezone("<missing>".into()))?;
    let timezone: chrono_tz::Tz = tz_str
        .parse()
        .map_err(|_| TimetableError::BadTimezone(tz_str.clone()))?;
    if timezone != expected_tz {
        return Err(TimetableError::BadTimezone(format!(
            "{} (engine expects {})",
            tz_str, expected_tz
        )));
    }

    let directives = raw
        .streams
        .into_iter()
        .map(|d| StreamDirective {
            stream_id: d.stream,
            instrument: d.instrument,
            session: d.session,
            slot_time: d.slot_time,
            enabled: d.enabled,
        })
        .collect();

    Ok(TimetableSnapshot {
        fingerprint: fingerprint(bytes),
        trading_date,
        timezone,
        replay: raw.metadata.replay,
        directives,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TZ: chrono_tz::Tz = chrono_tz::Europe::Berlin;

    fn doc(date: &str, tz: &str) -> String {
        format!(
            r#"{{"trading_date": "{date}", "timezone": "{tz}",
                "streams": [{{"stream": "s1", "instrument": "FDAX",
                              "session": "morning", "slot_time": "10:30"}}]}}"#
        )
    }

    #[test]
    fn parses_valid_document() {
        let snapshot = parse_timetable(doc("2026-08-06", "Europe/Berlin").as_bytes(), TZ).unwrap();
        assert_eq!(
            snapshot.trading_date,
            NaiveDate::from_ymd_opt(2026, 8, 6).unwrap()
        );
        assert_eq!(snapshot.directives.len(), 1);
        assert!(snapshot.directives[0].enabled);
        assert!(!snapshot.replay);
        assert_eq!(snapshot.fingerprint.len(), 64);
    }

    #[test]
    fn rejects_foreign_timezone() {
        let err = parse_timetable(doc("2026-08-06", "America/Chicago").as_bytes(), TZ).unwrap_err();
        assert!(matches!(err, TimetableError::BadTimezone(_)));
    }

    #[test]
    fn rejects_unknown_timezone_name() {
        let err = parse_timetable(doc("2026-08-06", "Mars/Olympus").as_bytes(), TZ).unwrap_err();
        assert!(matches!(err, TimetableError::BadTimezone(_)));
    }

    #[test]
    fn rejects_missing_or_bad_trading_date() {
        let err = parse_timetable(br#"{"timezone": "Europe/Berlin"}"#, TZ).unwrap_err();
        assert!(matches!(err, TimetableError::BadTradingDate(_)));

        let err = parse_timetable(doc("06.08.2026", "Europe/Berlin").as_bytes(), TZ).unwrap_err();
        assert!(matches!(err, TimetableError::BadTradingDate(_)));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = parse_timetable(b"{not json", TZ).unwrap_err();
        assert!(matches!(err, TimetableError::Parse(_)));
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = fingerprint(doc("2026-08-06", "Europe/Berlin").as_bytes());
        let b = fingerprint(doc("2026-08-07", "Europe/Berlin").as_bytes());
        assert_ne!(a, b);
    }
}
