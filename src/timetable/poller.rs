//! Interval-gated timetable file poller with content fingerprinting.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};

use super::{TimetableError, TimetableSnapshot, fingerprint, parse_timetable};

/// Outcome of one poll attempt.
#[derive(Debug)]
pub enum PollOutcome {
    /// The poll interval has not elapsed; nothing was read.
    NotDue,
    /// File read, content fingerprint identical to the last read.
    Unchanged,
    /// New content, structurally valid.
    Changed(TimetableSnapshot),
    /// New content, structurally invalid.
    Failed(TimetableError),
}

pub struct TimetablePoller {
    path: PathBuf,
    interval: Duration,
    expected_tz: chrono_tz::Tz,
    last_poll: Option<DateTime<Utc>>,
    last_fingerprint: Option<String>,
}

impl TimetablePoller {
    pub fn new(path: PathBuf, poll_interval_secs: u64, expected_tz: chrono_tz::Tz) -> Self {
        Self {
            path,
            interval: Duration::seconds(poll_interval_secs as i64),
            expected_tz,
            last_poll: None,
            last_fingerprint: None,
        }
    }

    /// Interval-gated poll. Identical content (even identical broken
    /// content) reports `Unchanged`, so a bad file fails once per edit, not
    /// once per interval.
    pub fn poll(&mut self, now: DateTime<Utc>) -> PollOutcome {
        if let Some(last) = self.last_poll {
            if now - last < self.interval {
                return PollOutcome::NotDue;
            }
        }
        self.read(now, false)
    }

    /// Poll ignoring both the interval gate and the fingerprint, so the
    /// caller can force a reconciliation over the current document.
    pub fn force_poll(&mut self, now: DateTime<Utc>) -> PollOutcome {
        self.read(now, true)
    }

    fn read(&mut self, now: DateTime<Utc>, force: bool) -> PollOutcome {
        self.last_poll = Some(now);

        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(_) => {
                self.last_fingerprint = None;
                return PollOutcome::Failed(TimetableError::MissingFile(self.path.clone()));
            }
        };

        let fp = fingerprint(&bytes);
        if !force && self.last_fingerprint.as_deref() == Some(fp.as_str()) {
            return PollOutcome::Unchanged;
        }
        self.last_fingerprint = Some(fp);

        match parse_timetable(&bytes, self.expected_tz) {
            Ok(snapshot) => PollOutcome::Changed(snapshot),
            Err(err) => PollOutcome::Failed(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const TZ: chrono_tz::Tz = chrono_tz::Europe::Berlin;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_770_000_000 + secs, 0).unwrap()
    }

    fn valid_doc(date: &str) -> String {
        format!(r#"{{"trading_date": "{date}", "timezone": "Europe/Berlin", "streams": []}}"#)
    }

    #[test]
    fn gates_on_interval_and_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timetable.json");
        std::fs::write(&path, valid_doc("2026-08-06")).unwrap();

        let mut poller = TimetablePoller::new(path.clone(), 30, TZ);
        assert!(matches!(poller.poll(t(0)), PollOutcome::Changed(_)));
        assert!(matches!(poller.poll(t(10)), PollOutcome::NotDue));
        assert!(matches!(poller.poll(t(30)), PollOutcome::Unchanged));

        std::fs::write(&path, valid_doc("2026-08-07")).unwrap();
        match poller.poll(t(60)) {
            PollOutcome::Changed(snapshot) => {
                assert_eq!(snapshot.trading_date.to_string(), "2026-08-07")
            }
            other => panic!("expected Changed, got {:?}", other),
        }
    }

    #[test]
    fn broken_content_fails_once_then_reports_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timetable.json");
        std::fs::write(&path, "{broken").unwrap();

        let mut poller = TimetablePoller::new(path, 30, TZ);
        assert!(matches!(
            poller.poll(t(0)),
            PollOutcome::Failed(TimetableError::Parse(_))
        ));
        assert!(matches!(poller.poll(t(30)), PollOutcome::Unchanged));
        // a forced poll re-parses and re-reports the failure
        assert!(matches!(
            poller.force_poll(t(31)),
            PollOutcome::Failed(TimetableError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_a_structural_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let mut poller = TimetablePoller::new(path, 30, TZ);
        assert!(matches!(
            poller.poll(t(0)),
            PollOutcome::Failed(TimetableError::MissingFile(_))
        ));
    }

    #[test]
    fn force_poll_rereads_identical_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timetable.json");
        std::fs::write(&path, valid_doc("2026-08-06")).unwrap();

        let mut poller = TimetablePoller::new(path, 30, TZ);
        assert!(matches!(poller.poll(t(0)), PollOutcome::Changed(_)));
        assert!(matches!(poller.force_poll(t(1)), PollOutcome::Changed(_)));
    }
}
