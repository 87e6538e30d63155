//! Execution adapter seam and the shutdown summary artifact.
//!
//! Order placement itself lives outside the decision core; the adapter here
//! carries mode identity for the banner and the summary. Live trading is not
//! enabled and refuses to build.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::core::{Error, ExecutionMode, Result};
use crate::stream::StreamSummary;
use crate::tradespec::ExecutionPolicy;

pub trait ExecutionAdapter: Send + Sync + std::fmt::Debug {
    fn mode(&self) -> ExecutionMode;
    fn account_label(&self) -> &str;
}

/// No orders leave the process; nothing is persisted on shutdown.
#[derive(Debug)]
pub struct DryRunAdapter {
    account: String,
}

impl ExecutionAdapter for DryRunAdapter {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::DryRun
    }
    fn account_label(&self) -> &str {
        &self.account
    }
}

/// Simulated fills against a paper account; writes a summary on shutdown.
#[derive(Debug)]
pub struct PaperAdapter {
    account: String,
}

impl ExecutionAdapter for PaperAdapter {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Paper
    }
    fn account_label(&self) -> &str {
        &self.account
    }
}

pub fn build_adapter(
    mode: ExecutionMode,
    policy: &ExecutionPolicy,
) -> Result<Box<dyn ExecutionAdapter>> {
    match mode {
        ExecutionMode::DryRun => Ok(Box::new(DryRunAdapter {
            account: policy.account_label.clone(),
        })),
        ExecutionMode::Paper => Ok(Box::new(PaperAdapter {
            account: policy.account_label.clone(),
        })),
        ExecutionMode::Live => Err(Error::InvalidState(
            "live execution mode is not enabled in this build; refusing to start".into(),
        )),
    }
}

/// Snapshot persisted to the summaries directory on non-dry-run shutdown.
#[derive(Debug, Serialize)]
pub struct ExecutionSummary {
    pub run_id: String,
    pub mode: ExecutionMode,
    pub trading_date: Option<NaiveDate>,
    pub timetable_fingerprint: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub streams: Vec<StreamSummary>,
}

/// Serialize the summary to a timestamped file, creating the directory.
pub fn write_summary(dir: &Path, summary: &ExecutionSummary) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let filename = format!(
        "execution-summary-{}.json",
        summary.generated_at.format("%Y%m%d-%H%M%S")
    );
    let path = dir.join(filename);
    std::fs::write(&path, serde_json::to_string_pretty(summary)?)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tradespec;
    use chrono::TimeZone;

    #[test]
    fn live_mode_refuses_to_build() {
        let err = build_adapter(ExecutionMode::Live, &tradespec::fixture().policy).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn paper_adapter_carries_account_label() {
        let adapter = build_adapter(ExecutionMode::Paper, &tradespec::fixture().policy).unwrap();
        assert_eq!(adapter.mode(), ExecutionMode::Paper);
        assert_eq!(adapter.account_label(), "sim-001");
    }

    #[test]
    fn summary_lands_in_a_timestamped_file() {
        let dir = tempfile::tempdir().unwrap();
        let summary = ExecutionSummary {
            run_id: "run-1".into(),
            mode: ExecutionMode::Paper,
            trading_date: NaiveDate::from_ymd_opt(2026, 8, 6),
            timetable_fingerprint: Some("abc123".into()),
            generated_at: Utc.with_ymd_and_hms(2026, 8, 6, 17, 30, 0).unwrap(),
            streams: vec![],
        };
        let path = write_summary(&dir.path().join("summaries"), &summary).unwrap();
        assert!(
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("execution-summary-20260806-173000")
        );
        let content = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["mode"], "paper");
        assert_eq!(value["trading_date"], "2026-08-06");
    }
}
