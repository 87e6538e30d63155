//! Central configuration for the daybreak engine.
//!
//! Loads from `daybreak.toml`. All intervals and thresholds are
//! runtime-configurable; no recompilation needed.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::core::types::ExecutionMode;
use crate::core::{Error, Result};

/// Top-level config file structure.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub app: AppConfig,
    pub timetable: TimetableConfig,
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Execution mode: dryrun, paper or live (live is rejected at startup)
    pub mode: ExecutionMode,
    /// Path of the trading spec TOML (sessions, instruments, policy)
    pub spec_path: PathBuf,
    /// Where execution summaries are written on shutdown
    #[serde(default = "default_summaries_dir")]
    pub summaries_dir: PathBuf,
    /// Where the structured event journal is written
    #[serde(default = "default_journal_path")]
    pub journal_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimetableConfig {
    /// Path of the polled timetable document
    pub path: PathBuf,
    /// Seconds between timetable polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Seconds between forced reconciliations regardless of fingerprint
    #[serde(default = "default_force_reconcile")]
    pub force_reconcile_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    /// IANA zone of the exchange; timetables must declare the same zone
    pub timezone: String,
    /// Bar period; bars younger than this are partial and rejected
    #[serde(default = "default_bar_period")]
    pub bar_period_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Continuous disconnection beyond this is alert-worthy
    #[serde(default = "default_sustained_disconnect")]
    pub sustained_disconnect_secs: u64,
    /// Engine heartbeat silence beyond this is a stall
    #[serde(default = "default_engine_stall")]
    pub engine_stall_secs: u64,
    /// Timetable poll silence beyond this is a stall
    #[serde(default = "default_poll_stall")]
    pub poll_stall_secs: u64,
    /// Per-instrument bar silence beyond this is a stall
    #[serde(default = "default_data_stall")]
    pub data_stall_secs: u64,
    /// Period of the independent background evaluation loop
    #[serde(default = "default_eval_interval")]
    pub eval_interval_secs: u64,
    /// Policy switch: notify on per-instrument data stalls (default log-only,
    /// mitigated by per-stream gap tolerance)
    #[serde(default)]
    pub notify_on_data_stall: bool,
    /// Policy switch: notify on timetable poll stalls (default log-only)
    #[serde(default)]
    pub notify_on_poll_stall: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// Webhook receiving notification JSON; log-only when unset
    pub webhook_url: Option<String>,
    /// Per-key minimum interval for non-emergency notifications
    #[serde(default = "default_min_interval")]
    pub min_interval_secs: u64,
}

fn default_summaries_dir() -> PathBuf {
    PathBuf::from("summaries")
}
fn default_journal_path() -> PathBuf {
    PathBuf::from("journal/events.jsonl")
}
fn default_poll_interval() -> u64 {
    30
}
fn default_force_reconcile() -> u64 {
    300
}
fn default_bar_period() -> u64 {
    60
}
fn default_sustained_disconnect() -> u64 {
    60
}
fn default_engine_stall() -> u64 {
    30
}
fn default_poll_stall() -> u64 {
    120
}
fn default_data_stall() -> u64 {
    180
}
fn default_eval_interval() -> u64 {
    5
}
fn default_min_interval() -> u64 {
    300
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sustained_disconnect_secs: default_sustained_disconnect(),
            engine_stall_secs: default_engine_stall(),
            poll_stall_secs: default_poll_stall(),
            data_stall_secs: default_data_stall(),
            eval_interval_secs: default_eval_interval(),
            notify_on_data_stall: false,
            notify_on_poll_stall: false,
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            min_interval_secs: default_min_interval(),
        }
    }
}

impl EngineConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config {}: {}", path.display(), e)))?;

        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Parsed exchange time zone.
    pub fn exchange_tz(&self) -> Result<chrono_tz::Tz> {
        self.exchange
            .timezone
            .parse()
            .map_err(|_| Error::Config(format!("Unknown exchange timezone: {}", self.exchange.timezone)))
    }
}
