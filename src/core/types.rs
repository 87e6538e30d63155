use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument(pub String);

impl Instrument {
    pub fn new(s: impl Into<String>) -> Self { Self(s.into().to_uppercase()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl std::fmt::Display for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0) }
}

/// Execution mode. Live order routing is not enabled yet; startup in
/// `Live` mode fails fast with an emergency notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode { DryRun, Paper, Live }

impl ExecutionMode {
    pub fn is_dry_run(&self) -> bool { matches!(self, ExecutionMode::DryRun) }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::DryRun => "dryrun",
            ExecutionMode::Paper => "paper",
            ExecutionMode::Live => "live",
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.as_str()) }
}

/// Broker connectivity as reported by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus { Connected, Disconnected }

/// One closed bar as delivered by the market data feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub instrument: Instrument,
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

/// Notification priority. `Emergency` bypasses rate limiting and is
/// expected to reach the operator as a push notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority { Routine, High, Emergency }

impl Priority {
    /// Wire value for the notification sink (2 = emergency).
    pub fn as_u8(&self) -> u8 {
        match self {
            Priority::Routine => 0,
            Priority::High => 1,
            Priority::Emergency => 2,
        }
    }
}

/// Outbound operator notification, already past dedupe and rate limiting.
#[derive(Debug, Clone)]
pub struct Notification {
    pub key: String,
    pub title: String,
    pub message: String,
    pub priority: Priority,
}
