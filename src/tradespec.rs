//! Trading spec collaborators: session table, instrument catalog, policy.
//!
//! Loaded once at startup and treated as read-only. Structural validation is
//! the loader's (serde's) responsibility; the core only performs key lookups.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::core::{Error, Result};

/// One trading session: where its range starts and which slot-end times a
/// timetable directive may legally reference. Times stay strings and are
/// matched exactly.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionDef {
    pub range_start: String,
    pub slot_ends: Vec<String>,
}

impl SessionDef {
    pub fn allows_slot(&self, slot_time: &str) -> bool {
        self.slot_ends.iter().any(|s| s == slot_time)
    }
}

/// Execution policy knobs the core reads for the banner and the summary.
/// Sizing itself happens in the excluded execution layer.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionPolicy {
    pub account_label: String,
    #[serde(default)]
    pub kill_switch_enabled: bool,
    #[serde(default = "default_risk_fraction")]
    pub risk_fraction: f64,
}

fn default_risk_fraction() -> f64 {
    0.01
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradeSpec {
    pub name: String,
    pub version: String,
    pub sessions: HashMap<String, SessionDef>,
    pub instruments: Vec<String>,
    pub policy: ExecutionPolicy,
}

impl TradeSpec {
    /// Load the spec from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read spec {}: {}", path.display(), e)))?;
        toml::from_str(&content).map_err(|e| Error::Config(format!("Failed to parse spec: {}", e)))
    }

    pub fn session(&self, name: &str) -> Option<&SessionDef> {
        self.sessions.get(name)
    }

    pub fn has_instrument(&self, instrument: &str) -> bool {
        self.instruments.iter().any(|i| i == instrument)
    }

    /// Identity string for the startup banner.
    pub fn identity(&self) -> String {
        format!("{} v{}", self.name, self.version)
    }
}

#[cfg(test)]
pub fn fixture() -> TradeSpec {
    let mut sessions = HashMap::new();
    sessions.insert(
        "morning".to_string(),
        SessionDef {
            range_start: "09:00".to_string(),
            slot_ends: vec!["10:00".to_string(), "10:30".to_string()],
        },
    );
    sessions.insert(
        "afternoon".to_string(),
        SessionDef {
            range_start: "14:00".to_string(),
            slot_ends: vec!["15:30".to_string()],
        },
    );
    TradeSpec {
        name: "breakout-eu".to_string(),
        version: "3".to_string(),
        sessions,
        instruments: vec!["FDAX".to_string(), "FESX".to_string()],
        policy: ExecutionPolicy {
            account_label: "sim-001".to_string(),
            kill_switch_enabled: true,
            risk_fraction: 0.01,
        },
    }
}
