//! Error handling - fail-closed taxonomy for the decision core

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Daybreak error hierarchy.
///
/// Only structural problems surface as errors. Per-directive validation
/// failures are skip reasons, temporal violations on the bar path are
/// journal events, and incident conditions are latched monitor state.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors (engine config, trading spec, policy)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Structural timetable errors (trigger stand-down)
    #[error("Timetable error: {0}")]
    Timetable(#[from] crate::timetable::TimetableError),

    /// Invalid lifecycle state for the requested operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Filesystem errors (summary artifact, journal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
