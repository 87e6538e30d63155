//! Daybreak - Core Library
//! Decision core of an unattended daily breakout trading robot

// Public modules
pub mod core;
pub mod engine;
pub mod events;
pub mod execution;
pub mod host;
pub mod journal;
pub mod monitor;
pub mod stream;
pub mod timetable;
pub mod tradespec;

// Re-exports
pub use crate::core::{EngineConfig, Error, Result};
pub use crate::engine::{Engine, EngineState};
