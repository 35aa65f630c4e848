//! Error types for the orchestration core.
//!
//! Referee-level problems (capacity timeouts, construction failures, panics)
//! never surface here: they degrade into a failed [`RefereeResult`]. Only
//! failures that abort a whole run or reject caller input are errors.
//!
//! [`RefereeResult`]: crate::referee::RefereeResult

use std::time::Duration;

use thiserror::Error;

use crate::referee::Phase;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, RefgateError>;

/// Top-level error returned by the engine, the stability selector and the
/// data validators.
#[derive(Error, Debug)]
pub enum RefgateError {
    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("stability trial {trial} failed: {reason}")]
    TrialFailed { trial: usize, reason: String },
}

/// Errors raised by [`WeightedCapacityPool`](crate::pool::WeightedCapacityPool).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("capacity pool is closed")]
    Closed,
}

/// Registry lookup and battery composition errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown referee: {0}")]
    UnknownReferee(String),

    #[error("unknown referee category: {0}")]
    UnknownCategory(String),

    #[error("referee already registered: {0}")]
    Duplicate(String),

    #[error("tri-gate requires exactly 3 referees, got {0}")]
    WrongBatterySize(usize),

    #[error("duplicate referee in battery: {0}")]
    RepeatedReferee(String),

    #[error("tri-gate referees must come from 3 distinct categories")]
    SharedCategory,
}

/// Engine lifecycle and per-run failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine is not running")]
    NotRunning,

    #[error("{phase} queue is full")]
    QueueFull { phase: Phase },

    #[error("{phase} phase timed out after {timeout:?}")]
    PhaseTimeout { phase: Phase, timeout: Duration },

    #[error("validation cancelled")]
    Cancelled,
}

/// Errors returned by a [`UiBroadcaster`](crate::broadcast::UiBroadcaster).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("broadcast failed: {0}")]
pub struct BroadcastError(pub String);

/// Configuration validation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },

    #[error("{field} must lie in (0, 1], got {value}")]
    OutOfUnitRange { field: &'static str, value: f64 },

    #[error("phase weights must be non-negative")]
    NegativeWeight,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_referee_message() {
        let err = RegistryError::UnknownReferee("Nope".into());
        assert_eq!(err.to_string(), "unknown referee: Nope");
    }

    #[test]
    fn registry_error_converts_transparently() {
        let err: RefgateError = RegistryError::UnknownReferee("X".into()).into();
        assert_eq!(err.to_string(), "unknown referee: X");
    }

    #[test]
    fn phase_timeout_mentions_phase() {
        let err = EngineError::PhaseTimeout {
            phase: Phase::Causality,
            timeout: Duration::from_secs(1),
        };
        assert!(err.to_string().contains("causality"));
    }
}
