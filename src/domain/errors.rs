//! Error taxonomy for the door controller
//!
//! Only `ConfigError` is fatal. Everything else is recovered where it occurs
//! and surfaces through logs or an `ActionReport`.

use crate::domain::types::Position;
use std::time::Duration;
use thiserror::Error;

/// Inconsistent or missing configuration; the process must not start
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("expected {expected} door position sensors, got {actual}")]
    SensorCount { expected: usize, actual: usize },
    #[error("position {0} must be bound to exactly one sensor, got {1}")]
    PositionBinding(Position, usize),
    #[error("topic '{0}' is bound to more than one sensor")]
    DuplicateTopic(String),
    #[error("{name} must be within {min}..={max}, got {value}")]
    OutOfRange { name: &'static str, min: f64, max: f64, value: f64 },
    #[error("invalid time of day '{0}', expected HH:MM")]
    InvalidTimeOfDay(String),
}

/// Bad payload shape or type on an inbound sensor report
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MalformedReport {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("payload is a JSON {0}, expected an object")]
    NotAnObject(&'static str),
    #[error("field 'contact' must be a bool, got {0}")]
    InvalidContact(&'static str),
    #[error("field 'occupancy' must be a bool, got {0}")]
    InvalidOccupancy(&'static str),
}

/// Reasons an inbound report was dropped without touching sensor state
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReportError {
    #[error("no sensor bound to topic '{0}'")]
    UnknownTopic(String),
    #[error("malformed report on '{topic}': {source}")]
    Malformed { topic: String, source: MalformedReport },
}

/// Direction of an awaited transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Enter,
    Exit,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Enter => "enter",
            Transition::Exit => "exit",
        }
    }
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An enter/exit wait that did not observe the expected change
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WaitError {
    /// Enter requested while the door is already there; the transition cannot be observed.
    #[error("door already at {0}")]
    AlreadyAt(Position),
    /// Exit requested while the door is not there.
    #[error("door not at {0}")]
    NotAt(Position),
    #[error("door did not {transition} {position} within {timeout:?}")]
    Timeout { position: Position, transition: Transition, timeout: Duration },
    /// The sensor reported, but not the value the transition needs.
    #[error("sensor at {position} reported, but the door did not {transition} it")]
    Spurious { position: Position, transition: Transition },
    #[error("notification channel for {0} closed")]
    Closed(Position),
}

impl WaitError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::Timeout { .. })
    }
}

/// Final position assertion of an action did not hold
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum VerificationFailure {
    #[error("expected door to be at {0}")]
    ExpectedAt(Position),
    #[error("expected door to not be at {0}")]
    ExpectedNotAt(Position),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = WaitError::Timeout {
            position: Position::Ajar,
            transition: Transition::Enter,
            timeout: Duration::from_secs(2),
        };
        assert_eq!(err.to_string(), "door did not enter AJAR within 2s");
        assert!(err.is_timeout());
        assert!(!WaitError::AlreadyAt(Position::Ajar).is_timeout());

        let err = ReportError::Malformed {
            topic: "zigbee2mqtt/garage".to_string(),
            source: MalformedReport::NotAnObject("array"),
        };
        assert_eq!(
            err.to_string(),
            "malformed report on 'zigbee2mqtt/garage': payload is a JSON array, expected an object"
        );
    }
}
