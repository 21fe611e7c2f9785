//! Domain models - core door types and error taxonomy
//!
//! This module contains the canonical data types used throughout the system:
//! - `Position` - the three canonical door positions, in canonical order
//! - `SensorRole` - what a configured contact sensor is attached to
//! - `ContactReport`, `OccupancyReport` - typed decoding of inbound sensor payloads
//! - `MotionBinding` - webhook-only motion sensors
//! - `errors` - configuration, report, wait and verification errors

pub mod errors;
pub mod types;

// Re-export commonly used types at module level
pub use errors::{ConfigError, MalformedReport, ReportError, Transition, VerificationFailure, WaitError};
pub use types::{
    validate_bindings, validate_motion_bindings, ContactReport, MotionBinding, OccupancyReport, Position,
    SensorBinding, SensorRole,
};
