//! Shared types for the garage door controller

use crate::domain::errors::{ConfigError, MalformedReport};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Canonical door positions, in canonical order (closed -> ajar -> open).
///
/// The declaration order is load-bearing: `Position::ALL` is the tie-break
/// order used when more than one position sensor reports contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Position {
    FullyClosed,
    Ajar,
    FullyOpened,
}

impl Position {
    pub const ALL: [Position; 3] = [Position::FullyClosed, Position::Ajar, Position::FullyOpened];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Position::FullyClosed => 0,
            Position::Ajar => 1,
            Position::FullyOpened => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Position::FullyClosed => "FULLY_CLOSED",
            Position::Ajar => "AJAR",
            Position::FullyOpened => "FULLY_OPENED",
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Position {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "fully_closed" | "closed" => Ok(Position::FullyClosed),
            "ajar" | "slightly_opened" => Ok(Position::Ajar),
            "fully_opened" | "opened" | "open" => Ok(Position::FullyOpened),
            other => Err(format!("unknown position '{other}'")),
        }
    }
}

/// What a configured contact sensor is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorRole {
    FullyClosed,
    Ajar,
    FullyOpened,
    /// Unrelated contact sensor (e.g. a back-yard door). Tracked, never used for positioning.
    Auxiliary,
}

impl SensorRole {
    pub fn position(self) -> Option<Position> {
        match self {
            SensorRole::FullyClosed => Some(Position::FullyClosed),
            SensorRole::Ajar => Some(Position::Ajar),
            SensorRole::FullyOpened => Some(Position::FullyOpened),
            SensorRole::Auxiliary => None,
        }
    }
}

impl From<Position> for SensorRole {
    fn from(position: Position) -> Self {
        match position {
            Position::FullyClosed => SensorRole::FullyClosed,
            Position::Ajar => SensorRole::Ajar,
            Position::FullyOpened => SensorRole::FullyOpened,
        }
    }
}

/// Static binding of one contact sensor, as configured at startup
#[derive(Debug, Clone, PartialEq)]
pub struct SensorBinding {
    pub role: SensorRole,
    pub topic: String,
    pub nick_name: String,
    /// Invoked when a report says contact
    pub closed_webhook: Option<String>,
    /// Invoked when a report says no contact
    pub opened_webhook: Option<String>,
    /// Seeds the contact value at startup, as if reported then
    pub initial_state: Option<bool>,
}

impl SensorBinding {
    pub fn new(role: impl Into<SensorRole>, topic: impl Into<String>) -> Self {
        let topic = topic.into();
        Self {
            role: role.into(),
            nick_name: topic.clone(),
            topic,
            closed_webhook: None,
            opened_webhook: None,
            initial_state: None,
        }
    }

    pub fn with_nick_name(mut self, nick_name: impl Into<String>) -> Self {
        self.nick_name = nick_name.into();
        self
    }

    pub fn with_webhooks(mut self, closed: Option<String>, opened: Option<String>) -> Self {
        self.closed_webhook = closed;
        self.opened_webhook = opened;
        self
    }

    pub fn with_initial_state(mut self, is_contact: bool) -> Self {
        self.initial_state = Some(is_contact);
        self
    }

    /// Webhook to invoke for a reported contact value, if any
    pub fn webhook_for(&self, is_contact: bool) -> Option<&str> {
        if is_contact {
            self.closed_webhook.as_deref()
        } else {
            self.opened_webhook.as_deref()
        }
    }
}

/// Check that every canonical position is bound exactly once and topics are unique
pub fn validate_bindings(bindings: &[SensorBinding]) -> Result<(), ConfigError> {
    let door_count = bindings.iter().filter(|b| b.role.position().is_some()).count();
    if door_count != Position::ALL.len() {
        return Err(ConfigError::SensorCount { expected: Position::ALL.len(), actual: door_count });
    }

    for position in Position::ALL {
        let bound = bindings.iter().filter(|b| b.role.position() == Some(position)).count();
        if bound != 1 {
            return Err(ConfigError::PositionBinding(position, bound));
        }
    }

    let mut seen = HashSet::with_capacity(bindings.len());
    for binding in bindings {
        if !seen.insert(binding.topic.as_str()) {
            return Err(ConfigError::DuplicateTopic(binding.topic.clone()));
        }
    }

    Ok(())
}

/// Decoded contact sensor report
///
/// Only `contact` is required. The remaining fields are device telemetry that
/// some sensors attach; they are read leniently and only used for logging.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactReport {
    pub contact: bool,
    pub battery: Option<u64>,
    pub link_quality: Option<u64>,
    pub voltage_mv: Option<u64>,
    pub power_outage_count: Option<u64>,
    /// Degrees Celsius
    pub device_temperature: Option<i64>,
}

impl ContactReport {
    /// Decode a raw MQTT payload
    pub fn decode(payload: &[u8]) -> Result<Self, MalformedReport> {
        let map = decode_object(payload)?;
        let contact = required_bool(&map, "contact").map_err(MalformedReport::InvalidContact)?;

        Ok(Self {
            contact,
            battery: map.get("battery").and_then(Value::as_u64),
            link_quality: map.get("linkquality").and_then(Value::as_u64),
            voltage_mv: map.get("voltage").and_then(Value::as_u64),
            power_outage_count: map.get("power_outage_count").and_then(Value::as_u64),
            device_temperature: map.get("device_temperature").and_then(Value::as_i64),
        })
    }
}

/// Motion sensor binding. Motion sensors only trigger webhooks; they never
/// take part in door positioning.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionBinding {
    pub topic: String,
    pub nick_name: String,
    /// Invoked when a report says occupied
    pub occupancy_webhook: Option<String>,
    /// Invoked when a report says vacant
    pub vacancy_webhook: Option<String>,
}

impl MotionBinding {
    pub fn new(topic: impl Into<String>) -> Self {
        let topic = topic.into();
        Self { nick_name: topic.clone(), topic, occupancy_webhook: None, vacancy_webhook: None }
    }

    pub fn with_nick_name(mut self, nick_name: impl Into<String>) -> Self {
        self.nick_name = nick_name.into();
        self
    }

    pub fn with_webhooks(mut self, occupancy: Option<String>, vacancy: Option<String>) -> Self {
        self.occupancy_webhook = occupancy;
        self.vacancy_webhook = vacancy;
        self
    }

    pub fn webhook_for(&self, is_occupied: bool) -> Option<&str> {
        if is_occupied {
            self.occupancy_webhook.as_deref()
        } else {
            self.vacancy_webhook.as_deref()
        }
    }
}

/// Motion topics must be unique and must not shadow a contact sensor topic
pub fn validate_motion_bindings(
    contact: &[SensorBinding],
    motion: &[MotionBinding],
) -> Result<(), ConfigError> {
    let mut seen: HashSet<&str> = contact.iter().map(|b| b.topic.as_str()).collect();
    for binding in motion {
        if !seen.insert(binding.topic.as_str()) {
            return Err(ConfigError::DuplicateTopic(binding.topic.clone()));
        }
    }
    Ok(())
}

/// Decoded motion sensor report; only `occupancy` is required
#[derive(Debug, Clone, PartialEq)]
pub struct OccupancyReport {
    pub occupancy: bool,
    pub battery: Option<u64>,
    pub link_quality: Option<u64>,
    pub illuminance_lux: Option<u64>,
    pub temperature: Option<f64>,
}

impl OccupancyReport {
    pub fn decode(payload: &[u8]) -> Result<Self, MalformedReport> {
        let map = decode_object(payload)?;
        let occupancy = required_bool(&map, "occupancy").map_err(MalformedReport::InvalidOccupancy)?;

        Ok(Self {
            occupancy,
            battery: map.get("battery").and_then(Value::as_u64),
            link_quality: map.get("linkquality").and_then(Value::as_u64),
            illuminance_lux: map.get("illuminance_lux").and_then(Value::as_u64),
            temperature: map.get("temperature").and_then(Value::as_f64),
        })
    }
}

fn decode_object(payload: &[u8]) -> Result<Map<String, Value>, MalformedReport> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| MalformedReport::InvalidJson(e.to_string()))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(MalformedReport::NotAnObject(json_kind(&other))),
    }
}

/// Required bool field; the error carries what was found instead
fn required_bool(map: &Map<String, Value>, field: &str) -> Result<bool, &'static str> {
    match map.get(field) {
        Some(Value::Bool(value)) => Ok(*value),
        Some(other) => Err(json_kind(other)),
        None => Err("missing"),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
