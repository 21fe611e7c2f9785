//! Motion sensors
//!
//! Occupancy reports only drive webhooks and logs. They are kept apart from
//! the contact registry so they can never influence the door position.

use crate::domain::errors::ReportError;
use crate::domain::types::{MotionBinding, OccupancyReport};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::info;

/// What an occupancy report changed, handed on to webhook dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct MotionUpdate {
    pub nick_name: String,
    pub is_occupied: bool,
    /// Webhook configured for this occupancy value
    pub webhook: Option<String>,
}

struct MotionSlot {
    binding: MotionBinding,
    is_occupied: Mutex<Option<bool>>,
}

#[derive(Default)]
pub struct MotionSensors {
    slots: FxHashMap<String, MotionSlot>,
}

impl MotionSensors {
    pub fn new(bindings: Vec<MotionBinding>) -> Self {
        let slots = bindings
            .into_iter()
            .map(|binding| (binding.topic.clone(), MotionSlot { binding, is_occupied: Mutex::new(None) }))
            .collect();
        Self { slots }
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.slots.contains_key(topic)
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    /// Last reported occupancy; None if unknown topic or never reported
    pub fn is_occupied(&self, topic: &str) -> Option<bool> {
        self.slots.get(topic).and_then(|slot| *slot.is_occupied.lock())
    }

    pub fn handle_report(&self, topic: &str, payload: &[u8]) -> Result<MotionUpdate, ReportError> {
        let slot = self
            .slots
            .get(topic)
            .ok_or_else(|| ReportError::UnknownTopic(topic.to_string()))?;
        let report = OccupancyReport::decode(payload)
            .map_err(|source| ReportError::Malformed { topic: topic.to_string(), source })?;

        *slot.is_occupied.lock() = Some(report.occupancy);
        info!(
            sensor = %slot.binding.nick_name,
            is_occupied = %report.occupancy,
            battery = ?report.battery,
            link_quality = ?report.link_quality,
            illuminance_lux = ?report.illuminance_lux,
            temperature = ?report.temperature,
            "motion_updated"
        );

        Ok(MotionUpdate {
            nick_name: slot.binding.nick_name.clone(),
            is_occupied: report.occupancy,
            webhook: slot.binding.webhook_for(report.occupancy).map(str::to_string),
        })
    }
}
