//! Relay switch that starts and stops the door motor
//!
//! A pulse is fire-and-forget: the relay gives no feedback, and door motion is
//! only ever inferred from the contact sensors.

use crate::infra::config::Config;
use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{error, info};

#[async_trait]
pub trait SwitchActuator: Send + Sync {
    /// Close the relay for `duration`, then release it
    async fn pulse(&self, duration: Duration);
}

/// Relay command understood by the switch: `on,<seconds>`
pub fn pulse_payload(duration: Duration) -> String {
    format!("on,{}", duration.as_secs_f64())
}

/// Publishes pulse commands to the relay's MQTT command topic
pub struct MqttSwitch {
    client: AsyncClient,
    topic: String,
}

impl MqttSwitch {
    pub fn new(config: &Config, client: AsyncClient) -> Self {
        Self { client, topic: config.switch_topic().to_string() }
    }
}

#[async_trait]
impl SwitchActuator for MqttSwitch {
    async fn pulse(&self, duration: Duration) {
        let payload = pulse_payload(duration);
        info!(topic = %self.topic, payload = %payload, "switch_pulse");

        if let Err(e) = self
            .client
            .publish(&self.topic, QoS::AtMostOnce, false, payload.into_bytes())
            .await
        {
            error!(topic = %self.topic, error = %e, "switch_pulse_failed");
        }
    }
}

/// Logs pulses instead of publishing them
#[derive(Default)]
pub struct DryRunSwitch {
    topic: String,
    pulses: AtomicU32,
}

impl DryRunSwitch {
    pub fn new(topic: impl Into<String>) -> Self {
        Self { topic: topic.into(), pulses: AtomicU32::new(0) }
    }

    /// Number of pulses requested so far
    pub fn pulses(&self) -> u32 {
        self.pulses.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SwitchActuator for DryRunSwitch {
    async fn pulse(&self, duration: Duration) {
        self.pulses.fetch_add(1, Ordering::Relaxed);
        info!(topic = %self.topic, payload = %pulse_payload(duration), dry_run = true, "switch_pulse");
    }
}
