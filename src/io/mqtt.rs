//! MQTT client for contact and motion sensor reports
//!
//! The broker session is clean, so subscriptions are (re)issued on every
//! ConnAck. Reports are applied directly on the event loop: an update is a
//! short lock plus a notification, cheaper than a channel hop.

use crate::infra::config::Config;
use crate::io::webhook::WebhookNotifier;
use crate::services::motion::{MotionSensors, MotionUpdate};
use crate::services::registry::{SensorRegistry, SensorUpdate};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Build the client shared by sensor ingress and the relay switch
pub fn create_client(config: &Config) -> (AsyncClient, EventLoop) {
    let mut mqttoptions = MqttOptions::new(config.mqtt_client_id(), config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(config.mqtt_keep_alive());
    mqttoptions.set_clean_session(true);

    // Set credentials if configured
    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    AsyncClient::new(mqttoptions, 100)
}

/// An accepted report
#[derive(Debug, Clone, PartialEq)]
pub enum Ingested {
    Contact(SensorUpdate),
    Motion(MotionUpdate),
}

/// Where inbound reports go: contact sensors to the registry, motion sensors
/// to their own table, and both on to webhooks
#[derive(Clone)]
pub struct SensorRoutes {
    registry: Arc<SensorRegistry>,
    motion: Arc<MotionSensors>,
    webhooks: WebhookNotifier,
}

impl SensorRoutes {
    pub fn new(registry: Arc<SensorRegistry>, motion: Arc<MotionSensors>, webhooks: WebhookNotifier) -> Self {
        Self { registry, motion, webhooks }
    }

    /// Every topic to subscribe to, contact sensors first
    pub fn topics(&self) -> Vec<String> {
        self.registry
            .topics()
            .chain(self.motion.topics())
            .map(str::to_string)
            .collect()
    }

    /// Apply one report and fire its webhook
    ///
    /// Unknown topics and malformed payloads are logged and dropped; they never
    /// touch sensor state.
    pub fn handle_publish(&self, topic: &str, payload: &[u8]) -> Option<Ingested> {
        let result = if self.motion.contains(topic) {
            self.motion.handle_report(topic, payload).map(|update| {
                self.webhooks.dispatch_motion(&update);
                Ingested::Motion(update)
            })
        } else {
            self.registry.handle_report(topic, payload).map(|update| {
                self.webhooks.dispatch(&update);
                Ingested::Contact(update)
            })
        };

        match result {
            Ok(ingested) => Some(ingested),
            Err(e) => {
                error!(topic = %topic, error = %e, "sensor_report_rejected");
                None
            }
        }
    }
}

fn subscribe_all(client: &AsyncClient, routes: &SensorRoutes) {
    for topic in routes.topics() {
        match client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
            Ok(()) => info!(topic = %topic, "mqtt_subscribed"),
            Err(e) => error!(topic = %topic, error = %e, "mqtt_subscribe_failed"),
        }
    }
}

/// Drive the MQTT event loop until shutdown
pub async fn run_ingress(
    mut eventloop: EventLoop,
    client: AsyncClient,
    routes: SensorRoutes,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    if let Err(e) = client.try_disconnect() {
                        debug!(error = %e, "mqtt_disconnect_failed");
                    }
                    return;
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        routes.handle_publish(&publish.topic, &publish.payload);
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_connected");
                        subscribe_all(&client, &routes);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
