//! IO modules - external system interfaces
//!
//! - `mqtt` - MQTT client for contact and motion sensor reports
//! - `switch` - Relay switch that pulses the door motor
//! - `webhook` - HTTP notifications on sensor changes

pub mod mqtt;
pub mod switch;
pub mod webhook;

pub use mqtt::{create_client, run_ingress, Ingested, SensorRoutes};
pub use switch::{DryRunSwitch, MqttSwitch, SwitchActuator};
pub use webhook::WebhookNotifier;
