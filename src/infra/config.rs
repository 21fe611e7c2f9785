//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Unlike most settings, a bad sensor binding or timing value is fatal: the
//! process refuses to start rather than drive the door with a wrong map.

use crate::domain::errors::ConfigError;
use crate::domain::types::{
    validate_bindings, validate_motion_bindings, MotionBinding, Position, SensorBinding, SensorRole,
};
use anyhow::Context;
use chrono::NaiveTime;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Upper bound for enter/exit waits, in seconds
const MAX_TRANSITION_SECS: f64 = 30.0;
/// Upper bound for the closed -> ajar travel timeout, in seconds
const MAX_AJAR_TIMEOUT_SECS: f64 = 2.0;
/// Upper bound for settle, direction check and reverse delays, in seconds
const MAX_DELAY_SECS: f64 = 300.0;
/// Scheduled times may be shifted by at most four hours
const MAX_OFFSET_MINUTES: i64 = 4 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "garage-door".to_string()
}

fn default_keep_alive_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwitchConfig {
    /// Command topic of the relay switch
    pub topic: String,
    /// Log pulses without publishing them
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
    #[serde(default = "default_pulse_ms")]
    pub pulse_ms: u64,
}

fn default_dry_run() -> bool {
    true
}

fn default_pulse_ms() -> u64 {
    250
}

#[derive(Debug, Clone, Deserialize)]
pub struct DoorConfig {
    /// How long a sensor report stays valid. Should match the sensor's periodic update time.
    #[serde(default = "default_state_validity_secs")]
    pub state_validity_secs: u64,
    #[serde(default = "default_expect_enter_max_secs")]
    pub expect_enter_max_secs: f64,
    #[serde(default = "default_expect_exit_max_secs")]
    pub expect_exit_max_secs: f64,
    /// Maximum travel time from FULLY_CLOSED to AJAR
    pub ajar_timeout_secs: f64,
    /// Wait before the final check; defaults to `expect_enter_max_secs`
    #[serde(default)]
    pub settle_secs: Option<f64>,
    #[serde(default = "default_direction_check_secs")]
    pub direction_check_secs: f64,
    #[serde(default = "default_reverse_delay_secs")]
    pub reverse_delay_secs: f64,
}

fn default_state_validity_secs() -> u64 {
    3060
}

fn default_expect_enter_max_secs() -> f64 {
    15.0
}

fn default_expect_exit_max_secs() -> f64 {
    2.0
}

fn default_direction_check_secs() -> f64 {
    1.0
}

fn default_reverse_delay_secs() -> f64 {
    2.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    pub role: SensorRole,
    pub topic: String,
    #[serde(default)]
    pub nick_name: Option<String>,
    #[serde(default)]
    pub closed_webhook: Option<String>,
    #[serde(default)]
    pub opened_webhook: Option<String>,
    /// Only meant for testing
    #[serde(default)]
    pub initial_state: Option<bool>,
}

/// Motion sensor; only drives webhooks
#[derive(Debug, Clone, Deserialize)]
pub struct MotionSensorConfig {
    pub topic: String,
    #[serde(default)]
    pub nick_name: Option<String>,
    #[serde(default)]
    pub occupancy_webhook: Option<String>,
    #[serde(default)]
    pub vacancy_webhook: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Local time ("HH:MM") to fully close the door, e.g. sunrise
    #[serde(default)]
    pub close_at: Option<String>,
    #[serde(default)]
    pub close_offset_minutes: i64,
    /// Local time ("HH:MM") to leave the door ajar, e.g. sunset
    #[serde(default)]
    pub ajar_at: Option<String>,
    #[serde(default)]
    pub ajar_offset_minutes: i64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_cooldown_secs() -> u64 {
    30 * 60
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    pub mqtt: MqttConfig,
    pub switch: SwitchConfig,
    pub door: DoorConfig,
    pub sensors: Vec<SensorConfig>,
    #[serde(default)]
    pub motion_sensors: Vec<MotionSensorConfig>,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    config_file: String,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_client_id: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    mqtt_keep_alive_secs: u64,
    switch_topic: String,
    switch_dry_run: bool,
    pulse_ms: u64,
    state_validity_secs: u64,
    expect_enter_max_secs: f64,
    expect_exit_max_secs: f64,
    ajar_timeout_secs: f64,
    settle_secs: f64,
    direction_check_secs: f64,
    reverse_delay_secs: f64,
    sensors: Vec<SensorBinding>,
    motion_sensors: Vec<MotionBinding>,
    schedule_enabled: bool,
    close_at: Option<NaiveTime>,
    close_offset_minutes: i64,
    ajar_at: Option<NaiveTime>,
    ajar_offset_minutes: i64,
    schedule_cooldown_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_file: "default".to_string(),
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_client_id: default_client_id(),
            mqtt_username: None,
            mqtt_password: None,
            mqtt_keep_alive_secs: 10,
            switch_topic: "shellies/garage-door/relay/0/command".to_string(),
            switch_dry_run: true,
            pulse_ms: 250,
            state_validity_secs: 3060,
            expect_enter_max_secs: 15.0,
            expect_exit_max_secs: 2.0,
            ajar_timeout_secs: 2.0,
            settle_secs: 15.0,
            direction_check_secs: 1.0,
            reverse_delay_secs: 2.0,
            sensors: Self::default_sensors(),
            motion_sensors: Vec::new(),
            schedule_enabled: false,
            close_at: None,
            close_offset_minutes: 0,
            ajar_at: None,
            ajar_offset_minutes: 0,
            schedule_cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl Config {
    fn default_sensors() -> Vec<SensorBinding> {
        vec![
            SensorBinding::new(Position::FullyClosed, "zigbee2mqtt/garage_door_fully_closed")
                .with_nick_name("garage door closed"),
            SensorBinding::new(Position::Ajar, "zigbee2mqtt/garage_door_ajar")
                .with_nick_name("garage door ajar"),
            SensorBinding::new(Position::FullyOpened, "zigbee2mqtt/garage_door_fully_opened")
                .with_nick_name("garage door opened"),
        ]
    }

    /// Determine config file path from the CLI value or environment
    pub fn resolve_config_path(cli_path: Option<&str>) -> String {
        if let Some(path) = cli_path {
            return path.to_string();
        }

        // Check CONFIG_FILE environment variable
        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load and validate configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        Self::from_toml_str(&content, &path.display().to_string())
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str, origin: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content).context("Failed to parse TOML")?;
        Ok(Self::from_toml(toml_config, origin)?)
    }

    fn from_toml(toml_config: TomlConfig, origin: &str) -> Result<Self, ConfigError> {
        let door = toml_config.door;
        let schedule = toml_config.schedule;

        check_range("expect_enter_max_secs", door.expect_enter_max_secs, 0.0, MAX_TRANSITION_SECS)?;
        check_range("expect_exit_max_secs", door.expect_exit_max_secs, 0.0, MAX_TRANSITION_SECS)?;
        check_range("ajar_timeout_secs", door.ajar_timeout_secs, 0.0, MAX_AJAR_TIMEOUT_SECS)?;
        let settle_secs = door.settle_secs.unwrap_or(door.expect_enter_max_secs);
        check_range("settle_secs", settle_secs, 0.0, MAX_DELAY_SECS)?;
        check_range("direction_check_secs", door.direction_check_secs, 0.0, MAX_DELAY_SECS)?;
        check_range("reverse_delay_secs", door.reverse_delay_secs, 0.0, MAX_DELAY_SECS)?;
        check_range("keep_alive_secs", toml_config.mqtt.keep_alive_secs as f64, 1.0, u16::MAX as f64)?;
        for (name, minutes) in [
            ("close_offset_minutes", schedule.close_offset_minutes),
            ("ajar_offset_minutes", schedule.ajar_offset_minutes),
        ] {
            check_range(name, minutes as f64, -(MAX_OFFSET_MINUTES as f64), MAX_OFFSET_MINUTES as f64)?;
        }

        let sensors: Vec<SensorBinding> = toml_config
            .sensors
            .into_iter()
            .map(|s| {
                let nick_name = s.nick_name.unwrap_or_else(|| s.topic.clone());
                let mut binding = SensorBinding::new(s.role, s.topic)
                    .with_nick_name(nick_name)
                    .with_webhooks(non_empty(s.closed_webhook), non_empty(s.opened_webhook));
                binding.initial_state = s.initial_state;
                binding
            })
            .collect();
        validate_bindings(&sensors)?;

        let motion_sensors: Vec<MotionBinding> = toml_config
            .motion_sensors
            .into_iter()
            .map(|m| {
                let nick_name = m.nick_name.unwrap_or_else(|| m.topic.clone());
                MotionBinding::new(m.topic)
                    .with_nick_name(nick_name)
                    .with_webhooks(non_empty(m.occupancy_webhook), non_empty(m.vacancy_webhook))
            })
            .collect();
        validate_motion_bindings(&sensors, &motion_sensors)?;

        Ok(Self {
            config_file: origin.to_string(),
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_client_id: toml_config.mqtt.client_id,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            mqtt_keep_alive_secs: toml_config.mqtt.keep_alive_secs,
            switch_topic: toml_config.switch.topic,
            switch_dry_run: toml_config.switch.dry_run,
            pulse_ms: toml_config.switch.pulse_ms,
            state_validity_secs: door.state_validity_secs,
            expect_enter_max_secs: door.expect_enter_max_secs,
            expect_exit_max_secs: door.expect_exit_max_secs,
            ajar_timeout_secs: door.ajar_timeout_secs,
            settle_secs,
            direction_check_secs: door.direction_check_secs,
            reverse_delay_secs: door.reverse_delay_secs,
            sensors,
            motion_sensors,
            schedule_enabled: schedule.enabled,
            close_at: schedule.close_at.as_deref().map(parse_time_of_day).transpose()?,
            close_offset_minutes: schedule.close_offset_minutes,
            ajar_at: schedule.ajar_at.as_deref().map(parse_time_of_day).transpose()?,
            ajar_offset_minutes: schedule.ajar_offset_minutes,
            schedule_cooldown_secs: schedule.cooldown_secs,
        })
    }

    // Getters for all config fields
    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_client_id(&self) -> &str {
        &self.mqtt_client_id
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn mqtt_keep_alive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keep_alive_secs)
    }

    pub fn switch_topic(&self) -> &str {
        &self.switch_topic
    }

    pub fn switch_dry_run(&self) -> bool {
        self.switch_dry_run
    }

    pub fn pulse_duration(&self) -> Duration {
        Duration::from_millis(self.pulse_ms)
    }

    pub fn state_validity(&self) -> Duration {
        Duration::from_secs(self.state_validity_secs)
    }

    pub fn expect_enter_max(&self) -> Duration {
        Duration::from_secs_f64(self.expect_enter_max_secs)
    }

    pub fn expect_exit_max(&self) -> Duration {
        Duration::from_secs_f64(self.expect_exit_max_secs)
    }

    pub fn ajar_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.ajar_timeout_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs_f64(self.settle_secs)
    }

    pub fn direction_check(&self) -> Duration {
        Duration::from_secs_f64(self.direction_check_secs)
    }

    pub fn reverse_delay(&self) -> Duration {
        Duration::from_secs_f64(self.reverse_delay_secs)
    }

    pub fn sensors(&self) -> &[SensorBinding] {
        &self.sensors
    }

    pub fn motion_sensors(&self) -> &[MotionBinding] {
        &self.motion_sensors
    }

    pub fn schedule_enabled(&self) -> bool {
        self.schedule_enabled
    }

    /// Scheduled close time and its offset in minutes
    pub fn close_at(&self) -> Option<(NaiveTime, i64)> {
        self.close_at.map(|t| (t, self.close_offset_minutes))
    }

    /// Scheduled ajar time and its offset in minutes
    pub fn ajar_at(&self) -> Option<(NaiveTime, i64)> {
        self.ajar_at.map(|t| (t, self.ajar_offset_minutes))
    }

    pub fn schedule_cooldown(&self) -> Duration {
        Duration::from_secs(self.schedule_cooldown_secs)
    }
}

fn check_range(name: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { name, min, max, value })
    }
}

/// "-" disables a webhook, like an absent value
fn non_empty(url: Option<String>) -> Option<String> {
    url.filter(|u| !u.trim().is_empty() && u.trim() != "-")
}

fn parse_time_of_day(s: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").map_err(|_| ConfigError::InvalidTimeOfDay(s.to_string()))
}
