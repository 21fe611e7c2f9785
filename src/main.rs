//! Garage door controller
//!
//! Drives a garage door through a single relay and infers its position from
//! three contact sensors (fully closed, ajar, fully opened) reported over MQTT.
//!
//! Module structure:
//! - `domain/` - Positions, sensor bindings, reports, errors
//! - `io/` - External interfaces (MQTT, relay switch, webhooks)
//! - `services/` - Sensor registry, transition waits, movement sequences, schedule
//! - `infra/` - Configuration

use anyhow::Context;
use clap::Parser;
use garage_door::domain::Position;
use garage_door::infra::Config;
use garage_door::io::{
    create_client, run_ingress, DryRunSwitch, MqttSwitch, SensorRoutes, SwitchActuator, WebhookNotifier,
};
use garage_door::services::{
    create_action_worker, ActionSequencer, ActionTimings, DoorCommand, MotionSensors, Scheduler, SensorRegistry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Garage door controller
#[derive(Parser, Debug)]
#[command(name = "garage-door", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to $CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Run a single action and exit: ajar, fully-closed or fully-opened
    #[arg(short, long)]
    action: Option<Position>,

    /// Seconds to collect sensor reports before running --action
    #[arg(long, default_value_t = 5)]
    warmup_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "garage-door starting");

    let args = Args::parse();

    let config_path = Config::resolve_config_path(args.config.as_deref());
    let config = Config::from_file(&config_path).context("configuration rejected")?;

    info!(
        config_file = %config.config_file(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        switch_topic = %config.switch_topic(),
        dry_run = %config.switch_dry_run(),
        state_validity_secs = %config.state_validity().as_secs(),
        expect_enter_max_ms = %config.expect_enter_max().as_millis(),
        expect_exit_max_ms = %config.expect_exit_max().as_millis(),
        ajar_timeout_ms = %config.ajar_timeout().as_millis(),
        sensors = %config.sensors().len(),
        motion_sensors = %config.motion_sensors().len(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let registry = Arc::new(
        SensorRegistry::new(config.state_validity(), config.sensors().to_vec())
            .context("sensor bindings rejected")?,
    );

    let (client, eventloop) = create_client(&config);

    let switch: Arc<dyn SwitchActuator> = if config.switch_dry_run() {
        info!(topic = %config.switch_topic(), "switch_dry_run_enabled");
        Arc::new(DryRunSwitch::new(config.switch_topic()))
    } else {
        Arc::new(MqttSwitch::new(&config, client.clone()))
    };

    // Start MQTT ingress
    let motion = Arc::new(MotionSensors::new(config.motion_sensors().to_vec()));
    let routes = SensorRoutes::new(registry.clone(), motion, WebhookNotifier::default());
    let ingress_shutdown = shutdown_rx.clone();
    let ingress_client = client.clone();
    let ingress = tokio::spawn(async move {
        run_ingress(eventloop, ingress_client, routes, ingress_shutdown).await;
    });

    // Start door command worker
    let sequencer = Arc::new(ActionSequencer::new(registry.clone(), switch, ActionTimings::from_config(&config)));
    let (cmd_tx, worker) = create_action_worker(sequencer, 8);
    tokio::spawn(worker.run());

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    if let Some(target) = args.action {
        // Sensors only report on change or periodically; give retained and
        // fresh reports a moment to arrive before deciding where the door is
        info!(warmup_secs = %args.warmup_secs, "collecting_sensor_reports");
        tokio::time::sleep(Duration::from_secs(args.warmup_secs)).await;
        info!(status = %registry, "sensor_status");

        let (cmd, reply) = DoorCommand::with_reply(target);
        cmd_tx.send(cmd).await.context("door command worker stopped")?;
        let report = reply.await.context("door command dropped")?;

        let _ = shutdown_tx.send(true);
        let _ = ingress.await;

        if !report.succeeded() {
            error!(
                target_position = %target,
                failures = ?report.verification_failures,
                "garage-door action failed"
            );
            anyhow::bail!("door did not reach {target}");
        }
        info!(target_position = %target, pulses = %report.pulses, "garage-door action complete");
        return Ok(());
    }

    if config.schedule_enabled() {
        let scheduler = Scheduler::from_config(&config, cmd_tx.clone());
        tokio::spawn(scheduler.run(shutdown_rx.clone()));
    }

    // Run until Ctrl+C stops MQTT ingress
    let _ = ingress.await;

    info!("garage-door shutdown complete");
    Ok(())
}
