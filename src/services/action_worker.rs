//! Door command worker - runs door actions one at a time
//!
//! The scheduler and the CLI enqueue commands via an mpsc channel. A single
//! consumer means two actions never pulse the same relay concurrently.

use crate::domain::types::Position;
use crate::services::sequencer::{ActionReport, ActionSequencer};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{info, warn};

/// A door command to be processed by the worker
#[derive(Debug)]
pub struct DoorCommand {
    /// Position the door should end up at
    pub target: Position,
    /// When the command was enqueued (for queue delay measurement)
    pub enqueued_at: Instant,
    /// Receives the report once the action finished
    pub reply: Option<oneshot::Sender<ActionReport>>,
}

impl DoorCommand {
    pub fn new(target: Position) -> Self {
        Self { target, enqueued_at: Instant::now(), reply: None }
    }

    /// Command plus the receiver its report will be delivered on
    pub fn with_reply(target: Position) -> (Self, oneshot::Receiver<ActionReport>) {
        let (tx, rx) = oneshot::channel();
        let cmd = Self { target, enqueued_at: Instant::now(), reply: Some(tx) };
        (cmd, rx)
    }
}

pub struct ActionWorker {
    sequencer: Arc<ActionSequencer>,
    cmd_rx: mpsc::Receiver<DoorCommand>,
}

impl ActionWorker {
    pub fn new(sequencer: Arc<ActionSequencer>, cmd_rx: mpsc::Receiver<DoorCommand>) -> Self {
        Self { sequencer, cmd_rx }
    }

    /// Run the worker, processing commands until every sender is dropped
    pub async fn run(mut self) {
        info!("door_cmd_worker_started");

        while let Some(cmd) = self.cmd_rx.recv().await {
            let queue_delay_ms = cmd.enqueued_at.elapsed().as_millis() as u64;
            info!(target_position = %cmd.target, queue_delay_ms = %queue_delay_ms, "door_cmd_started");

            let started = Instant::now();
            let report = self.sequencer.run(cmd.target).await;

            info!(
                target_position = %cmd.target,
                queue_delay_ms = %queue_delay_ms,
                duration_ms = %started.elapsed().as_millis(),
                pulses = %report.pulses,
                succeeded = %report.succeeded(),
                "door_cmd_processed"
            );

            if let Some(reply) = cmd.reply {
                if reply.send(report).is_err() {
                    warn!(target_position = %cmd.target, "door_cmd_reply_dropped");
                }
            }
        }

        info!("door_cmd_worker_stopped");
    }
}

/// Create a door command channel and worker
///
/// Returns the sender (for the scheduler and CLI) and the worker (to be spawned)
pub fn create_action_worker(
    sequencer: Arc<ActionSequencer>,
    buffer_size: usize,
) -> (mpsc::Sender<DoorCommand>, ActionWorker) {
    let (cmd_tx, cmd_rx) = mpsc::channel(buffer_size);
    let worker = ActionWorker::new(sequencer, cmd_rx);
    (cmd_tx, worker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::SensorBinding;
    use crate::io::switch::DryRunSwitch;
    use crate::services::registry::SensorRegistry;
    use crate::services::sequencer::{ActionTimings, SkipReason};
    use std::time::Duration;

    fn sequencer() -> (Arc<SensorRegistry>, Arc<DryRunSwitch>, Arc<ActionSequencer>) {
        let bindings = Position::ALL
            .iter()
            .map(|p| SensorBinding::new(*p, format!("garage/{p}")))
            .collect();
        let registry = Arc::new(SensorRegistry::new(Duration::from_secs(3060), bindings).unwrap());
        let switch = Arc::new(DryRunSwitch::new("relay"));
        let sequencer = Arc::new(ActionSequencer::new(
            registry.clone(),
            switch.clone(),
            ActionTimings::default(),
        ));
        (registry, switch, sequencer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_replies_with_report() {
        let (registry, switch, sequencer) = sequencer();
        registry.update(Position::FullyClosed, true);

        let (tx, worker) = create_action_worker(sequencer, 4);
        let handle = tokio::spawn(worker.run());

        let (cmd, rx) = DoorCommand::with_reply(Position::FullyClosed);
        tx.send(cmd).await.unwrap();
        let report = rx.await.unwrap();
        assert_eq!(report.skipped, Some(SkipReason::AlreadyAt));
        assert_eq!(switch.pulses(), 0);

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_runs_commands_in_order() {
        let (registry, _switch, sequencer) = sequencer();
        registry.update(Position::FullyOpened, true);

        let (tx, worker) = create_action_worker(sequencer, 4);
        tokio::spawn(worker.run());

        let (first, first_rx) = DoorCommand::with_reply(Position::Ajar);
        let (second, second_rx) = DoorCommand::with_reply(Position::FullyOpened);
        tx.send(first).await.unwrap();
        tx.send(second).await.unwrap();

        let first = first_rx.await.unwrap();
        let second = second_rx.await.unwrap();
        assert_eq!(first.target, Position::Ajar);
        assert_eq!(first.skipped, Some(SkipReason::Unreachable));
        assert_eq!(second.skipped, Some(SkipReason::AlreadyAt));
    }
}
