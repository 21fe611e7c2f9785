//! Daily door schedule
//!
//! Each configured entry fires once a day at its local time of day plus an
//! offset in minutes, then stays quiet for the cooldown. Entries run on their
//! own timers, so one entry's cooldown never swallows another entry's slot.
//! Commands go through the action worker like any other request.

use crate::domain::types::Position;
use crate::infra::config::Config;
use crate::services::action_worker::DoorCommand;
use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Source of local wall-clock time
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

fn local_clock() -> Clock {
    Arc::new(|| Local::now().naive_local())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub target: Position,
    pub time: NaiveTime,
    pub offset_minutes: i64,
}

/// Next local datetime strictly after `now` at which `time + offset` falls
pub fn next_occurrence(now: NaiveDateTime, time: NaiveTime, offset_minutes: i64) -> NaiveDateTime {
    let offset = ChronoDuration::minutes(offset_minutes);
    let mut day = now.date();
    loop {
        let candidate = day.and_time(time) + offset;
        if candidate > now {
            return candidate;
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => return candidate,
        }
    }
}

pub struct Scheduler {
    entries: Vec<ScheduleEntry>,
    cooldown: Duration,
    cmd_tx: mpsc::Sender<DoorCommand>,
    clock: Clock,
}

impl Scheduler {
    pub fn new(entries: Vec<ScheduleEntry>, cooldown: Duration, cmd_tx: mpsc::Sender<DoorCommand>) -> Self {
        Self { entries, cooldown, cmd_tx, clock: local_clock() }
    }

    /// Build from config: `close_at` drives FULLY_CLOSED, `ajar_at` drives AJAR
    pub fn from_config(config: &Config, cmd_tx: mpsc::Sender<DoorCommand>) -> Self {
        let entries = [
            (Position::FullyClosed, config.close_at()),
            (Position::Ajar, config.ajar_at()),
        ]
        .into_iter()
        .filter_map(|(target, at)| {
            at.map(|(time, offset_minutes)| ScheduleEntry { target, time, offset_minutes })
        })
        .collect();
        Self::new(entries, config.schedule_cooldown(), cmd_tx)
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Run every entry until shutdown or until the action worker goes away
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        if self.entries.is_empty() {
            info!("scheduler_no_entries");
            return;
        }
        info!(entries = ?self.entries, cooldown_secs = %self.cooldown.as_secs(), "scheduler_started");

        let mut tasks = JoinSet::new();
        for entry in self.entries {
            tasks.spawn(run_entry(
                entry,
                self.cooldown,
                self.cmd_tx.clone(),
                self.clock.clone(),
                shutdown.clone(),
            ));
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "scheduler_entry_failed");
            }
        }
        info!("scheduler_shutdown");
    }
}

async fn run_entry(
    entry: ScheduleEntry,
    cooldown: Duration,
    cmd_tx: mpsc::Sender<DoorCommand>,
    clock: Clock,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let now = clock();
        let due = next_occurrence(now, entry.time, entry.offset_minutes);
        let wait = (due - now).to_std().unwrap_or(Duration::ZERO);
        info!(target_position = %entry.target, due = %due, wait_secs = %wait.as_secs(), "scheduler_next");

        if !sleep_or_shutdown(&mut shutdown, wait).await {
            return;
        }

        info!(target_position = %entry.target, "scheduler_fired");
        if let Err(e) = cmd_tx.send(DoorCommand::new(entry.target)).await {
            error!(target_position = %entry.target, error = %e, "scheduler_worker_gone");
            return;
        }

        debug!(target_position = %entry.target, cooldown_secs = %cooldown.as_secs(), "scheduler_cooldown");
        if !sleep_or_shutdown(&mut shutdown, cooldown).await {
            return;
        }
    }
}

/// Sleep for `duration`; false if shutdown was requested or its sender dropped first
async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return false;
                }
            }
            _ = &mut sleep => return true,
        }
    }
}
