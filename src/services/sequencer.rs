//! Door movement sequences
//!
//! Each action is a short state machine:
//! IDLE -> TRIGGERED -> AWAIT_TRANSITION -> SETTLE -> VERIFY -> DONE.
//!
//! The relay gives no feedback, so progress is inferred from sensor
//! transitions. A failed intermediate wait is logged and the sequence moves on
//! to its next step; a half-run sequence would leave the door in an unknown
//! state. Only the final verification decides whether the action failed, and
//! even then nothing is rolled back.

use crate::domain::errors::{Transition, VerificationFailure, WaitError};
use crate::domain::types::Position;
use crate::infra::config::Config;
use crate::io::switch::SwitchActuator;
use crate::services::observer::PositionObserver;
use crate::services::registry::SensorRegistry;
use crate::services::waiter::TransitionWaiter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Stage of a running action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStage {
    Idle,
    Triggered,
    AwaitTransition,
    Settle,
    Verify,
    Done,
}

impl ActionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStage::Idle => "IDLE",
            ActionStage::Triggered => "TRIGGERED",
            ActionStage::AwaitTransition => "AWAIT_TRANSITION",
            ActionStage::Settle => "SETTLE",
            ActionStage::Verify => "VERIFY",
            ActionStage::Done => "DONE",
        }
    }
}

/// Why an action returned without pulsing the switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Door already at the target
    AlreadyAt,
    /// Target cannot be reached from here with a single pulse
    Unreachable,
    /// No sensor reports contact, so the direction of travel is unknown
    UnknownPosition,
}

/// Outcome of one action invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ActionReport {
    pub target: Position,
    /// Where the door was when the action started
    pub start: Option<Position>,
    pub stage: ActionStage,
    pub pulses: u32,
    pub skipped: Option<SkipReason>,
    /// Intermediate waits that failed; the sequence continued past each of them
    pub wait_failures: Vec<WaitError>,
    pub verification_failures: Vec<VerificationFailure>,
}

impl ActionReport {
    fn new(target: Position, start: Option<Position>) -> Self {
        Self {
            target,
            start,
            stage: ActionStage::Idle,
            pulses: 0,
            skipped: None,
            wait_failures: Vec::new(),
            verification_failures: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.verification_failures.is_empty()
    }

    pub fn timeouts(&self) -> usize {
        self.wait_failures.iter().filter(|e| e.is_timeout()).count()
    }
}

/// Timing bounds for the action sequences
#[derive(Debug, Clone, PartialEq)]
pub struct ActionTimings {
    pub pulse: Duration,
    pub enter_timeout: Duration,
    pub exit_timeout: Duration,
    /// Travel bound from FULLY_CLOSED to AJAR
    pub ajar_timeout: Duration,
    /// Wait after the last pulse before trusting the sensors
    pub settle: Duration,
    /// Wait after the first pulse before checking the direction of travel
    pub direction_check: Duration,
    /// Wait at the wrong end before pulsing again
    pub reverse_delay: Duration,
}

impl ActionTimings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            pulse: config.pulse_duration(),
            enter_timeout: config.expect_enter_max(),
            exit_timeout: config.expect_exit_max(),
            ajar_timeout: config.ajar_timeout(),
            settle: config.settle(),
            direction_check: config.direction_check(),
            reverse_delay: config.reverse_delay(),
        }
    }
}

impl Default for ActionTimings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Drives the door between its canonical positions
///
/// Actions are not serialized internally; callers run at most one at a time
/// (see `ActionWorker`).
pub struct ActionSequencer {
    observer: PositionObserver,
    waiter: TransitionWaiter,
    switch: Arc<dyn SwitchActuator>,
    timings: ActionTimings,
}

impl ActionSequencer {
    pub fn new(
        registry: Arc<SensorRegistry>,
        switch: Arc<dyn SwitchActuator>,
        timings: ActionTimings,
    ) -> Self {
        let observer = PositionObserver::new(registry);
        let waiter = TransitionWaiter::new(observer.clone());
        Self { observer, waiter, switch, timings }
    }

    pub fn observer(&self) -> &PositionObserver {
        &self.observer
    }

    pub fn timings(&self) -> &ActionTimings {
        &self.timings
    }

    /// Run the action for `target`
    pub async fn run(&self, target: Position) -> ActionReport {
        match target {
            Position::FullyClosed => self.to_fully_closed().await,
            Position::Ajar => self.to_ajar().await,
            Position::FullyOpened => self.to_fully_opened().await,
        }
    }

    /// Open a closed door slightly
    ///
    /// Only starts from FULLY_CLOSED. The ajar sensor has a dead zone, so the
    /// door is stopped whether or not AJAR was seen, and the final check only
    /// asserts that the door is at neither end.
    pub async fn to_ajar(&self) -> ActionReport {
        let start = self.observer.locate();
        let mut report = ActionReport::new(Position::Ajar, start);

        let from = match start {
            Some(Position::FullyClosed) => Position::FullyClosed,
            Some(Position::Ajar) => return self.skip(report, SkipReason::AlreadyAt),
            Some(Position::FullyOpened) => return self.skip(report, SkipReason::Unreachable),
            None => return self.skip(report, SkipReason::UnknownPosition),
        };

        self.pulse(&mut report).await;

        self.enter_stage(&mut report, ActionStage::AwaitTransition);
        let exited = self.waiter.await_exit(from, self.timings.exit_timeout).await;
        self.record(&mut report, exited);

        let ajar_timeout = self.timings.ajar_timeout;
        match tokio::time::timeout(
            ajar_timeout,
            self.waiter.await_enter(Position::Ajar, self.timings.enter_timeout),
        )
        .await
        {
            Ok(entered) => self.record(&mut report, entered),
            Err(_) => {
                let err = WaitError::Timeout {
                    position: Position::Ajar,
                    transition: Transition::Enter,
                    timeout: ajar_timeout,
                };
                warn!(
                    timeout_ms = %ajar_timeout.as_millis(),
                    "door_did_not_reach_ajar_in_time"
                );
                report.wait_failures.push(err);
            }
        }

        info!("stopping_door");
        self.pulse(&mut report).await;

        // A door that is still moving reaches one of the ends while settling
        self.settle(&mut report).await;
        self.verify(&mut report, &[], &[Position::FullyClosed, Position::FullyOpened]);
        self.finish(report)
    }

    /// Close the door from any position
    pub async fn to_fully_closed(&self) -> ActionReport {
        self.to_end(Position::FullyClosed, Position::FullyOpened).await
    }

    /// Open the door from any position
    pub async fn to_fully_opened(&self) -> ActionReport {
        self.to_end(Position::FullyOpened, Position::FullyClosed).await
    }

    async fn to_end(&self, target: Position, opposite: Position) -> ActionReport {
        let start = self.observer.locate();
        let mut report = ActionReport::new(target, start);
        if start == Some(target) {
            return self.skip(report, SkipReason::AlreadyAt);
        }

        self.pulse(&mut report).await;
        self.enter_stage(&mut report, ActionStage::AwaitTransition);

        // From the opposite end the door can only travel towards the target.
        // Anywhere else it may resume in the wrong direction.
        if start != Some(opposite) {
            tokio::time::sleep(self.timings.direction_check).await;
            match self.waiter.await_enter(opposite, self.timings.enter_timeout).await {
                Ok(()) => {
                    info!(
                        position = %opposite,
                        delay_ms = %self.timings.reverse_delay.as_millis(),
                        "door_moved_wrong_way"
                    );
                    tokio::time::sleep(self.timings.reverse_delay).await;
                    self.pulse(&mut report).await;
                    self.enter_stage(&mut report, ActionStage::AwaitTransition);
                }
                Err(err) => debug!(position = %opposite, error = %err, "door_not_moving_away"),
            }
        }

        let steps = [
            (Transition::Exit, opposite),
            (Transition::Enter, Position::Ajar),
            (Transition::Exit, Position::Ajar),
            (Transition::Enter, target),
        ];
        for (transition, position) in steps {
            if self.observer.at(target) {
                info!(position = %target, "door_reached_target");
                break;
            }
            // Steps the door is already past are skipped rather than failed
            let at = self.observer.at(position);
            let result = match transition {
                Transition::Exit if !at => continue,
                Transition::Enter if at => continue,
                Transition::Exit => self.waiter.await_exit(position, self.timings.exit_timeout).await,
                Transition::Enter => self.waiter.await_enter(position, self.timings.enter_timeout).await,
            };
            self.record(&mut report, result);
        }

        // An end sensor in contact means the door has stopped against the end
        if self.observer.at(target) {
            self.enter_stage(&mut report, ActionStage::Settle);
            info!(position = %target, "target_confirmed");
        } else {
            self.settle(&mut report).await;
        }
        let others: Vec<Position> = Position::ALL.into_iter().filter(|p| *p != target).collect();
        self.verify(&mut report, &[target], &others);
        self.finish(report)
    }

    fn enter_stage(&self, report: &mut ActionReport, stage: ActionStage) {
        report.stage = stage;
        debug!(target_position = %report.target, stage = %stage.as_str(), "action_stage");
    }

    async fn pulse(&self, report: &mut ActionReport) {
        self.enter_stage(report, ActionStage::Triggered);
        self.switch.pulse(self.timings.pulse).await;
        report.pulses += 1;
    }

    async fn settle(&self, report: &mut ActionReport) {
        self.enter_stage(report, ActionStage::Settle);
        info!(settle_ms = %self.timings.settle.as_millis(), "settling_before_final_check");
        tokio::time::sleep(self.timings.settle).await;
    }

    fn record(&self, report: &mut ActionReport, result: Result<(), WaitError>) {
        if let Err(err) = result {
            warn!(target_position = %report.target, error = %err, "action_step_failed");
            report.wait_failures.push(err);
        }
    }

    fn verify(&self, report: &mut ActionReport, at: &[Position], not_at: &[Position]) {
        self.enter_stage(report, ActionStage::Verify);
        let checks = at
            .iter()
            .map(|p| self.observer.expect_at(*p))
            .chain(not_at.iter().map(|p| self.observer.expect_not_at(*p)));
        report.verification_failures.extend(checks.filter_map(Result::err));
    }

    fn skip(&self, mut report: ActionReport, reason: SkipReason) -> ActionReport {
        report.skipped = Some(reason);
        report.stage = ActionStage::Done;
        match reason {
            SkipReason::AlreadyAt => {
                info!(target_position = %report.target, "door_already_at_target")
            }
            SkipReason::Unreachable | SkipReason::UnknownPosition => warn!(
                target_position = %report.target,
                start = ?report.start,
                reason = ?reason,
                "door_action_skipped"
            ),
        }
        report
    }

    fn finish(&self, mut report: ActionReport) -> ActionReport {
        self.enter_stage(&mut report, ActionStage::Done);
        if report.succeeded() {
            info!(
                target_position = %report.target,
                pulses = %report.pulses,
                wait_failures = %report.wait_failures.len(),
                "door_action_done"
            );
        } else {
            error!(
                target_position = %report.target,
                pulses = %report.pulses,
                wait_failures = %report.wait_failures.len(),
                verification_failures = ?report.verification_failures,
                "door_action_failed"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::SensorBinding;
    use crate::io::switch::DryRunSwitch;

    struct Harness {
        registry: Arc<SensorRegistry>,
        switch: Arc<DryRunSwitch>,
        sequencer: ActionSequencer,
    }

    fn harness() -> Harness {
        let bindings = Position::ALL
            .iter()
            .map(|p| SensorBinding::new(*p, format!("garage/{p}")))
            .collect();
        let registry = Arc::new(SensorRegistry::new(Duration::from_secs(3060), bindings).unwrap());
        let switch = Arc::new(DryRunSwitch::new("relay"));
        let sequencer = ActionSequencer::new(registry.clone(), switch.clone(), ActionTimings::default());
        Harness { registry, switch, sequencer }
    }

    fn place_at(registry: &SensorRegistry, at: Position) {
        for position in Position::ALL {
            registry.update(position, position == at);
        }
    }

    /// Deliver `(delay since previous, position, is_contact)` reports in order
    fn script(registry: &Arc<SensorRegistry>, steps: Vec<(u64, Position, bool)>) {
        let registry = registry.clone();
        tokio::spawn(async move {
            for (delay_ms, position, is_contact) in steps {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                registry.update(position, is_contact);
            }
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_fully_closed_is_idempotent() {
        let h = harness();
        place_at(&h.registry, Position::FullyClosed);

        let report = h.sequencer.to_fully_closed().await;
        assert_eq!(report.skipped, Some(SkipReason::AlreadyAt));
        assert_eq!(report.stage, ActionStage::Done);
        assert!(report.succeeded());
        assert_eq!(h.switch.pulses(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ajar_skips_when_not_closed() {
        let h = harness();
        place_at(&h.registry, Position::FullyOpened);
        let report = h.sequencer.to_ajar().await;
        assert_eq!(report.skipped, Some(SkipReason::Unreachable));

        place_at(&h.registry, Position::Ajar);
        let report = h.sequencer.to_ajar().await;
        assert_eq!(report.skipped, Some(SkipReason::AlreadyAt));

        for position in Position::ALL {
            h.registry.update(position, false);
        }
        let report = h.sequencer.to_ajar().await;
        assert_eq!(report.skipped, Some(SkipReason::UnknownPosition));
        assert_eq!(h.switch.pulses(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_to_ajar_reaches_ajar() {
        let h = harness();
        place_at(&h.registry, Position::FullyClosed);
        script(
            &h.registry,
            vec![(300, Position::FullyClosed, false), (900, Position::Ajar, true)],
        );

        let report = h.sequencer.to_ajar().await;
        assert_eq!(report.pulses, 2);
        assert!(report.wait_failures.is_empty(), "{:?}", report.wait_failures);
        assert!(report.succeeded());
        assert_eq!(h.observer_position(), Some(Position::Ajar));
    }

    #[tokio::test(start_paused = true)]
    async fn test_to_fully_opened_from_closed() {
        let h = harness();
        place_at(&h.registry, Position::FullyClosed);
        script(
            &h.registry,
            vec![
                (500, Position::FullyClosed, false),
                (1_500, Position::Ajar, true),
                (500, Position::Ajar, false),
                (8_000, Position::FullyOpened, true),
            ],
        );

        let start = tokio::time::Instant::now();
        let report = h.sequencer.to_fully_opened().await;
        assert_eq!(report.pulses, 1);
        assert!(report.wait_failures.is_empty(), "{:?}", report.wait_failures);
        assert!(report.succeeded());
        assert_eq!(h.observer_position(), Some(Position::FullyOpened));
        // Fully opened was seen at ~10.5s; no settle is added on top
        assert!(start.elapsed() < Duration::from_secs(12), "took {:?}", start.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_to_end_settles_when_target_unconfirmed() {
        let h = harness();
        place_at(&h.registry, Position::FullyClosed);
        // Leaves closed but never reports fully opened
        script(&h.registry, vec![(500, Position::FullyClosed, false), (1_500, Position::Ajar, true)]);

        let start = tokio::time::Instant::now();
        let report = h.sequencer.to_fully_opened().await;
        assert!(!report.succeeded());
        assert!(start.elapsed() >= ActionTimings::default().settle, "took {:?}", start.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_to_fully_closed_reverses_wrong_way() {
        let h = harness();
        place_at(&h.registry, Position::Ajar);
        // First pulse sends the door up; it must be reversed at the top
        script(
            &h.registry,
            vec![
                (500, Position::Ajar, false),
                (2_500, Position::FullyOpened, true),
                // reverse pulse lands at ~5s
                (3_000, Position::FullyOpened, false),
                (4_000, Position::Ajar, true),
                (500, Position::Ajar, false),
                (2_000, Position::FullyClosed, true),
            ],
        );

        let report = h.sequencer.to_fully_closed().await;
        assert_eq!(report.pulses, 2);
        assert!(report.wait_failures.is_empty(), "{:?}", report.wait_failures);
        assert!(report.succeeded());
        assert_eq!(h.observer_position(), Some(Position::FullyClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_verification_failure_is_reported() {
        let h = harness();
        place_at(&h.registry, Position::FullyOpened);
        // Door never moves

        let report = h.sequencer.to_fully_closed().await;
        assert_eq!(report.stage, ActionStage::Done);
        assert_eq!(report.pulses, 1);
        assert!(report.timeouts() >= 1);
        assert!(!report.succeeded());
        assert!(report
            .verification_failures
            .contains(&VerificationFailure::ExpectedAt(Position::FullyClosed)));
        assert!(report
            .verification_failures
            .contains(&VerificationFailure::ExpectedNotAt(Position::FullyOpened)));
    }

    impl Harness {
        fn observer_position(&self) -> Option<Position> {
            self.sequencer.observer().locate()
        }
    }
}
