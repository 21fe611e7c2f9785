//! Enter/exit waits on a position's notification channel
//!
//! Contract, for both directions:
//! 1. Reset the position's notification token (take a fresh subscription).
//! 2. Check the precondition. Waiting to enter a position the door is already
//!    at (or to exit one it is not at) is a caller error: the transition
//!    already happened and can never be observed, so it fails immediately.
//! 3. Suspend until the token fires or the timeout elapses.
//! 4. On wake, re-check. A notification that did not produce the expected
//!    state is spurious and fails the wait.
//!
//! Resetting before the check means a report landing between the check and the
//! start of the wait still fires the token.

use crate::domain::errors::{Transition, WaitError};
use crate::domain::types::Position;
use crate::services::observer::PositionObserver;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct TransitionWaiter {
    observer: PositionObserver,
}

impl TransitionWaiter {
    pub fn new(observer: PositionObserver) -> Self {
        Self { observer }
    }

    /// Wait for the door to arrive at `position`
    pub async fn await_enter(&self, position: Position, timeout: Duration) -> Result<(), WaitError> {
        self.await_transition(position, Transition::Enter, timeout).await
    }

    /// Wait for the door to leave `position`
    pub async fn await_exit(&self, position: Position, timeout: Duration) -> Result<(), WaitError> {
        self.await_transition(position, Transition::Exit, timeout).await
    }

    async fn await_transition(
        &self,
        position: Position,
        transition: Transition,
        timeout: Duration,
    ) -> Result<(), WaitError> {
        let wants_contact = transition == Transition::Enter;
        let mut token = self.observer.registry().subscribe(position);

        if self.observer.at(position) == wants_contact {
            let err = match transition {
                Transition::Enter => WaitError::AlreadyAt(position),
                Transition::Exit => WaitError::NotAt(position),
            };
            error!(position = %position, transition = %transition, error = %err, "wait_requested_too_late");
            return Err(err);
        }

        info!(
            position = %position,
            transition = %transition,
            timeout_ms = %timeout.as_millis(),
            "waiting_for_door"
        );
        let started = Instant::now();

        match tokio::time::timeout(timeout, token.changed()).await {
            Err(_) => {
                let err = WaitError::Timeout { position, transition, timeout };
                warn!(
                    position = %position,
                    transition = %transition,
                    timeout_ms = %timeout.as_millis(),
                    elapsed_ms = %started.elapsed().as_millis(),
                    "door_transition_timeout"
                );
                Err(err)
            }
            Ok(Err(_)) => {
                error!(position = %position, "notification_channel_closed");
                Err(WaitError::Closed(position))
            }
            Ok(Ok(())) => {
                let elapsed_ms = started.elapsed().as_millis();
                if self.observer.at(position) != wants_contact {
                    warn!(
                        position = %position,
                        transition = %transition,
                        elapsed_ms = %elapsed_ms,
                        "door_transition_spurious"
                    );
                    return Err(WaitError::Spurious { position, transition });
                }
                info!(position = %position, transition = %transition, elapsed_ms = %elapsed_ms, "door_transitioned");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::SensorBinding;
    use crate::services::registry::SensorRegistry;
    use std::sync::Arc;

    fn setup() -> (Arc<SensorRegistry>, TransitionWaiter) {
        let bindings = Position::ALL
            .iter()
            .map(|p| SensorBinding::new(*p, format!("garage/{p}")))
            .collect();
        let registry = Arc::new(SensorRegistry::new(Duration::from_secs(60), bindings).unwrap());
        let waiter = TransitionWaiter::new(PositionObserver::new(registry.clone()));
        (registry, waiter)
    }

    fn report_after(registry: &Arc<SensorRegistry>, delay: Duration, position: Position, is_contact: bool) {
        let registry = registry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            registry.update(position, is_contact);
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_enter_within_timeout() {
        let (registry, waiter) = setup();
        report_after(&registry, Duration::from_secs(3), Position::FullyClosed, true);

        let started = Instant::now();
        waiter.await_enter(Position::FullyClosed, Duration::from_secs(15)).await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enter_timeout() {
        let (_registry, waiter) = setup();
        let started = Instant::now();
        let err = waiter.await_enter(Position::Ajar, Duration::from_secs(2)).await.unwrap_err();
        assert_eq!(
            err,
            WaitError::Timeout {
                position: Position::Ajar,
                transition: Transition::Enter,
                timeout: Duration::from_secs(2),
            }
        );
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enter_when_already_at_fails_immediately() {
        let (registry, waiter) = setup();
        registry.update(Position::FullyOpened, true);

        let started = Instant::now();
        let err = waiter.await_enter(Position::FullyOpened, Duration::from_secs(15)).await.unwrap_err();
        assert_eq!(err, WaitError::AlreadyAt(Position::FullyOpened));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_when_not_at_fails_immediately() {
        let (_registry, waiter) = setup();
        let err = waiter.await_exit(Position::FullyClosed, Duration::from_secs(2)).await.unwrap_err();
        assert_eq!(err, WaitError::NotAt(Position::FullyClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_within_timeout() {
        let (registry, waiter) = setup();
        registry.update(Position::FullyClosed, true);
        report_after(&registry, Duration::from_millis(500), Position::FullyClosed, false);

        waiter.await_exit(Position::FullyClosed, Duration::from_secs(2)).await.unwrap();
        assert!(!registry.is_contact(Position::FullyClosed).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spurious_wake() {
        let (registry, waiter) = setup();
        registry.update(Position::FullyClosed, true);
        // Periodic report repeating the current value
        report_after(&registry, Duration::from_secs(1), Position::FullyClosed, true);

        let err = waiter.await_exit(Position::FullyClosed, Duration::from_secs(2)).await.unwrap_err();
        assert_eq!(
            err,
            WaitError::Spurious { position: Position::FullyClosed, transition: Transition::Exit }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_position_does_not_wake() {
        let (registry, waiter) = setup();
        report_after(&registry, Duration::from_secs(1), Position::Ajar, true);

        let err = waiter.await_enter(Position::FullyOpened, Duration::from_secs(5)).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters() {
        let (registry, waiter) = setup();
        report_after(&registry, Duration::from_secs(1), Position::Ajar, true);
        report_after(&registry, Duration::from_secs(2), Position::FullyOpened, true);

        let (ajar, opened) = tokio::join!(
            waiter.await_enter(Position::Ajar, Duration::from_secs(5)),
            waiter.await_enter(Position::FullyOpened, Duration::from_secs(5)),
        );
        assert_eq!(ajar, Ok(()));
        assert_eq!(opened, Ok(()));
    }
}
