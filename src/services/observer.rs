//! Door position derived from the sensor registry

use crate::domain::errors::VerificationFailure;
use crate::domain::types::Position;
use crate::services::registry::SensorRegistry;
use std::sync::Arc;
use tracing::error;

/// Read-only view answering "where is the door"
#[derive(Clone)]
pub struct PositionObserver {
    registry: Arc<SensorRegistry>,
}

impl PositionObserver {
    pub fn new(registry: Arc<SensorRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SensorRegistry> {
        &self.registry
    }

    /// True only for a valid, positive contact. Unknown and stale both read as false.
    pub fn at(&self, position: Position) -> bool {
        self.registry.is_contact(position) == Some(true)
    }

    /// First position in canonical order the door is at.
    ///
    /// If several sensors report contact at once (a wiring or hardware fault),
    /// the earliest in canonical order wins: FULLY_CLOSED, then AJAR, then FULLY_OPENED.
    pub fn locate(&self) -> Option<Position> {
        Position::ALL.into_iter().find(|&position| self.at(position))
    }

    pub fn expect_at(&self, position: Position) -> Result<(), VerificationFailure> {
        if self.at(position) {
            Ok(())
        } else {
            error!(position = %position, "expected_door_at");
            Err(VerificationFailure::ExpectedAt(position))
        }
    }

    pub fn expect_not_at(&self, position: Position) -> Result<(), VerificationFailure> {
        if self.at(position) {
            error!(position = %position, "expected_door_not_at");
            Err(VerificationFailure::ExpectedNotAt(position))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::SensorBinding;
    use std::time::Duration;

    fn observer() -> PositionObserver {
        let bindings = Position::ALL
            .iter()
            .map(|p| SensorBinding::new(*p, format!("garage/{}", p.index())))
            .collect();
        let registry = SensorRegistry::new(Duration::from_secs(60), bindings).unwrap();
        PositionObserver::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_at_requires_reported_contact() {
        let observer = observer();
        assert!(!observer.at(Position::FullyClosed));
        assert_eq!(observer.locate(), None);

        observer.registry().update(Position::FullyClosed, false);
        assert!(!observer.at(Position::FullyClosed));

        observer.registry().update(Position::FullyClosed, true);
        assert!(observer.at(Position::FullyClosed));
        assert_eq!(observer.locate(), Some(Position::FullyClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_contact_is_not_at() {
        let observer = observer();
        observer.registry().update(Position::FullyOpened, true);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!observer.at(Position::FullyOpened));
        assert_eq!(observer.locate(), None);
    }

    #[tokio::test]
    async fn test_locate_prefers_canonical_order() {
        let observer = observer();
        observer.registry().update(Position::FullyOpened, true);
        observer.registry().update(Position::Ajar, true);
        assert_eq!(observer.locate(), Some(Position::Ajar));

        observer.registry().update(Position::FullyClosed, true);
        assert_eq!(observer.locate(), Some(Position::FullyClosed));

        observer.registry().update(Position::FullyClosed, false);
        observer.registry().update(Position::Ajar, false);
        assert_eq!(observer.locate(), Some(Position::FullyOpened));
    }

    #[tokio::test]
    async fn test_expectations() {
        let observer = observer();
        assert_eq!(
            observer.expect_at(Position::Ajar),
            Err(VerificationFailure::ExpectedAt(Position::Ajar))
        );
        assert_eq!(observer.expect_not_at(Position::Ajar), Ok(()));

        observer.registry().update(Position::Ajar, true);
        assert_eq!(observer.expect_at(Position::Ajar), Ok(()));
        assert_eq!(
            observer.expect_not_at(Position::Ajar),
            Err(VerificationFailure::ExpectedNotAt(Position::Ajar))
        );
    }
}
