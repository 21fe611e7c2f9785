//! Contact sensor registry
//!
//! Owns the per-sensor state (contact flag, last update time) and the
//! per-position notification channel. Inbound reports are the only mutator;
//! everything else reads.
//!
//! Each record sits behind its own mutex and each door position has a
//! `watch` generation counter. `update` writes the record first and bumps the
//! counter second, so a woken waiter always reads a state at least as new as
//! the report that woke it.

use crate::domain::errors::{ConfigError, ReportError};
use crate::domain::types::{validate_bindings, ContactReport, Position, SensorBinding};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Last reported state of one contact sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorState {
    pub is_contact: bool,
    /// None until the first report arrives
    pub last_update: Option<Instant>,
}

impl SensorState {
    /// Age of the last report, if there was one
    pub fn age(&self, now: Instant) -> Option<Duration> {
        self.last_update.map(|at| now.saturating_duration_since(at))
    }

    pub fn is_valid(&self, now: Instant, validity: Duration) -> bool {
        self.age(now).is_some_and(|age| age < validity)
    }
}

/// What a report changed, handed on to webhook dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct SensorUpdate {
    pub nick_name: String,
    /// None for auxiliary sensors
    pub position: Option<Position>,
    pub is_contact: bool,
    /// Webhook configured for this contact value
    pub webhook: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SensorKey {
    Door(Position),
    Auxiliary(usize),
}

struct SensorSlot {
    binding: SensorBinding,
    state: Mutex<SensorState>,
    notify: watch::Sender<u64>,
}

impl SensorSlot {
    fn new(binding: SensorBinding) -> Self {
        let (notify, _) = watch::channel(0);
        Self { binding, state: Mutex::new(SensorState::default()), notify }
    }

    fn set(&self, is_contact: bool) -> SensorState {
        let state = {
            let mut state = self.state.lock();
            state.is_contact = is_contact;
            state.last_update = Some(Instant::now());
            *state
        };
        // Notify unconditionally, even when the value did not change
        self.notify.send_modify(|generation| *generation = generation.wrapping_add(1));
        state
    }

    fn snapshot(&self) -> SensorState {
        *self.state.lock()
    }
}

/// Registry of all configured contact sensors
///
/// Constructed once at startup and shared via `Arc`.
pub struct SensorRegistry {
    validity: Duration,
    /// Indexed by `Position::index`
    door: [SensorSlot; 3],
    auxiliary: Vec<SensorSlot>,
    topics: FxHashMap<String, SensorKey>,
}

impl SensorRegistry {
    pub fn new(validity: Duration, bindings: Vec<SensorBinding>) -> Result<Self, ConfigError> {
        validate_bindings(&bindings)?;

        let find = |position: Position| {
            bindings.iter().find(|b| b.role.position() == Some(position)).cloned()
        };
        let [Some(closed), Some(ajar), Some(opened)] = Position::ALL.map(find) else {
            return Err(ConfigError::SensorCount { expected: Position::ALL.len(), actual: 0 });
        };
        let door = [SensorSlot::new(closed), SensorSlot::new(ajar), SensorSlot::new(opened)];

        let auxiliary: Vec<SensorSlot> = bindings
            .iter()
            .filter(|b| b.role.position().is_none())
            .cloned()
            .map(SensorSlot::new)
            .collect();

        let mut topics = FxHashMap::default();
        for position in Position::ALL {
            topics.insert(door[position.index()].binding.topic.clone(), SensorKey::Door(position));
        }
        for (idx, slot) in auxiliary.iter().enumerate() {
            topics.insert(slot.binding.topic.clone(), SensorKey::Auxiliary(idx));
        }

        let registry = Self { validity, door, auxiliary, topics };

        for slot in registry.slots() {
            if let Some(is_contact) = slot.binding.initial_state {
                slot.set(is_contact);
                debug!(sensor = %slot.binding.nick_name, is_contact = %is_contact, "sensor_initial_state");
            }
        }

        Ok(registry)
    }

    fn slot(&self, key: SensorKey) -> &SensorSlot {
        match key {
            SensorKey::Door(position) => &self.door[position.index()],
            SensorKey::Auxiliary(idx) => &self.auxiliary[idx],
        }
    }

    fn slots(&self) -> impl Iterator<Item = &SensorSlot> {
        self.door.iter().chain(self.auxiliary.iter())
    }

    /// Record a contact value for a door position and notify its waiters
    pub fn update(&self, position: Position, is_contact: bool) -> SensorState {
        let slot = &self.door[position.index()];
        let state = slot.set(is_contact);
        info!(sensor = %slot.binding.nick_name, is_contact = %is_contact, status = %self, "sensor_updated");
        state
    }

    /// Apply an inbound report for `topic`
    ///
    /// Unknown topics and malformed payloads are rejected without touching any state.
    pub fn handle_report(&self, topic: &str, payload: &[u8]) -> Result<SensorUpdate, ReportError> {
        let key = *self
            .topics
            .get(topic)
            .ok_or_else(|| ReportError::UnknownTopic(topic.to_string()))?;
        let report = ContactReport::decode(payload)
            .map_err(|source| ReportError::Malformed { topic: topic.to_string(), source })?;

        let slot = self.slot(key);
        slot.set(report.contact);
        info!(
            sensor = %slot.binding.nick_name,
            is_contact = %report.contact,
            battery = ?report.battery,
            link_quality = ?report.link_quality,
            voltage_mv = ?report.voltage_mv,
            power_outage_count = ?report.power_outage_count,
            device_temperature = ?report.device_temperature,
            status = %self,
            "sensor_updated"
        );

        Ok(SensorUpdate {
            nick_name: slot.binding.nick_name.clone(),
            position: slot.binding.role.position(),
            is_contact: report.contact,
            webhook: slot.binding.webhook_for(report.contact).map(str::to_string),
        })
    }

    /// Contact value of a door position; None if never reported or stale
    pub fn is_contact(&self, position: Position) -> Option<bool> {
        self.read(&self.door[position.index()])
    }

    /// Contact value of an auxiliary sensor by topic; None if unknown, stale or not auxiliary
    pub fn auxiliary_is_contact(&self, topic: &str) -> Option<bool> {
        match self.topics.get(topic) {
            Some(SensorKey::Auxiliary(idx)) => self.read(&self.auxiliary[*idx]),
            _ => None,
        }
    }

    fn read(&self, slot: &SensorSlot) -> Option<bool> {
        let state = slot.snapshot();
        let age = state.age(Instant::now())?;
        if age >= self.validity {
            warn!(
                sensor = %slot.binding.nick_name,
                age_secs = %age.as_secs(),
                validity_secs = %self.validity.as_secs(),
                "sensor_state_stale"
            );
            return None;
        }
        Some(state.is_contact)
    }

    /// Raw state of a door position, ignoring the validity window
    pub fn state(&self, position: Position) -> SensorState {
        self.door[position.index()].snapshot()
    }

    /// Fresh receiver for a position's notifications
    ///
    /// The receiver starts with the current generation marked as seen, so it
    /// only fires for updates made after this call.
    pub fn subscribe(&self, position: Position) -> watch::Receiver<u64> {
        self.door[position.index()].notify.subscribe()
    }

    /// All bound topics, door sensors first
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.slots().map(|slot| slot.binding.topic.as_str())
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }
}

/// Compact status line: `0=12 1-3 2?`
///
/// Per door position: index, `=` contact / `-` no contact / `?` invalid, then
/// seconds since the last report (`?` if never reported). Auxiliary sensors
/// follow, keyed by nick name.
impl fmt::Display for SensorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let now = Instant::now();
        let entry = |state: SensorState| {
            let flag = if !state.is_valid(now, self.validity) {
                '?'
            } else if state.is_contact {
                '='
            } else {
                '-'
            };
            match state.age(now) {
                Some(age) => format!("{flag}{}", age.as_secs()),
                None => format!("{flag}?"),
            }
        };

        let mut parts: Vec<String> = Position::ALL
            .iter()
            .map(|p| format!("{}{}", p.index(), entry(self.door[p.index()].snapshot())))
            .collect();
        parts.extend(
            self.auxiliary
                .iter()
                .map(|slot| format!("{}{}", slot.binding.nick_name, entry(slot.snapshot()))),
        );
        f.write_str(&parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::MalformedReport;
    use crate::domain::types::SensorRole;

    fn bindings() -> Vec<SensorBinding> {
        vec![
            SensorBinding::new(Position::FullyClosed, "garage/closed"),
            SensorBinding::new(Position::Ajar, "garage/ajar"),
            SensorBinding::new(Position::FullyOpened, "garage/opened")
                .with_webhooks(Some("http://hooks/opened".into()), Some("http://hooks/left".into())),
            SensorBinding::new(SensorRole::Auxiliary, "garden/door").with_nick_name("garden"),
        ]
    }

    fn registry(validity_secs: u64) -> SensorRegistry {
        SensorRegistry::new(Duration::from_secs(validity_secs), bindings()).unwrap()
    }

    #[tokio::test]
    async fn test_never_reported_is_unknown() {
        let registry = registry(60);
        for position in Position::ALL {
            assert_eq!(registry.is_contact(position), None);
            assert_eq!(registry.state(position).last_update, None);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_validity_window() {
        let registry = registry(60);
        registry.update(Position::Ajar, false);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(registry.is_contact(Position::Ajar), Some(false));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(registry.is_contact(Position::Ajar), None);

        // A fresh report revives the record
        registry.update(Position::Ajar, true);
        assert_eq!(registry.is_contact(Position::Ajar), Some(true));
    }

    #[tokio::test]
    async fn test_update_notifies_subscribers() {
        let registry = registry(60);
        let mut closed_rx = registry.subscribe(Position::FullyClosed);
        let ajar_rx = registry.subscribe(Position::Ajar);
        assert!(!closed_rx.has_changed().unwrap());

        registry.update(Position::FullyClosed, true);
        assert!(closed_rx.has_changed().unwrap());
        assert!(!ajar_rx.has_changed().unwrap());

        // Repeating the same value still notifies
        closed_rx.borrow_and_update();
        registry.update(Position::FullyClosed, true);
        assert!(closed_rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_handle_report() {
        let registry = registry(60);
        let update = registry.handle_report("garage/opened", br#"{"contact": true}"#).unwrap();
        assert_eq!(update.position, Some(Position::FullyOpened));
        assert!(update.is_contact);
        assert_eq!(update.webhook.as_deref(), Some("http://hooks/opened"));
        assert_eq!(registry.is_contact(Position::FullyOpened), Some(true));

        let update = registry.handle_report("garage/opened", br#"{"contact": false}"#).unwrap();
        assert_eq!(update.webhook.as_deref(), Some("http://hooks/left"));
    }

    #[tokio::test]
    async fn test_unknown_topic_is_dropped() {
        let registry = registry(60);
        let err = registry.handle_report("garage/elsewhere", br#"{"contact": true}"#).unwrap_err();
        assert_eq!(err, ReportError::UnknownTopic("garage/elsewhere".to_string()));
        for position in Position::ALL {
            assert_eq!(registry.state(position), SensorState::default());
        }
    }

    #[tokio::test]
    async fn test_malformed_report_is_dropped() {
        let registry = registry(60);
        let rx = registry.subscribe(Position::Ajar);

        let err = registry.handle_report("garage/ajar", br#"{"contact": "yes"}"#).unwrap_err();
        assert_eq!(
            err,
            ReportError::Malformed {
                topic: "garage/ajar".to_string(),
                source: MalformedReport::InvalidContact("string"),
            }
        );
        assert_eq!(registry.state(Position::Ajar).last_update, None);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_auxiliary_sensor_is_separate() {
        let registry = registry(60);
        let update = registry.handle_report("garden/door", br#"{"contact": true}"#).unwrap();
        assert_eq!(update.position, None);
        assert_eq!(update.nick_name, "garden");
        assert_eq!(registry.auxiliary_is_contact("garden/door"), Some(true));
        assert_eq!(registry.auxiliary_is_contact("garage/ajar"), None);
        for position in Position::ALL {
            assert_eq!(registry.is_contact(position), None);
        }
    }

    #[tokio::test]
    async fn test_initial_state() {
        let mut bindings = bindings();
        bindings[0] = bindings[0].clone().with_initial_state(true);
        let registry = SensorRegistry::new(Duration::from_secs(60), bindings).unwrap();
        assert_eq!(registry.is_contact(Position::FullyClosed), Some(true));
        assert_eq!(registry.is_contact(Position::Ajar), None);
    }

    #[tokio::test]
    async fn test_missing_position_is_rejected() {
        let mut bindings = bindings();
        bindings.remove(1);
        assert!(matches!(
            SensorRegistry::new(Duration::from_secs(60), bindings),
            Err(ConfigError::SensorCount { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_line() {
        let registry = registry(60);
        registry.update(Position::FullyClosed, true);
        registry.update(Position::Ajar, false);
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(registry.to_string(), "0=3 1-3 2?? garden??");
    }

    #[tokio::test]
    async fn test_topics() {
        let registry = registry(60);
        let topics: Vec<&str> = registry.topics().collect();
        assert_eq!(topics, vec!["garage/closed", "garage/ajar", "garage/opened", "garden/door"]);
    }
}
