//! Webhook notifications on sensor changes
//!
//! Each binding may carry one URL per contact (or occupancy) value. A report
//! hits the URL for its value with a plain GET. Delivery is best effort and never blocks MQTT
//! ingress: requests run on their own task and failures are only logged.

use crate::services::motion::MotionUpdate;
use crate::services::registry::SensorUpdate;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info};

pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct WebhookNotifier {
    http_client: Option<reqwest::Client>,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration) -> Self {
        // Created once for reuse (connection pooling)
        let http_client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => Some(client),
            Err(e) => {
                error!(error = %e, "webhook_client_init_failed");
                None
            }
        };
        Self { http_client }
    }

    /// Fire the webhook configured for this contact update, if any
    pub fn dispatch(&self, update: &SensorUpdate) -> Option<JoinHandle<()>> {
        self.invoke(&update.nick_name, "is_contact", update.is_contact, update.webhook.as_deref())
    }

    /// Fire the webhook configured for this occupancy update, if any
    pub fn dispatch_motion(&self, update: &MotionUpdate) -> Option<JoinHandle<()>> {
        self.invoke(&update.nick_name, "is_occupied", update.is_occupied, update.webhook.as_deref())
    }

    fn invoke(
        &self,
        sensor: &str,
        state_name: &'static str,
        state: bool,
        url: Option<&str>,
    ) -> Option<JoinHandle<()>> {
        let url = url?.to_string();
        let Some(client) = self.http_client.clone() else {
            error!(sensor = %sensor, "webhook_client_not_initialized");
            return None;
        };
        let sensor = sensor.to_string();

        Some(tokio::spawn(async move {
            let start = Instant::now();
            match client.get(&url).send().await.and_then(|r| r.error_for_status()) {
                Ok(response) => info!(
                    sensor = %sensor,
                    state = %state_name,
                    value = %state,
                    url = %url,
                    status = %response.status().as_u16(),
                    latency_ms = %start.elapsed().as_millis(),
                    "webhook_sent"
                ),
                Err(e) => error!(
                    sensor = %sensor,
                    state = %state_name,
                    value = %state,
                    url = %url,
                    latency_ms = %start.elapsed().as_millis(),
                    error = %e,
                    "webhook_failed"
                ),
            }
        }))
    }
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        Self::new(WEBHOOK_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Position;

    fn update(webhook: Option<&str>) -> SensorUpdate {
        SensorUpdate {
            nick_name: "garage door closed".to_string(),
            position: Some(Position::FullyClosed),
            is_contact: true,
            webhook: webhook.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_no_webhook_is_noop() {
        let notifier = WebhookNotifier::default();
        assert!(notifier.dispatch(&update(None)).is_none());
    }

    #[tokio::test]
    async fn test_motion_without_webhook_is_noop() {
        let notifier = WebhookNotifier::default();
        let update = MotionUpdate { nick_name: "garage motion".to_string(), is_occupied: true, webhook: None };
        assert!(notifier.dispatch_motion(&update).is_none());
    }

    #[tokio::test]
    async fn test_failed_delivery_is_contained() {
        let notifier = WebhookNotifier::new(Duration::from_millis(200));
        // Nothing listens on the discard port
        let handle = notifier.dispatch(&update(Some("http://127.0.0.1:9/hook"))).unwrap();
        handle.await.unwrap();
    }
}
