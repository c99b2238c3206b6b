//! HTTP publisher for out-of-process writers.
//!
//! Processes that commit writes but do not host the fan-out server (workers,
//! scripts, the CLI) post events to `/internal/publish`, and the server takes
//! it from there.

use std::time::Duration;

use pulse_core::Event;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};

/// Default server URL.
const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:3030";

/// Posts events to a running Pulse server.
#[derive(Clone)]
pub struct HttpPublisher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPublisher {
    /// Create a publisher with default settings.
    ///
    /// Uses the `PULSE_URL` environment variable if set,
    /// otherwise defaults to `http://127.0.0.1:3030`.
    pub fn new() -> Self {
        let base_url =
            std::env::var("PULSE_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());
        Self::with_url(&base_url)
    }

    /// Create a publisher with a custom base URL.
    pub fn with_url(base_url: &str) -> Self {
        debug!(base_url = %base_url, "HttpPublisher initialized");
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(2))
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self) -> String {
        format!("{}/internal/publish", self.base_url)
    }

    /// Post `event` and report whether the server accepted it.
    pub async fn try_publish(&self, event: &Event) -> ClientResult<()> {
        let response = self.client.post(self.endpoint()).json(event).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ClientError::Rejected(response.status().as_u16()))
        }
    }

    /// Post `event`, logging instead of failing.
    pub async fn publish(&self, event: &Event) {
        let kind = event.kind();
        match self.try_publish(event).await {
            Ok(()) => debug!(%kind, "Event published"),
            Err(ClientError::Rejected(status)) => {
                warn!(%kind, status_code = status, "Event publish rejected")
            }
            Err(e) => {
                // Expected when no server is running.
                debug!(%kind, error = %e, url = %self.endpoint(), "Failed to publish event");
            }
        }
    }
}

impl Default for HttpPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::event::EventPayload;

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let publisher = HttpPublisher::with_url("http://pulse.internal:8080/");
        assert_eq!(publisher.base_url(), "http://pulse.internal:8080");
        assert_eq!(publisher.endpoint(), "http://pulse.internal:8080/internal/publish");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_an_error_not_a_panic() {
        let publisher = HttpPublisher::with_url("http://127.0.0.1:9");
        let event = Event::new(EventPayload::TaskDeleted {
            task_id: "t1".to_string(),
            project_id: Some("p1".to_string()),
        });
        assert!(publisher.try_publish(&event).await.is_err());
        publisher.publish(&event).await;
    }
}
