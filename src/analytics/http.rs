//! Analytics sink posting events to a capture endpoint.
//!
//! Each event is sent on its own spawned task so tracking never waits on the
//! network. Delivery failures are logged at debug level and dropped.

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use super::{AnalyticsEvent, AnalyticsSink, PropertyValue};
use crate::error::AnalyticsError;

#[derive(Serialize)]
struct CapturePayload<'a> {
    api_key: &'a str,
    event: &'a str,
    distinct_id: String,
    timestamp: String,
    properties: &'a std::collections::BTreeMap<String, PropertyValue>,
}

/// Posts `{api_key, event, distinct_id, properties}` to `{host}/capture/`.
pub struct HttpAnalytics {
    endpoint: String,
    api_key: SecretString,
    client: reqwest::Client,
}

impl HttpAnalytics {
    pub fn new(host: impl Into<String>, api_key: SecretString) -> Self {
        let host = host.into();
        Self {
            endpoint: format!("{}/capture/", host.trim_end_matches('/')),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn payload(&self, event: &AnalyticsEvent) -> Result<serde_json::Value, AnalyticsError> {
        let payload = CapturePayload {
            api_key: self.api_key.expose_secret(),
            event: &event.name,
            distinct_id: event.flow_id.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            properties: &event.properties,
        };
        Ok(serde_json::to_value(payload)?)
    }
}

impl AnalyticsSink for HttpAnalytics {
    fn track(&self, event: &AnalyticsEvent) -> Result<(), AnalyticsError> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| AnalyticsError::Transport(format!("no async runtime: {e}")))?;
        let body = self.payload(event)?;
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let name = event.name.clone();

        handle.spawn(async move {
            match client.post(&endpoint).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(event = %name, "Analytics event delivered");
                }
                Ok(resp) => {
                    tracing::debug!(
                        event = %name,
                        status = resp.status().as_u16(),
                        "Analytics endpoint rejected event"
                    );
                }
                Err(e) => {
                    tracing::debug!(event = %name, error = %e, "Analytics delivery failed");
                }
            }
        });
        Ok(())
    }
}
