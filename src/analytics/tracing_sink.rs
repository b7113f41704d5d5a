//! Analytics sink that writes events to the structured log.

use tracing::info;

use super::{AnalyticsEvent, AnalyticsSink};
use crate::error::AnalyticsError;

/// Logs every event at info level under the `analytics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAnalytics;

impl TracingAnalytics {
    pub fn new() -> Self {
        Self
    }
}

impl AnalyticsSink for TracingAnalytics {
    fn track(&self, event: &AnalyticsEvent) -> Result<(), AnalyticsError> {
        let properties = serde_json::to_string(&event.properties)?;
        info!(
            target: "analytics",
            event = %event.name,
            flow_id = %event.flow_id,
            properties = %properties,
            "Analytics event"
        );
        Ok(())
    }
}
