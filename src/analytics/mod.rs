//! Analytics: one abstract event sink in front of whichever providers the
//! page loads.
//!
//! Tracking is fire-and-forget: sinks must not block, and the controller
//! logs and drops any error a sink returns.

pub mod http;
pub mod tracing_sink;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::error::AnalyticsError;

pub use http::HttpAnalytics;
pub use tracing_sink::TracingAnalytics;

/// Event names emitted by the signup flow.
pub mod events {
    pub const FLOW_STARTED: &str = "signup_flow_started";
    pub const STEP_VIEWED: &str = "signup_step_viewed";
    pub const STEP_COMPLETED: &str = "signup_step_completed";
    pub const FLOW_COMPLETED: &str = "signup_flow_completed";
    pub const FLOW_ABANDONED: &str = "signup_flow_abandoned";
    pub const SUBMISSION_FAILED: &str = "signup_submission_failed";
}

/// A primitive event property.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for PropertyValue {
    fn from(v: u64) -> Self {
        Self::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<usize> for PropertyValue {
    fn from(v: usize) -> Self {
        Self::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

/// A named event with primitive properties.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsEvent {
    pub name: String,
    pub flow_id: Uuid,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl AnalyticsEvent {
    pub fn new(name: impl Into<String>, flow_id: Uuid) -> Self {
        Self {
            name: name.into(),
            flow_id,
            properties: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }
}

/// Destination for analytics events.
pub trait AnalyticsSink: Send + Sync {
    fn track(&self, event: &AnalyticsEvent) -> Result<(), AnalyticsError>;
}

/// Delivers each event to every inner sink; one failing sink does not stop
/// the others. Returns the first error seen.
#[derive(Default)]
pub struct FanoutAnalytics {
    sinks: Vec<Arc<dyn AnalyticsSink>>,
}

impl FanoutAnalytics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, sink: Arc<dyn AnalyticsSink>) {
        self.sinks.push(sink);
    }

    pub fn with(mut self, sink: Arc<dyn AnalyticsSink>) -> Self {
        self.add(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl AnalyticsSink for FanoutAnalytics {
    fn track(&self, event: &AnalyticsEvent) -> Result<(), AnalyticsError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.track(event) {
                tracing::debug!(event = %event.name, error = %e, "Analytics sink failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<String>>);

    impl AnalyticsSink for Recording {
        fn track(&self, event: &AnalyticsEvent) -> Result<(), AnalyticsError> {
            self.0.lock().unwrap().push(event.name.clone());
            Ok(())
        }
    }

    struct Broken;

    impl AnalyticsSink for Broken {
        fn track(&self, _event: &AnalyticsEvent) -> Result<(), AnalyticsError> {
            Err(AnalyticsError::Transport("offline".into()))
        }
    }

    #[test]
    fn properties_serialize_as_primitives() {
        let event = AnalyticsEvent::new(events::STEP_COMPLETED, Uuid::nil())
            .with("step_index", 2usize)
            .with("step_name", "excitement")
            .with("seeded", true)
            .with("ratio", 0.5);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["properties"]["step_index"], 2);
        assert_eq!(json["properties"]["step_name"], "excitement");
        assert_eq!(json["properties"]["seeded"], true);
        assert_eq!(json["properties"]["ratio"], 0.5);
    }

    #[test]
    fn fanout_delivers_past_a_failing_sink() {
        let recording = Arc::new(Recording::default());
        let fanout = FanoutAnalytics::new()
            .with(Arc::new(Broken))
            .with(recording.clone());

        let result = fanout.track(&AnalyticsEvent::new(events::FLOW_STARTED, Uuid::nil()));
        assert!(result.is_err());
        assert_eq!(
            *recording.0.lock().unwrap(),
            vec![events::FLOW_STARTED.to_string()]
        );
        assert_eq!(fanout.len(), 2);
    }

    #[test]
    fn empty_fanout_is_ok() {
        let fanout = FanoutAnalytics::new();
        assert!(fanout.is_empty());
        assert!(fanout
            .track(&AnalyticsEvent::new(events::FLOW_STARTED, Uuid::nil()))
            .is_ok());
    }
}
