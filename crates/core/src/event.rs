//! Progress events pushed to an external observer.

use serde::{Deserialize, Serialize};

use crate::error::{Classification, KeelError};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    pub operation_id: String,
    /// Adapter type, e.g. `consul`.
    pub component: String,
    /// Adapter instance name.
    pub component_name: String,
    pub summary: String,
    pub details: String,
    /// RFC 3339 creation time.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probable_cause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_remediation: Option<String>,
}

impl ProgressEvent {
    pub fn new(operation_id: impl Into<String>, component: impl Into<String>, component_name: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            component: component.into(),
            component_name: component_name.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            ..Default::default()
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>, details: impl Into<String>) -> Self {
        self.summary = summary.into();
        self.details = details.into();
        self
    }

    /// Turn this event into a failure record for `err`.
    pub fn failed(mut self, summary: impl Into<String>, err: &KeelError, class: Classification) -> Self {
        self.summary = summary.into();
        self.details = err.to_string();
        self.timestamp = chrono::Utc::now().to_rfc3339();
        self.error_code = Some(class.code);
        self.probable_cause = Some(class.probable_cause);
        self.suggested_remediation = Some(class.suggested_remediation);
        self
    }

    pub fn is_failure(&self) -> bool { self.error_code.is_some() }
}

/// Observer receiving progress events. `error` always carries classification
/// metadata on the event.
pub trait EventSink: Send + Sync {
    fn info(&self, event: ProgressEvent);
    fn error(&self, event: ProgressEvent, err: &KeelError);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_event_carries_classification() {
        let err = KeelError::Install("helm exited with 1".into());
        let class = Classification { code: 7, probable_cause: "c".into(), suggested_remediation: "r".into() };
        let ev = ProgressEvent::new("op", "consul", "keel-consul").failed("Error while deploying", &err, class);
        assert!(ev.is_failure());
        assert_eq!(ev.details, "chart install failed: helm exited with 1");
        assert_eq!(ev.error_code, Some(7));
        assert_eq!(ev.probable_cause.as_deref(), Some("c"));
    }

    #[test]
    fn info_event_omits_failure_fields_in_json() {
        let ev = ProgressEvent::new("op", "consul", "keel-consul").with_summary("Deploying", "None");
        let v = serde_json::to_value(&ev).unwrap();
        assert!(v.get("error_code").is_none());
        assert_eq!(v["summary"], "Deploying");
    }
}
