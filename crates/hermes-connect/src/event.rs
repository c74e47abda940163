//! Event envelope
//!
//! The envelope is the single message format for all control-plane traffic.
//! The `context` field is a correlation id tying together every event of one
//! logical workflow execution; follow-up events built with [`Event::reply_to`]
//! inherit it from the event that triggered them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// An event as carried on the broker and the registry API.
///
/// `data` is kept untyped; consumers decode the slice of it they care
/// about. The scoped fields used for filtering are exposed via
/// [`Event::scope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event id
    pub id: String,
    /// Event type, also the broker topic the event travels on
    #[serde(rename = "type")]
    pub event_type: String,
    /// Producing service
    pub source: String,
    /// Untyped payload
    pub data: serde_json::Value,
    /// Correlation id shared by all events of one workflow execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Id of the event this one is a response to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_id: Option<String>,
    /// Creation timestamp
    pub time: DateTime<Utc>,
}

impl Event {
    /// Create a new event opening a fresh correlation context.
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            source: source.into(),
            data,
            context: Some(Uuid::new_v4().to_string()),
            triggered_id: None,
            time: Utc::now(),
        }
    }

    /// Create a follow-up event for `trigger`.
    ///
    /// The correlation context is carried over (falling back to the trigger's
    /// own id when it has none) and `triggered_id` points at the trigger, so
    /// "task started" and "task finished" events stay attached to the
    /// workflow execution that caused them.
    #[must_use]
    pub fn reply_to(
        trigger: &Event,
        event_type: impl Into<String>,
        source: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            source: source.into(),
            data,
            context: trigger
                .context
                .clone()
                .or_else(|| Some(trigger.id.clone())),
            triggered_id: Some(trigger.id.clone()),
            time: Utc::now(),
        }
    }

    /// Decode the scoped fields of the payload.
    ///
    /// # Errors
    ///
    /// Fails when `data` is not a JSON object.
    pub fn scope(&self) -> Result<EventScope> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// The scope an event applies to, used for subscription filtering.
///
/// Missing fields decode as empty strings so a scoped filter can reject
/// events that do not carry the dimension at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EventScope {
    /// Project the event belongs to
    #[serde(default)]
    pub project: String,
    /// Stage the event belongs to
    #[serde(default)]
    pub stage: String,
    /// Service the event belongs to
    #[serde(default)]
    pub service: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_event_opens_context() {
        let event = Event::new("hermes.event.deployment.triggered", "shipyard", json!({}));
        assert!(event.context.is_some());
        assert!(event.triggered_id.is_none());
        assert!(!event.id.is_empty());
    }

    #[test]
    fn test_reply_to_carries_context() {
        let trigger = Event::new(
            "hermes.event.deployment.triggered",
            "shipyard",
            json!({"project": "pr1"}),
        );
        let reply = Event::reply_to(
            &trigger,
            "hermes.event.deployment.started",
            "helm-service",
            json!({"project": "pr1"}),
        );

        assert_eq!(reply.context, trigger.context);
        assert_eq!(reply.triggered_id.as_deref(), Some(trigger.id.as_str()));
        assert_ne!(reply.id, trigger.id);
    }

    #[test]
    fn test_reply_to_falls_back_to_trigger_id() {
        let mut trigger = Event::new("hermes.event.test.triggered", "src", json!({}));
        trigger.context = None;
        let reply = Event::reply_to(&trigger, "hermes.event.test.started", "src", json!({}));
        assert_eq!(reply.context.as_deref(), Some(trigger.id.as_str()));
    }

    #[test]
    fn test_scope_decodes_known_fields() {
        let event = Event::new(
            "hermes.event.deployment.triggered",
            "shipyard",
            json!({"project": "pr1", "stage": "dev", "service": "carts", "image": "x:1"}),
        );
        let scope = event.scope().unwrap();
        assert_eq!(scope.project, "pr1");
        assert_eq!(scope.stage, "dev");
        assert_eq!(scope.service, "carts");
    }

    #[test]
    fn test_scope_defaults_missing_fields() {
        let event = Event::new("hermes.event.test.triggered", "src", json!({"project": "pr1"}));
        let scope = event.scope().unwrap();
        assert_eq!(scope.project, "pr1");
        assert_eq!(scope.stage, "");
    }

    #[test]
    fn test_scope_fails_on_non_object_payload() {
        let event = Event::new("hermes.event.test.triggered", "src", json!("just a string"));
        assert!(event.scope().is_err());
    }

    #[test]
    fn test_envelope_round_trip() {
        let event = Event::new(
            "hermes.event.deployment.triggered",
            "shipyard",
            json!({"project": "pr1"}),
        );
        let encoded = serde_json::to_vec(&event).unwrap();
        let decoded: Event = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_type_field_name_on_the_wire() {
        let event = Event::new("hermes.event.test.triggered", "src", json!({}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "hermes.event.test.triggered");
    }
}
