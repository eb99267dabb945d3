//! Message, MessageType, and Priority data model.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Closed set of message types. Unknown types never appear on the wire from
/// this crate's own publishers but are still routable via predicate
/// subscriptions — only the type-indexed fast path requires membership here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[serde(rename = "task:submit")]
    TaskSubmit,
    #[serde(rename = "task:status")]
    TaskStatus,
    #[serde(rename = "task:result")]
    TaskResult,
    #[serde(rename = "task:cancel")]
    TaskCancel,
    #[serde(rename = "agent:status")]
    AgentStatus,
    #[serde(rename = "agent:event")]
    AgentEvent,
    #[serde(rename = "system:health")]
    SystemHealth,
    #[serde(rename = "system:config")]
    SystemConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// An immutable, published message. Construct via [`MessageBuilder`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub source: String,
    pub target: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: Priority,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "correlationId", skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(rename = "expiresAt", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

fn random_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::rng();
    let suffix: String = (0..12)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect();
    format!("acp-{suffix}")
}

#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    message_type: Option<MessageType>,
    source: Option<String>,
    target: Option<String>,
    payload: Option<serde_json::Value>,
    priority: Priority,
    correlation_id: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl MessageBuilder {
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type: Some(message_type),
            priority: Priority::Normal,
            ..Default::default()
        }
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn build(self) -> Message {
        Message {
            id: random_id(),
            message_type: self.message_type.expect("message_type is required"),
            source: self.source.unwrap_or_default(),
            target: self.target.unwrap_or_default(),
            payload: self.payload.unwrap_or(serde_json::Value::Null),
            priority: self.priority,
            timestamp: Utc::now(),
            correlation_id: self.correlation_id,
            expires_at: self.expires_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_preserves_fields_and_defaults_priority_normal() {
        let msg = MessageBuilder::new(MessageType::TaskSubmit)
            .source("t")
            .target("u")
            .payload(serde_json::json!({"x": 1}))
            .build();
        assert_eq!(msg.source, "t");
        assert_eq!(msg.target, "u");
        assert_eq!(msg.priority, Priority::Normal);
        assert!(msg.id.starts_with("acp-"));
    }

    #[test]
    fn ids_are_unique_with_overwhelming_probability() {
        let a = MessageBuilder::new(MessageType::TaskSubmit).build();
        let b = MessageBuilder::new(MessageType::TaskSubmit).build();
        assert_ne!(a.id, b.id);
    }
}
