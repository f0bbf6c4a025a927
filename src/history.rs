use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Most recent messages kept when replaying history to the generation API.
/// Oldest entries are dropped first so the prompt budget stays bounded.
pub const HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }

    fn from_wire(raw: &str) -> Self {
        match raw {
            "model" | "assistant" => Self::Model,
            _ => Self::User,
        }
    }
}

/// One turn's message. Serialized in the Gemini wire shape
/// `{"role": ..., "parts": [{"text": ...}]}` on the HTTP surface and in
/// persisted transcript records alike.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireMessage", into = "WireMessage")]
pub struct Message {
    pub role: Role,
    pub text: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WirePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    parts: Vec<WirePart>,
}

impl From<WireMessage> for Message {
    fn from(wire: WireMessage) -> Self {
        let text: String = wire.parts.into_iter().map(|part| part.text).collect();
        Self {
            role: Role::from_wire(&wire.role),
            text,
        }
    }
}

impl From<Message> for WireMessage {
    fn from(message: Message) -> Self {
        Self {
            role: message.role.as_str().to_string(),
            parts: vec![WirePart { text: message.text }],
        }
    }
}

/// Coerce a raw `conversationHistory` JSON value into a conversation.
/// Anything that is not an array yields an empty conversation; array entries
/// that do not parse as wire messages are skipped.
pub fn coerce_wire(value: &Value) -> Vec<Message> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| serde_json::from_value::<Message>(item.clone()).ok())
        .collect()
}

/// Return the most recent `HISTORY_LIMIT` messages, order preserved.
pub fn bound(history: &[Message]) -> Vec<Message> {
    let start = history.len().saturating_sub(HISTORY_LIMIT);
    history[start..].to_vec()
}
