use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio_tungstenite::tungstenite::Message;

/// Reserved sender name for relay-originated notices.
pub const SYSTEM_SENDER: &str = "SYSTEM";

pub const AUTH_FAILED: &str = "auth_failed";
pub const AUTH_SUCCESS: &str = "auth_success";

/// First frame a client sends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthRequest {
    pub token: String,
}

/// The relay's answer to [`AuthRequest`]. Only `auth_failed` carries meaning
/// for the client; any other shape counts as success.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthReply {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuthReply {
    pub fn success() -> Self {
        Self {
            kind: Some(AUTH_SUCCESS.to_string()),
            message: Some("Authenticated".to_string()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            kind: Some(AUTH_FAILED.to_string()),
            message: Some(message.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.kind.as_deref() == Some(AUTH_FAILED)
    }
}

/// Client → relay chat message. `to: None` is a broadcast and is sent as an
/// explicit `null`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatRequest {
    #[serde(default)]
    pub to: Option<String>,
    pub content: String,
}

impl ChatRequest {
    pub fn broadcast(content: impl Into<String>) -> Self {
        Self {
            to: None,
            content: content.into(),
        }
    }

    pub fn direct(to: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            to: Some(to.into()),
            content: content.into(),
        }
    }
}

/// Relay → client chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatDelivery {
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    pub content: String,
}

impl ChatDelivery {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            from: SYSTEM_SENDER.to_string(),
            to: None,
            content: content.into(),
        }
    }

    pub fn system_to(recipient: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            from: SYSTEM_SENDER.to_string(),
            to: Some(recipient.into()),
            content: content.into(),
        }
    }

    /// Decides how the message should be presented. A `SYSTEM` sender wins
    /// over an explicit recipient.
    pub fn classify(self) -> Incoming {
        let ChatDelivery { from, to, content } = self;
        if from == SYSTEM_SENDER {
            Incoming::System { content }
        } else if to.is_some() {
            Incoming::Direct { from, content }
        } else {
            Incoming::Broadcast { from, content }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    System { content: String },
    Direct { from: String, content: String },
    Broadcast { from: String, content: String },
}

impl fmt::Display for Incoming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Incoming::System { content } => write!(f, "[SYSTEM] {content}"),
            Incoming::Direct { from, content } => write!(f, "[DM from {from}] {content}"),
            Incoming::Broadcast { from, content } => write!(f, "[{from}] {content}"),
        }
    }
}

/// One envelope per WebSocket text frame.
pub fn encode<T: Serialize>(envelope: &T) -> Result<Message, serde_json::Error> {
    Ok(Message::text(serde_json::to_string(envelope)?))
}

pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(text)
}

/// Text payload of a data frame; control and binary frames yield `None`.
pub fn frame_text(frame: &Message) -> Option<&str> {
    match frame {
        Message::Text(text) => Some(text.as_str()),
        _ => None,
    }
}
