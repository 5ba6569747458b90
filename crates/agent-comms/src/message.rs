//! Wire envelope exchanged with agent endpoints
//!
//! ```json
//! {"timestamp": "...", "messageId": "...", "content": [{"type": "text", "text": "..."}], "ackId": "..."}
//! ```
//!
//! Outbound requests carry their correlation id as `messageId`. Replies echo
//! it back in `ackId`; unsolicited pushes leave `ackId` out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One part of an envelope's content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Text { text: String },
}

/// Message envelope on the agent transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub timestamp: DateTime<Utc>,

    /// Message ID; doubles as the correlation id for requests
    pub message_id: String,

    pub content: Vec<ContentPart>,

    /// ID of the request this envelope answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_id: Option<String>,
}

impl Envelope {
    /// Create a text envelope with the given message id
    pub fn text<I: Into<String>, T: Into<String>>(message_id: I, text: T) -> Self {
        Self {
            timestamp: Utc::now(),
            message_id: message_id.into(),
            content: vec![ContentPart::Text { text: text.into() }],
            ack_id: None,
        }
    }

    /// Create a reply to `request`
    pub fn reply_to<T: Into<String>>(request: &Envelope, text: T) -> Self {
        Self {
            timestamp: Utc::now(),
            message_id: uuid::Uuid::new_v4().to_string(),
            content: vec![ContentPart::Text { text: text.into() }],
            ack_id: Some(request.message_id.clone()),
        }
    }

    /// Concatenated text of all text parts
    pub fn body(&self) -> String {
        self.content
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}
