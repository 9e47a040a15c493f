//! Channel payload shapes and the live notification frame.
//!
//! Each delivery channel declares the JSON shape it expects under the
//! envelope's `payload` key. The dispatcher binds the raw payload into one of
//! these types before the handler runs.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// `type = SMS`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SmsPayload {
    pub phone_number: String,
    pub content: String,
}

/// `type = PUSH`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub device_token: String,
    pub title: String,
    pub message: String,
}

/// `type = TELEGRAM`. Both fields are optional on the wire: a missing chat id
/// falls back to the configured default chat, a missing message sends empty text.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TelegramPayload {
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// `type = WEB`, delivered over the live socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebPayload {
    pub title: String,
    pub message: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Notification body pushed to a connected client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveNotification {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub entity_id: Option<String>,
    pub read: bool,
    pub deleted: bool,
    pub created_time: String,
    pub severity: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl LiveNotification {
    /// Builds a fresh, unread notification. Severity comes from
    /// `metadata.severity` and defaults to `INFO`.
    pub fn from_payload(payload: &WebPayload) -> Self {
        let severity = match payload.metadata.get("severity") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => "INFO".to_string(),
            Some(other) => other.to_string(),
        };

        Self {
            id: Uuid::new_v4(),
            title: payload.title.clone(),
            message: payload.message.clone(),
            kind: payload.kind.clone(),
            entity_id: payload.entity_id.clone(),
            read: false,
            deleted: false,
            created_time: Utc::now().to_rfc3339(),
            severity,
            metadata: payload.metadata.clone(),
        }
    }
}

/// Server-to-client frame: `{"type": "NOTIFICATION", "payload": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "UPPERCASE")]
pub enum SocketFrame {
    Notification(LiveNotification),
}
