//! Untyped inbound notification envelope.
//!
//! The envelope is kept as raw JSON until the dispatcher has resolved which
//! handler owns it. Field resolution follows two rules: `type` and `userId`
//! are load-bearing and reject the request when malformed, while
//! `correlationId` and `priority` degrade to generated/default values.

use crate::error::{NotifyError, NotifyResult};
use crate::types::Priority;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEnvelope(Value);

impl NotificationEnvelope {
    pub fn new(raw: Value) -> Self {
        Self(raw)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    fn field(&self, name: &str) -> Option<&Value> {
        self.0.get(name).filter(|v| !v.is_null())
    }

    /// Raw `type` string. Non-string scalars are rendered so that they fail
    /// later as an unknown type rather than a missing one.
    pub fn notification_type(&self) -> NotifyResult<String> {
        match self.field("type") {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Object(_)) | Some(Value::Array(_)) | None => {
                Err(NotifyError::MissingField("type"))
            }
            Some(other) => Ok(other.to_string()),
        }
    }

    /// The channel payload; absent payloads bind as JSON `null`.
    pub fn payload(&self) -> Value {
        self.0.get("payload").cloned().unwrap_or(Value::Null)
    }

    /// Parses `correlationId`, generating a fresh id when it is absent,
    /// non-textual or not a UUID. Never fails.
    pub fn resolve_correlation_id(&self) -> Uuid {
        match self.field("correlationId") {
            Some(Value::String(raw)) => match Uuid::parse_str(raw) {
                Ok(id) => {
                    debug!(correlation_id = %id, "Parsed correlation id from request");
                    id
                }
                Err(e) => {
                    let id = Uuid::new_v4();
                    warn!(
                        received = %raw,
                        correlation_id = %id,
                        error = %e,
                        "Invalid correlation id, generated a new one"
                    );
                    id
                }
            },
            _ => {
                let id = Uuid::new_v4();
                debug!(correlation_id = %id, "Correlation id missing, generated a new one");
                id
            }
        }
    }

    /// Case-insensitive priority; anything unparseable becomes MEDIUM.
    pub fn resolve_priority(&self, correlation_id: Uuid) -> Priority {
        let raw = match self.field("priority") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => return Priority::Medium,
        };
        raw.parse().unwrap_or_else(|_| {
            warn!(
                received = %raw,
                correlation_id = %correlation_id,
                "Invalid priority, defaulting to MEDIUM"
            );
            Priority::Medium
        })
    }

    /// `userId` must be a UUID string.
    pub fn resolve_user_id(&self, correlation_id: Uuid) -> NotifyResult<Uuid> {
        let raw = match self.field("userId") {
            Some(Value::String(s)) => s,
            other => {
                let shown = other.map(Value::to_string).unwrap_or_else(|| "null".into());
                warn!(
                    correlation_id = %correlation_id,
                    received = %shown,
                    "userId is not textual"
                );
                return Err(NotifyError::BadRequest(format!(
                    "Expected UUID string for userId, got: {shown}"
                )));
            }
        };

        Uuid::parse_str(raw).map_err(|e| {
            warn!(
                correlation_id = %correlation_id,
                received = %raw,
                error = %e,
                "Invalid UUID format for userId"
            );
            NotifyError::BadRequest("Invalid UUID format for userId".to_string())
        })
    }

    pub fn source_app(&self) -> String {
        match self.field("sourceApp") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "unknown".to_string(),
        }
    }

    pub fn retry_count(&self) -> u32 {
        match self.field("retryCount") {
            Some(Value::Number(n)) => n.as_u64().map(|v| v.min(u32::MAX as u64) as u32).unwrap_or(0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    /// Epoch milliseconds, defaulting to now.
    pub fn timestamp_ms(&self) -> i64 {
        match self.field("timestamp") {
            Some(Value::Number(n)) => n.as_i64().unwrap_or_else(|| Utc::now().timestamp_millis()),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .unwrap_or_else(|_| Utc::now().timestamp_millis()),
            _ => Utc::now().timestamp_millis(),
        }
    }

    /// Fills `userId` when the caller left it out. Returns true if it was set.
    pub fn default_user_id(&mut self, user_id: Uuid) -> bool {
        match &mut self.0 {
            Value::Object(map) if map.get("userId").map_or(true, Value::is_null) => {
                map.insert("userId".into(), Value::String(user_id.to_string()));
                true
            }
            _ => false,
        }
    }

    /// Overwrites `correlationId`. No-op for non-object envelopes.
    pub fn set_correlation_id(&mut self, correlation_id: Uuid) {
        if let Value::Object(map) = &mut self.0 {
            map.insert(
                "correlationId".into(),
                Value::String(correlation_id.to_string()),
            );
        }
    }
}

impl From<Value> for NotificationEnvelope {
    fn from(raw: Value) -> Self {
        Self::new(raw)
    }
}
