use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

// ─── Rate policy ────────────────────────────────────────────────────────────

/// Service tier. Each plan refills its standard bucket with a fixed number of
/// tokens per one-minute window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Plan {
    Basic,
    Premium,
    Enterprise,
}

impl Plan {
    pub fn tokens_per_minute(&self) -> u32 {
        match self {
            Plan::Basic => 2,
            Plan::Premium => 5,
            Plan::Enterprise => 200,
        }
    }

    /// Capacity of the "high" bucket: 25% above the base rate, truncated.
    pub fn high_priority_tokens(&self) -> u32 {
        self.tokens_per_minute() * 5 / 4
    }

    pub fn capacity_for(&self, tier: TierClass) -> u32 {
        match tier {
            TierClass::Standard => self.tokens_per_minute(),
            TierClass::High => self.high_priority_tokens(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Basic => "BASIC",
            Plan::Premium => "PREMIUM",
            Plan::Enterprise => "ENTERPRISE",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BASIC" => Ok(Plan::Basic),
            "PREMIUM" => Ok(Plan::Premium),
            "ENTERPRISE" => Ok(Plan::Enterprise),
            other => Err(format!("unknown plan '{other}'")),
        }
    }
}

/// Request urgency. The ordinal is only used for comparison and logging;
/// bucket selection and bypass rules live in the admission controller.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Standard,
    Critical,
}

impl Priority {
    pub fn ordinal(&self) -> u8 {
        match self {
            Priority::Low => 1,
            Priority::Medium => 2,
            Priority::High => 3,
            Priority::Standard => 4,
            Priority::Critical => 5,
        }
    }

    pub fn tier(&self) -> TierClass {
        match self {
            Priority::High => TierClass::High,
            _ => TierClass::Standard,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
            Priority::Standard => "STANDARD",
            Priority::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    /// Case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(Priority::Low),
            "MEDIUM" => Ok(Priority::Medium),
            "HIGH" => Ok(Priority::High),
            "STANDARD" => Ok(Priority::Standard),
            "CRITICAL" => Ok(Priority::Critical),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// Bucket class a priority draws from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TierClass {
    Standard,
    High,
}

impl TierClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierClass::Standard => "standard",
            TierClass::High => "high",
        }
    }
}

// ─── Channels & responses ───────────────────────────────────────────────────

/// Delivery channel, selected by the envelope's `type` field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    Sms,
    Push,
    Telegram,
    Web,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Sms, Channel::Push, Channel::Telegram, Channel::Web];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "SMS",
            Channel::Push => "PUSH",
            Channel::Telegram => "TELEGRAM",
            Channel::Web => "WEB",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    /// Exact match on the upper-case wire name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown notification type '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationStatus {
    Success,
    Failure,
}

/// Outcome of a handler invocation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NotificationResponse {
    pub delivered: bool,
    pub status: NotificationStatus,
    pub channel: Channel,
    pub correlation_id: Uuid,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
}

impl NotificationResponse {
    pub fn success(channel: Channel, correlation_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            delivered: true,
            status: NotificationStatus::Success,
            channel,
            correlation_id,
            message: message.into(),
            provider_message_id: None,
        }
    }

    pub fn failure(channel: Channel, correlation_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            delivered: false,
            status: NotificationStatus::Failure,
            channel,
            correlation_id,
            message: message.into(),
            provider_message_id: None,
        }
    }

    pub fn with_provider_message_id(mut self, id: Option<String>) -> Self {
        self.provider_message_id = id;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == NotificationStatus::Success
    }
}

// ─── Canonical request ──────────────────────────────────────────────────────

/// Metadata resolved from an envelope before the handler runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMeta {
    pub channel: Channel,
    pub user_id: Uuid,
    pub correlation_id: Uuid,
    pub priority: Priority,
    pub source_app: String,
    pub retry_count: u32,
    pub timestamp_ms: i64,
}

impl RequestMeta {
    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp_ms)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// A validated, typed notification request. Built once by the dispatcher and
/// handed to a handler by value.
#[derive(Debug, Clone)]
pub struct CanonicalRequest<P> {
    meta: RequestMeta,
    payload: P,
}

impl<P> CanonicalRequest<P> {
    pub fn new(meta: RequestMeta, payload: P) -> Self {
        Self { meta, payload }
    }

    pub fn meta(&self) -> &RequestMeta {
        &self.meta
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn channel(&self) -> Channel {
        self.meta.channel
    }

    pub fn user_id(&self) -> Uuid {
        self.meta.user_id
    }

    pub fn correlation_id(&self) -> Uuid {
        self.meta.correlation_id
    }

    pub fn priority(&self) -> Priority {
        self.meta.priority
    }

    pub fn retry_count(&self) -> u32 {
        self.meta.retry_count
    }

    pub fn into_parts(self) -> (RequestMeta, P) {
        (self.meta, self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_capacities() {
        assert_eq!(Plan::Basic.capacity_for(TierClass::Standard), 2);
        assert_eq!(Plan::Basic.capacity_for(TierClass::High), 2);
        assert_eq!(Plan::Premium.capacity_for(TierClass::High), 6);
        assert_eq!(Plan::Enterprise.capacity_for(TierClass::High), 250);
    }

    #[test]
    fn test_priority_parse_is_case_insensitive() {
        assert_eq!("critical".parse::<Priority>().unwrap(), Priority::Critical);
        assert_eq!("High".parse::<Priority>().unwrap(), Priority::High);
        assert!("bogus".parse::<Priority>().is_err());
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn test_only_high_maps_to_high_tier() {
        assert_eq!(Priority::High.tier(), TierClass::High);
        for p in [Priority::Low, Priority::Medium, Priority::Standard, Priority::Critical] {
            assert_eq!(p.tier(), TierClass::Standard);
        }
    }

    #[test]
    fn test_channel_parse_is_exact() {
        assert_eq!("SMS".parse::<Channel>().unwrap(), Channel::Sms);
        assert_eq!("WEB".parse::<Channel>().unwrap(), Channel::Web);
        assert!("sms".parse::<Channel>().is_err());
        assert!("FAX".parse::<Channel>().is_err());
    }

    #[test]
    fn test_response_serializes_camel_case() {
        let id = Uuid::new_v4();
        let resp = NotificationResponse::success(Channel::Push, id, "ok");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["correlationId"], id.to_string());
        assert_eq!(json["status"], "SUCCESS");
        assert_eq!(json["channel"], "PUSH");
        assert!(json.get("providerMessageId").is_none());
    }
}
