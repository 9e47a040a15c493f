use crate::types::{Plan, Priority};
use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `NOTIFIER__` and an optional TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub sms: SmsConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Plan and priority applied at each enforcement point.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_plan")]
    pub sms_plan: Plan,
    #[serde(default = "default_sms_priority")]
    pub sms_priority: Priority,
    #[serde(default = "default_plan")]
    pub ingress_plan: Plan,
    #[serde(default = "default_ingress_priority")]
    pub ingress_priority: Priority,
    #[serde(default = "default_internal_priority")]
    pub internal_priority: Priority,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Base64-encoded HMAC key used to verify HS256 bearer tokens.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    /// Audience required on internal-service tokens.
    #[serde(default = "default_audience")]
    pub audience: String,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SmsProviderKind {
    Twilio,
    Infobip,
    Nexmo,
}

impl std::str::FromStr for SmsProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "twilio" => Ok(SmsProviderKind::Twilio),
            "infobip" => Ok(SmsProviderKind::Infobip),
            "nexmo" | "vonage" => Ok(SmsProviderKind::Nexmo),
            other => Err(format!("unknown SMS provider '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmsConfig {
    #[serde(default = "default_sms_provider")]
    pub provider: SmsProviderKind,
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub twilio: TwilioConfig,
    #[serde(default)]
    pub infobip: InfobipConfig,
    #[serde(default)]
    pub nexmo: NexmoConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwilioConfig {
    #[serde(default)]
    pub account_sid: String,
    #[serde(default)]
    pub auth_token: String,
    #[serde(default)]
    pub from_number: String,
    #[serde(default = "default_twilio_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InfobipConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_infobip_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub sender: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NexmoConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub from: String,
    #[serde(default = "default_nexmo_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
    #[serde(default = "default_telegram_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_telegram_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
}

/// Worker pool serving asynchronous dispatch, and the backoff applied when
/// its queue is full.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_submit_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

// Default functions
fn default_node_id() -> String {
    "notifier-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_plan() -> Plan {
    Plan::Basic
}
fn default_sms_priority() -> Priority {
    Priority::Low
}
fn default_ingress_priority() -> Priority {
    Priority::Standard
}
fn default_internal_priority() -> Priority {
    Priority::High
}
fn default_jwt_secret() -> String {
    // base64("notifier-development-signing-key"); override in every deployment.
    "bm90aWZpZXItZGV2ZWxvcG1lbnQtc2lnbmluZy1rZXk=".to_string()
}
fn default_audience() -> String {
    "notification-service".to_string()
}
fn default_sms_provider() -> SmsProviderKind {
    SmsProviderKind::Twilio
}
fn default_provider_timeout_ms() -> u64 {
    10_000
}
fn default_twilio_base_url() -> String {
    "https://api.twilio.com".to_string()
}
fn default_infobip_base_url() -> String {
    "https://api.infobip.com".to_string()
}
fn default_nexmo_base_url() -> String {
    "https://rest.nexmo.com".to_string()
}
fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}
fn default_telegram_attempts() -> u32 {
    3
}
fn default_telegram_retry_delay_ms() -> u64 {
    2000
}
fn default_workers() -> usize {
    10
}
fn default_queue_capacity() -> usize {
    200
}
fn default_submit_retries() -> u32 {
    5
}
fn default_initial_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            sms_plan: default_plan(),
            sms_priority: default_sms_priority(),
            ingress_plan: default_plan(),
            ingress_priority: default_ingress_priority(),
            internal_priority: default_internal_priority(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            audience: default_audience(),
        }
    }
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            provider: default_sms_provider(),
            timeout_ms: default_provider_timeout_ms(),
            twilio: TwilioConfig::default(),
            infobip: InfobipConfig::default(),
            nexmo: NexmoConfig::default(),
        }
    }
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            from_number: String::new(),
            base_url: default_twilio_base_url(),
        }
    }
}

impl Default for InfobipConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_infobip_base_url(),
            sender: String::new(),
        }
    }
}

impl Default for NexmoConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            from: String::new(),
            base_url: default_nexmo_base_url(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: default_telegram_api_base(),
            bot_token: String::new(),
            chat_id: String::new(),
            max_attempts: default_telegram_attempts(),
            retry_delay_ms: default_telegram_retry_delay_ms(),
            timeout_ms: default_provider_timeout_ms(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            max_retries: default_submit_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            auth: AuthConfig::default(),
            sms: SmsConfig::default(),
            telegram: TelegramConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and an optional config file.
    pub fn load(file: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("NOTIFIER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_policy() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.rate_limit.sms_plan, Plan::Basic);
        assert_eq!(cfg.rate_limit.sms_priority, Priority::Low);
        assert_eq!(cfg.rate_limit.ingress_priority, Priority::Standard);
        assert_eq!(cfg.rate_limit.internal_priority, Priority::High);
        assert_eq!(cfg.telegram.max_attempts, 3);
        assert_eq!(cfg.telegram.retry_delay_ms, 2000);
        assert_eq!(cfg.executor.queue_capacity, 200);
        assert_eq!(cfg.executor.max_retries, 5);
        assert_eq!(cfg.executor.initial_delay_ms, 1000);
        assert_eq!(cfg.executor.max_delay_ms, 10_000);
    }

    #[test]
    fn test_empty_sources_deserialize_to_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.api.http_port, 8080);
        assert_eq!(cfg.sms.provider, SmsProviderKind::Twilio);
        assert_eq!(cfg.auth.audience, "notification-service");
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("Infobip".parse::<SmsProviderKind>().unwrap(), SmsProviderKind::Infobip);
        assert_eq!("vonage".parse::<SmsProviderKind>().unwrap(), SmsProviderKind::Nexmo);
        assert!("carrier-pigeon".parse::<SmsProviderKind>().is_err());
    }
}
