//! SMS delivery: provider clients and the rate-limited handler.
//!
//! One provider is chosen from configuration at start-up. Providers classify
//! their outcome: an explicit refusal (non-2xx or a provider error code) is a
//! [`ProviderError::Rejected`] and becomes a FAILURE response, anything that
//! prevented getting an answer is [`ProviderError::Transport`] and propagates.

use crate::handler::NotificationHandler;
use async_trait::async_trait;
use notifier_core::channels::SmsPayload;
use notifier_core::config::{
    InfobipConfig, NexmoConfig, SmsConfig, SmsProviderKind, TwilioConfig,
};
use notifier_core::types::{CanonicalRequest, Channel, NotificationResponse, Plan, Priority};
use notifier_core::{NotifyError, NotifyResult};
use notifier_platform::RateLimitEnforcer;
use serde_json::{json, Value};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{0}")]
    Rejected(String),
    #[error("{0}")]
    Transport(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Transport(e.to_string())
    }
}

#[async_trait]
pub trait SmsProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Sends one message; returns the provider's message id when it reports one.
    async fn send(&self, to: &str, body: &str) -> Result<Option<String>, ProviderError>;
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(timeout).build()
}

/// Status plus the body as JSON. An error status is classified even when its
/// body is empty or not JSON (gateway HTML pages); the body then reads as `null`.
async fn read_response(response: reqwest::Response) -> Result<(StatusCode, Value), ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok((status, response.json().await?));
    }
    let body = match response.text().await {
        Ok(text) => serde_json::from_str(&text).unwrap_or(Value::Null),
        Err(e) => {
            debug!(status = status.as_u16(), error = %e, "Provider error body unreadable");
            Value::Null
        }
    };
    Ok((status, body))
}

fn trim_base(url: &str) -> &str {
    url.trim_end_matches('/')
}

// ─── Twilio ─────────────────────────────────────────────────────────────────

pub struct TwilioProvider {
    config: TwilioConfig,
    client: reqwest::Client,
}

impl TwilioProvider {
    pub fn new(config: TwilioConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = http_client(timeout)?;
        info!(account_sid = %config.account_sid, from = %config.from_number, "Twilio SMS provider initialized");
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            trim_base(&self.config.base_url),
            self.config.account_sid
        )
    }
}

/// `sid` on success; `message` on error.
fn parse_twilio(success: bool, status: u16, body: &Value) -> Result<Option<String>, ProviderError> {
    if success {
        return Ok(body.get("sid").and_then(Value::as_str).map(str::to_owned));
    }
    let text = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("no error message");
    Err(ProviderError::Rejected(format!("Twilio HTTP {status}: {text}")))
}

#[async_trait]
impl SmsProvider for TwilioProvider {
    fn name(&self) -> &'static str {
        "twilio"
    }

    async fn send(&self, to: &str, body: &str) -> Result<Option<String>, ProviderError> {
        let response = self
            .client
            .post(self.endpoint())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("To", to),
                ("From", self.config.from_number.as_str()),
                ("Body", body),
            ])
            .send()
            .await?;

        let (status, payload) = read_response(response).await?;
        parse_twilio(status.is_success(), status.as_u16(), &payload)
    }
}

// ─── Infobip ────────────────────────────────────────────────────────────────

pub struct InfobipProvider {
    config: InfobipConfig,
    client: reqwest::Client,
}

impl InfobipProvider {
    pub fn new(config: InfobipConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = http_client(timeout)?;
        info!(base_url = %config.base_url, sender = %config.sender, "Infobip SMS provider initialized");
        Ok(Self { config, client })
    }

    fn request_body(&self, to: &str, text: &str) -> Value {
        json!({
            "messages": [{
                "from": self.config.sender,
                "destinations": [{ "to": to }],
                "text": text,
            }]
        })
    }
}

fn parse_infobip(success: bool, status: u16, body: &Value) -> Result<Option<String>, ProviderError> {
    if success {
        return Ok(body
            .pointer("/messages/0/messageId")
            .and_then(Value::as_str)
            .map(str::to_owned));
    }
    let text = body
        .pointer("/requestError/serviceException/text")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| match body {
            Value::Null => "no error message".to_string(),
            other => other.to_string(),
        });
    Err(ProviderError::Rejected(format!("Infobip HTTP {status}: {text}")))
}

#[async_trait]
impl SmsProvider for InfobipProvider {
    fn name(&self) -> &'static str {
        "infobip"
    }

    async fn send(&self, to: &str, body: &str) -> Result<Option<String>, ProviderError> {
        let response = self
            .client
            .post(format!("{}/sms/2/text/advanced", trim_base(&self.config.base_url)))
            .header("Authorization", format!("App {}", self.config.api_key))
            .json(&self.request_body(to, body))
            .send()
            .await?;

        let (status, payload) = read_response(response).await?;
        parse_infobip(status.is_success(), status.as_u16(), &payload)
    }
}

// ─── Nexmo / Vonage ─────────────────────────────────────────────────────────

pub struct NexmoProvider {
    config: NexmoConfig,
    client: reqwest::Client,
}

impl NexmoProvider {
    pub fn new(config: NexmoConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = http_client(timeout)?;
        info!(from = %config.from, "Nexmo SMS provider initialized");
        Ok(Self { config, client })
    }
}

/// Status `"0"` on the first message means accepted.
fn parse_nexmo(success: bool, status: u16, body: &Value) -> Result<Option<String>, ProviderError> {
    if !success {
        return Err(ProviderError::Rejected(format!("Vonage HTTP {status}")));
    }
    let first = body
        .pointer("/messages/0")
        .ok_or_else(|| ProviderError::Transport("Vonage response has no messages".into()))?;
    match first.get("status").and_then(Value::as_str) {
        Some("0") => Ok(first
            .get("message-id")
            .and_then(Value::as_str)
            .map(str::to_owned)),
        _ => {
            let text = first
                .get("error-text")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            Err(ProviderError::Rejected(format!("Vonage SMS error: {text}")))
        }
    }
}

#[async_trait]
impl SmsProvider for NexmoProvider {
    fn name(&self) -> &'static str {
        "nexmo"
    }

    async fn send(&self, to: &str, body: &str) -> Result<Option<String>, ProviderError> {
        let response = self
            .client
            .post(format!("{}/sms/json", trim_base(&self.config.base_url)))
            .form(&[
                ("api_key", self.config.api_key.as_str()),
                ("api_secret", self.config.api_secret.as_str()),
                ("from", self.config.from.as_str()),
                ("to", to),
                ("text", body),
            ])
            .send()
            .await?;

        let (status, payload) = read_response(response).await?;
        parse_nexmo(status.is_success(), status.as_u16(), &payload)
    }
}

/// Builds the configured provider.
pub fn build_provider(config: &SmsConfig) -> Result<Arc<dyn SmsProvider>, reqwest::Error> {
    let timeout = Duration::from_millis(config.timeout_ms);
    Ok(match config.provider {
        SmsProviderKind::Twilio => Arc::new(TwilioProvider::new(config.twilio.clone(), timeout)?),
        SmsProviderKind::Infobip => Arc::new(InfobipProvider::new(config.infobip.clone(), timeout)?),
        SmsProviderKind::Nexmo => Arc::new(NexmoProvider::new(config.nexmo.clone(), timeout)?),
    })
}

// ─── Handler ────────────────────────────────────────────────────────────────

pub struct SmsHandler {
    provider: Arc<dyn SmsProvider>,
    enforcer: RateLimitEnforcer,
    plan: Plan,
    priority: Priority,
}

impl SmsHandler {
    /// Every send is admitted under the fixed `plan`/`priority`, independent
    /// of the request's own priority.
    pub fn new(
        provider: Arc<dyn SmsProvider>,
        enforcer: RateLimitEnforcer,
        plan: Plan,
        priority: Priority,
    ) -> Self {
        info!(provider = provider.name(), plan = %plan, priority = %priority, "SMS handler ready");
        Self {
            provider,
            enforcer,
            plan,
            priority,
        }
    }

    async fn send(&self, request: &CanonicalRequest<SmsPayload>) -> NotifyResult<NotificationResponse> {
        let cid = request.correlation_id();
        let payload = request.payload();
        debug!(correlation_id = %cid, to = %payload.phone_number, "Sending SMS");

        match self.provider.send(&payload.phone_number, &payload.content).await {
            Ok(message_id) => {
                info!(correlation_id = %cid, provider = self.provider.name(), "SMS notification sent");
                metrics::counter!("sms.sent", "provider" => self.provider.name()).increment(1);
                Ok(
                    NotificationResponse::success(Channel::Sms, cid, "SMS notification sent successfully")
                        .with_provider_message_id(message_id),
                )
            }
            Err(ProviderError::Rejected(text)) => {
                warn!(correlation_id = %cid, provider = self.provider.name(), reason = %text, "SMS rejected by provider");
                metrics::counter!("sms.rejected", "provider" => self.provider.name()).increment(1);
                Ok(NotificationResponse::failure(
                    Channel::Sms,
                    cid,
                    format!("SMS failed: {text}"),
                ))
            }
            Err(ProviderError::Transport(text)) => {
                error!(correlation_id = %cid, provider = self.provider.name(), error = %text, "SMS transport failure");
                Err(NotifyError::ProviderFailure {
                    provider: self.provider.name(),
                    message: text,
                })
            }
        }
    }
}

#[async_trait]
impl NotificationHandler for SmsHandler {
    type Payload = SmsPayload;

    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn handle(
        &self,
        request: CanonicalRequest<SmsPayload>,
    ) -> NotifyResult<NotificationResponse> {
        let cid = request.correlation_id();
        info!(
            user_id = %request.user_id(),
            correlation_id = %cid,
            priority = %request.priority(),
            retry = request.retry_count(),
            "Handling SMS notification"
        );

        let outcome = self
            .enforcer
            .guard(
                &request,
                |r| Some(r.user_id()),
                self.plan,
                self.priority,
                || self.send(&request),
            )
            .await;

        match outcome {
            Ok(response) => Ok(response),
            Err(NotifyError::RateLimitExceeded {
                admitted: false,
                message,
                ..
            }) => {
                warn!(user_id = %request.user_id(), correlation_id = %cid, "SMS rate limit exceeded");
                Ok(NotificationResponse::failure(
                    Channel::Sms,
                    cid,
                    format!("SMS rate limit exceeded: {message}"),
                ))
            }
            Err(err) => Err(err),
        }
    }
}
