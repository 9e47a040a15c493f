//! Chat-bot alerts through the Telegram Bot API.

use crate::handler::NotificationHandler;
use async_trait::async_trait;
use notifier_core::channels::TelegramPayload;
use notifier_core::config::TelegramConfig;
use notifier_core::types::{CanonicalRequest, Channel, NotificationResponse};
use notifier_core::NotifyResult;
use notifier_platform::backoff::{self, BackoffPolicy};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ChatBotError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait ChatBotClient: Send + Sync {
    /// Posts `text` to `chat_id` and returns the HTTP status code.
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<u16, ChatBotError>;
}

pub struct TelegramApi {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
}

impl TelegramApi {
    pub fn new(config: &TelegramConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
        })
    }

    fn send_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }
}

#[async_trait]
impl ChatBotClient for TelegramApi {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<u16, ChatBotError> {
        let response = self
            .client
            .post(self.send_url())
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await?;
        Ok(response.status().as_u16())
    }
}

/// Sends with a fixed delay between attempts. Never returns an error: every
/// outcome, including cancellation, is reported as a response.
pub struct TelegramHandler {
    client: Arc<dyn ChatBotClient>,
    default_chat_id: String,
    policy: BackoffPolicy,
    attempts: u32,
    cancel: CancellationToken,
}

impl TelegramHandler {
    pub fn new(
        client: Arc<dyn ChatBotClient>,
        config: &TelegramConfig,
        cancel: CancellationToken,
    ) -> Self {
        let attempts = config.max_attempts.max(1);
        Self {
            client,
            default_chat_id: config.chat_id.clone(),
            policy: BackoffPolicy::fixed(
                attempts - 1,
                Duration::from_millis(config.retry_delay_ms),
            ),
            attempts,
            cancel,
        }
    }
}

#[async_trait]
impl NotificationHandler for TelegramHandler {
    type Payload = TelegramPayload;

    fn channel(&self) -> Channel {
        Channel::Telegram
    }

    async fn handle(
        &self,
        request: CanonicalRequest<TelegramPayload>,
    ) -> NotifyResult<NotificationResponse> {
        let cid = request.correlation_id();
        let payload = request.payload();
        let chat_id = payload
            .chat_id
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(&self.default_chat_id);
        let text = payload.message.as_deref().unwrap_or_default();

        info!(
            correlation_id = %cid,
            priority = %request.priority(),
            chat_id = %chat_id,
            "Handling Telegram notification"
        );

        for attempt in 1..=self.attempts {
            debug!(correlation_id = %cid, attempt, of = self.attempts, "Sending Telegram message");
            match self.client.send_message(chat_id, text).await {
                Ok(200) => {
                    info!(correlation_id = %cid, chat_id = %chat_id, "Telegram notification sent");
                    metrics::counter!("telegram.sent").increment(1);
                    return Ok(NotificationResponse::success(
                        Channel::Telegram,
                        cid,
                        "Telegram notification sent successfully.",
                    ));
                }
                Ok(status) => warn!(
                    correlation_id = %cid,
                    attempt,
                    status,
                    "Telegram API responded with non-OK status"
                ),
                Err(e) => error!(
                    correlation_id = %cid,
                    attempt,
                    error = %e,
                    "Telegram request failed"
                ),
            }

            if attempt < self.attempts {
                let delay = self.policy.delay_for(attempt - 1);
                info!(correlation_id = %cid, delay_ms = delay.as_millis() as u64, "Retrying Telegram notification");
                if backoff::wait(delay, &self.cancel).await.is_err() {
                    warn!(correlation_id = %cid, attempts = attempt, "Telegram retry cancelled");
                    metrics::counter!("telegram.failed").increment(1);
                    return Ok(NotificationResponse::failure(
                        Channel::Telegram,
                        cid,
                        format!("Telegram alert cancelled after {attempt} of {} attempts.", self.attempts),
                    ));
                }
            }
        }

        error!(
            correlation_id = %cid,
            attempts = self.attempts,
            "Giving up on Telegram notification"
        );
        metrics::counter!("telegram.failed").increment(1);
        Ok(NotificationResponse::failure(
            Channel::Telegram,
            cid,
            format!("Failed to send Telegram alert after {} retries.", self.attempts),
        ))
    }
}
