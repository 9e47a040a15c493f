use crate::types::{Channel, Plan, Priority};
use thiserror::Error;
use uuid::Uuid;

pub type NotifyResult<T> = Result<T, NotifyError>;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Missing '{0}' field")]
    MissingField(&'static str),

    #[error("Invalid NotificationType: {0}")]
    UnknownType(String),

    #[error("No handler found for NotificationType: {0}")]
    NoHandler(Channel),

    #[error("Payload does not match {shape} for {channel}: {reason}")]
    BadPayload {
        channel: Channel,
        shape: &'static str,
        reason: String,
    },

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Raised by the admission layer. `admitted` is true when the bucket let the
    /// call through and the guarded operation itself failed afterwards.
    #[error("{message}")]
    RateLimitExceeded {
        user_id: Uuid,
        plan: Plan,
        priority: Priority,
        admitted: bool,
        message: String,
    },

    #[error("Provider failure ({provider}): {message}")]
    ProviderFailure {
        provider: &'static str,
        message: String,
    },

    #[error("Task submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl NotifyError {
    /// Builds the denial raised when a bucket refuses a token.
    pub fn rate_limited(user_id: Uuid, plan: Plan, priority: Priority) -> Self {
        NotifyError::RateLimitExceeded {
            user_id,
            plan,
            priority,
            admitted: false,
            message: format!(
                "Rate limit exceeded for user {} with plan {} and priority {}",
                user_id, plan, priority
            ),
        }
    }

    /// Stable label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            NotifyError::MissingField(_) => "missing_field",
            NotifyError::UnknownType(_) => "unknown_type",
            NotifyError::NoHandler(_) => "no_handler",
            NotifyError::BadPayload { .. } => "bad_payload",
            NotifyError::BadRequest(_) => "bad_request",
            NotifyError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            NotifyError::ProviderFailure { .. } => "provider_failure",
            NotifyError::SubmissionRejected(_) => "submission_rejected",
            NotifyError::Config(_) => "config",
            NotifyError::Serialization(_) => "serialization",
            NotifyError::Internal(_) => "internal",
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, NotifyError::RateLimitExceeded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_message_names_user_plan_priority() {
        let user = Uuid::new_v4();
        let err = NotifyError::rate_limited(user, Plan::Basic, Priority::Standard);
        let text = err.to_string();
        assert!(text.contains(&user.to_string()));
        assert!(text.contains("BASIC"));
        assert!(text.contains("STANDARD"));
        assert!(err.is_rate_limited());
        assert_eq!(err.kind(), "rate_limit_exceeded");
    }

    #[test]
    fn test_missing_field_message() {
        let err = NotifyError::MissingField("type");
        assert_eq!(err.to_string(), "Missing 'type' field");
        assert!(!err.is_rate_limited());
    }
}
