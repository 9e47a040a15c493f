//! OpenAPI specification and Swagger UI configuration.

use serde::Deserialize;
use std::collections::HashMap;
use utoipa::{OpenApi, ToSchema};

/// Documentation shape of the untyped envelope accepted by the send
/// endpoints. Handlers read the raw JSON; this type only feeds the schema.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeSchema {
    /// One of SMS, PUSH, TELEGRAM, WEB.
    #[serde(rename = "type")]
    pub kind: String,
    /// Channel-specific payload.
    #[schema(value_type = Object)]
    pub payload: HashMap<String, serde_json::Value>,
    /// Target user UUID.
    pub user_id: Option<String>,
    /// Kept when it is a valid UUID, otherwise replaced.
    pub correlation_id: Option<String>,
    /// LOW, MEDIUM, HIGH, STANDARD or CRITICAL; defaults to MEDIUM.
    pub priority: Option<String>,
    pub source_app: Option<String>,
    pub retry_count: Option<u32>,
    /// Epoch milliseconds.
    pub timestamp: Option<i64>,
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Notifier API",
        version = "0.1.0",
        description = "Admission-controlled notification dispatch.\n\nRoutes SMS, push, Telegram and live-socket notifications under per-user token-bucket rate limits.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Notifications", description = "Synchronous, internal and asynchronous dispatch"),
        (name = "Rate Limits", description = "Per-user admission counters"),
        (name = "Operations", description = "Health, readiness, and liveness probes"),
    ),
    paths(
        // Notifications
        crate::rest::send_notification,
        crate::rest::internal_send,
        crate::rest::send_async,
        // Rate limits
        crate::rest::all_user_metrics,
        crate::rest::user_metrics,
        // Operations
        crate::rest::health_check,
        crate::rest::readiness,
        crate::rest::liveness,
    ),
    components(schemas(
        EnvelopeSchema,
        crate::rest::BaseResponse,
        crate::rest::ErrorResponse,
        crate::rest::HealthResponse,
        notifier_core::types::NotificationResponse,
        notifier_core::types::NotificationStatus,
        notifier_core::types::Channel,
        notifier_platform::metrics::UserMetricsSnapshot,
    ))
)]
pub struct ApiDoc;
