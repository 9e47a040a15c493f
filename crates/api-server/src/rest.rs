//! REST handlers for notification submission, rate-limit diagnostics and
//! operational probes.

use crate::ingress::ProspectId;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use notifier_channels::{ConnectionRegistry, NotificationDispatcher};
use notifier_core::config::RateLimitConfig;
use notifier_core::types::NotificationResponse;
use notifier_core::{AppConfig, NotificationEnvelope};
use notifier_platform::auth::TokenVerifier;
use notifier_platform::metrics::UserMetricsSnapshot;
use notifier_platform::{RateLimitEnforcer, WorkerPool};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// Request bodies longer than this are truncated in debug logs.
const LOGGED_BODY_CHARS: usize = 200;

/// Shared application state for REST, WebSocket and middleware.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<NotificationDispatcher>,
    pub pool: Arc<WorkerPool>,
    pub enforcer: RateLimitEnforcer,
    pub connections: Arc<ConnectionRegistry>,
    pub verifier: TokenVerifier,
    pub limits: RateLimitConfig,
    pub audience: String,
    pub node_id: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        dispatcher: Arc<NotificationDispatcher>,
        pool: Arc<WorkerPool>,
        enforcer: RateLimitEnforcer,
        connections: Arc<ConnectionRegistry>,
        verifier: TokenVerifier,
    ) -> Self {
        Self {
            dispatcher,
            pool,
            enforcer,
            connections,
            verifier,
            limits: config.rate_limit.clone(),
            audience: config.auth.audience.clone(),
            node_id: config.node_id.clone(),
            start_time: Instant::now(),
        }
    }
}

/// Envelope returned by every notification endpoint.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BaseResponse {
    pub success: bool,
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<NotificationResponse>,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BaseResponse {
    pub fn success(response: NotificationResponse) -> Self {
        Self {
            success: true,
            correlation_id: Some(response.correlation_id.to_string()),
            delivered: response.delivered,
            data: Some(response),
            message: None,
        }
    }

    pub fn accepted(correlation_id: Uuid) -> Self {
        Self {
            success: true,
            correlation_id: Some(correlation_id.to_string()),
            data: None,
            delivered: false,
            message: Some("Notification accepted for asynchronous dispatch".to_string()),
        }
    }

    pub fn failure(id: Uuid, message: impl Into<String>) -> Self {
        Self {
            success: false,
            correlation_id: Some(id.to_string()),
            data: None,
            delivered: false,
            message: Some(message.into()),
        }
    }
}

fn body_preview(body: &Value) -> String {
    body.to_string().chars().take(LOGGED_BODY_CHARS).collect()
}

async fn dispatch_and_wrap(
    state: &AppState,
    envelope: NotificationEnvelope,
    request_id: Uuid,
) -> Json<BaseResponse> {
    match state.dispatcher.dispatch(envelope).await {
        Ok(response) => {
            info!(
                correlation_id = %response.correlation_id,
                delivered = response.delivered,
                "Notification dispatch completed"
            );
            Json(BaseResponse::success(response))
        }
        Err(e) => {
            error!(error = %e, kind = e.kind(), "Error dispatching notification");
            metrics::counter!("api.errors", "kind" => e.kind()).increment(1);
            Json(BaseResponse::failure(request_id, format!("Error: {e}")))
        }
    }
}

/// POST /api/notifications/send: Dispatch a notification and wait for the
/// handler's outcome.
#[utoipa::path(
    post,
    path = "/api/notifications/send",
    tag = "Notifications",
    request_body = crate::swagger::EnvelopeSchema,
    responses(
        (status = 200, description = "Dispatch outcome; `success` is false when the envelope was rejected", body = BaseResponse),
        (status = 400, description = "Missing or malformed caller identity"),
        (status = 401, description = "Bearer token failed verification"),
        (status = 429, description = "Caller exceeded its ingress rate limit"),
    )
)]
pub async fn send_notification(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Json<BaseResponse> {
    let request_id = Uuid::new_v4();
    let span = info_span!("notification_send", internal_request_id = %request_id);
    async move {
        info!("Received notification send request");
        debug!(body = %body_preview(&body), "Request body");
        dispatch_and_wrap(&state, NotificationEnvelope::new(body), request_id).await
    }
    .instrument(span)
    .await
}

/// POST /api/notifications/internal/send: Service-to-service dispatch on
/// behalf of a prospect that has no account yet.
#[utoipa::path(
    post,
    path = "/api/notifications/internal/send",
    tag = "Notifications",
    request_body = crate::swagger::EnvelopeSchema,
    params(
        ("X-Prospect-ID" = Option<String>, Header, description = "Prospect id when the token carries no prospectId claim"),
    ),
    responses(
        (status = 200, description = "Dispatch outcome", body = BaseResponse),
        (status = 400, description = "Missing or malformed prospect id"),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 403, description = "Token lacks the internal scope or expected audience"),
        (status = 429, description = "Prospect exceeded its rate limit"),
    )
)]
pub async fn internal_send(
    State(state): State<AppState>,
    Extension(ProspectId(prospect_id)): Extension<ProspectId>,
    Json(body): Json<Value>,
) -> Json<BaseResponse> {
    let request_id = Uuid::new_v4();
    let span = info_span!(
        "internal_notification_send",
        internal_request_id = %request_id,
        prospect_id = %prospect_id
    );
    async move {
        let mut envelope = NotificationEnvelope::new(body);
        if envelope.default_user_id(prospect_id) {
            debug!("userId defaulted to prospect id");
        }
        dispatch_and_wrap(&state, envelope, request_id).await
    }
    .instrument(span)
    .await
}

/// POST /api/notifications/send-async: Queue a dispatch on the worker pool
/// and return immediately with its correlation id.
#[utoipa::path(
    post,
    path = "/api/notifications/send-async",
    tag = "Notifications",
    request_body = crate::swagger::EnvelopeSchema,
    responses(
        (status = 202, description = "Queued for dispatch", body = BaseResponse),
        (status = 429, description = "Caller exceeded its ingress rate limit"),
        (status = 503, description = "Worker pool saturated", body = BaseResponse),
    )
)]
pub async fn send_async(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<BaseResponse>) {
    let mut envelope = NotificationEnvelope::new(body);
    let correlation_id = envelope.resolve_correlation_id();
    envelope.set_correlation_id(correlation_id);

    let dispatcher = state.dispatcher.clone();
    let task = async move {
        match dispatcher.dispatch(envelope).await {
            Ok(response) => info!(
                correlation_id = %correlation_id,
                delivered = response.delivered,
                "Asynchronous dispatch completed"
            ),
            Err(e) => warn!(
                correlation_id = %correlation_id,
                error = %e,
                "Asynchronous dispatch failed"
            ),
        }
    };

    match state.pool.submit(task).await {
        Ok(()) => {
            info!(correlation_id = %correlation_id, "Notification queued");
            (
                StatusCode::ACCEPTED,
                Json(BaseResponse::accepted(correlation_id)),
            )
        }
        Err(e) => {
            error!(correlation_id = %correlation_id, error = %e, "Failed to queue notification");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(BaseResponse::failure(correlation_id, format!("Error: {e}"))),
            )
        }
    }
}

/// GET /api/rate-limits/metrics: Counters for every user seen so far.
#[utoipa::path(
    get,
    path = "/api/rate-limits/metrics",
    tag = "Rate Limits",
    responses(
        (status = 200, description = "Per-user admission counters", body = Vec<UserMetricsSnapshot>),
    )
)]
pub async fn all_user_metrics(State(state): State<AppState>) -> Json<Vec<UserMetricsSnapshot>> {
    Json(state.enforcer.metrics().all())
}

/// GET /api/rate-limits/metrics/{user_id}: Counters for one user.
#[utoipa::path(
    get,
    path = "/api/rate-limits/metrics/{user_id}",
    tag = "Rate Limits",
    params(("user_id" = String, Path, description = "User UUID")),
    responses(
        (status = 200, description = "Admission counters", body = UserMetricsSnapshot),
        (status = 400, description = "Not a UUID", body = ErrorResponse),
    )
)]
pub async fn user_metrics(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserMetricsSnapshot>, (StatusCode, Json<ErrorResponse>)> {
    let user_id = Uuid::parse_str(&user_id).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "invalid_user_id".to_string(),
                message: format!("Invalid UUID format for userId: {user_id}"),
            }),
        )
    })?;
    Ok(Json(state.enforcer.metrics().snapshot(user_id)))
}

/// GET /health: Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Operations",
    responses((status = 200, description = "Service is healthy", body = HealthResponse))
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        live_users: state.connections.user_count(),
        live_connections: state.connections.connection_count(),
        queued_tasks: state.pool.queued(),
    })
}

/// GET /ready: Ready once at least one channel handler is registered.
#[utoipa::path(
    get,
    path = "/ready",
    tag = "Operations",
    responses(
        (status = 200, description = "Ready to accept traffic"),
        (status = 503, description = "No handlers registered"),
    )
)]
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.dispatcher.registry().is_empty() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

/// GET /live: Liveness probe.
#[utoipa::path(
    get,
    path = "/live",
    tag = "Operations",
    responses((status = 200, description = "Process is alive"))
)]
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub live_users: usize,
    pub live_connections: usize,
    pub queued_tasks: usize,
}
