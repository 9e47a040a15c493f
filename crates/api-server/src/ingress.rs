//! Request-scoped middleware: correlation ids and per-endpoint admission.
//!
//! The public endpoints identify the caller by `X-User-ID` or the `userId`
//! claim of a bearer token. The internal endpoint requires a service token
//! with `scope=internal` and the configured audience, and is keyed on the
//! prospect id. Rejections are JSON `{"error": "..."}` bodies.

use crate::rest::AppState;
use axum::extract::{Request, State};
use axum::http::header::{AsHeaderName, AUTHORIZATION};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use notifier_core::types::{Plan, Priority};
use notifier_platform::auth::{bearer_token, Claims, TokenVerifier};
use serde_json::json;
use tracing::{debug, field, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CORRELATION_ID_HEADER: &str = "correlation-id";
pub const TENANT_ID_HEADER: &str = "tenant-id";
pub const USER_ID_HEADER: &str = "x-user-id";
pub const PROSPECT_ID_HEADER: &str = "x-prospect-id";

const INTERNAL_SCOPE: &str = "internal";

/// Correlation id of the current HTTP request, as propagated or generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestCorrelation(pub String);

/// Prospect admitted by the internal rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProspectId(pub Uuid);

#[derive(Debug)]
pub struct Rejection {
    status: StatusCode,
    message: String,
}

impl Rejection {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        info!(
            status = self.status.as_u16(),
            message = %self.message,
            "Request rejected"
        );
        metrics::counter!("api.rejected", "status" => self.status.as_str().to_owned()).increment(1);
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn header_str<K: AsHeaderName>(headers: &HeaderMap, name: K) -> Option<&str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Propagates `Correlation-ID` (or generates one), records it on the request
/// span and echoes it on the response.
pub async fn correlation_id(mut request: Request, next: Next) -> Response {
    let correlation_id = header_str(request.headers(), CORRELATION_ID_HEADER)
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = info_span!(
        "request",
        correlation_id = %correlation_id,
        tenant_id = field::Empty
    );
    if let Some(tenant) = header_str(request.headers(), TENANT_ID_HEADER) {
        span.record("tenant_id", tenant);
    }

    request
        .extensions_mut()
        .insert(RequestCorrelation(correlation_id.clone()));

    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}

/// Ingress limit for the public send endpoints.
pub async fn public_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, Rejection> {
    debug!(uri = %request.uri(), "Applying public rate limit");
    let user_id = public_identity(&state.verifier, request.headers())?;
    admit(
        &state,
        user_id,
        state.limits.ingress_plan,
        state.limits.ingress_priority,
    )?;
    Ok(next.run(request).await)
}

/// Ingress limit and service authentication for the internal send endpoint.
/// On success the prospect id is attached as a request extension.
pub async fn internal_rate_limit(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, Rejection> {
    debug!(uri = %request.uri(), "Applying internal rate limit");
    let prospect_id = internal_identity(&state.verifier, &state.audience, request.headers())?;

    info_span!("internal_admission", prospect_id = %prospect_id).in_scope(|| {
        admit(
            &state,
            prospect_id,
            state.limits.ingress_plan,
            state.limits.internal_priority,
        )
    })?;

    request.extensions_mut().insert(ProspectId(prospect_id));
    Ok(next.run(request).await)
}

fn verify(verifier: &TokenVerifier, token: &str) -> Result<Claims, Rejection> {
    verifier.verify(token).map_err(|e| {
        warn!(error = %e, "Invalid JWT");
        Rejection::new(StatusCode::UNAUTHORIZED, format!("Invalid JWT: {e}"))
    })
}

fn public_identity(verifier: &TokenVerifier, headers: &HeaderMap) -> Result<Uuid, Rejection> {
    let raw = match header_str(headers, USER_ID_HEADER) {
        Some(raw) => Some(raw.to_owned()),
        None => match header_str(headers, AUTHORIZATION).and_then(bearer_token) {
            Some(token) => {
                let user_id = verify(verifier, token)?.user_id;
                debug!(user_id = ?user_id, "User id taken from bearer token");
                user_id
            }
            None => None,
        },
    };

    let raw = raw.ok_or_else(|| {
        Rejection::new(
            StatusCode::BAD_REQUEST,
            "Missing X-User-ID header or valid Bearer token",
        )
    })?;

    Uuid::parse_str(&raw).map_err(|_| {
        Rejection::new(
            StatusCode::BAD_REQUEST,
            format!("Invalid UUID format for userId: {raw}"),
        )
    })
}

fn internal_identity(
    verifier: &TokenVerifier,
    audience: &str,
    headers: &HeaderMap,
) -> Result<Uuid, Rejection> {
    let token = header_str(headers, AUTHORIZATION)
        .and_then(bearer_token)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            Rejection::new(
                StatusCode::UNAUTHORIZED,
                "Missing or invalid Authorization header",
            )
        })?;

    let claims = verify(verifier, token)?;

    if !claims.has_scope(INTERNAL_SCOPE) {
        return Err(Rejection::new(
            StatusCode::FORBIDDEN,
            "JWT missing required scope=internal",
        ));
    }
    if !claims.has_audience(audience) {
        return Err(Rejection::new(
            StatusCode::FORBIDDEN,
            "Invalid JWT audience",
        ));
    }

    let raw = claims
        .prospect_id
        .or_else(|| header_str(headers, PROSPECT_ID_HEADER).map(str::to_owned))
        .ok_or_else(|| {
            Rejection::new(
                StatusCode::BAD_REQUEST,
                "Missing prospectId (claim or X-Prospect-ID header)",
            )
        })?;

    Uuid::parse_str(&raw)
        .map_err(|_| Rejection::new(StatusCode::BAD_REQUEST, "Invalid UUID for prospectId"))
}

/// Takes a token from the caller's bucket. Ingress decisions are not recorded
/// in the per-user metrics; those count channel sends only.
fn admit(state: &AppState, user_id: Uuid, plan: Plan, priority: Priority) -> Result<(), Rejection> {
    match state.enforcer.admission().admit(user_id, plan, priority) {
        Ok(admission) => {
            debug!(user_id = %user_id, ?admission, "Ingress admitted");
            Ok(())
        }
        Err(e) => {
            warn!(user_id = %user_id, error = %e, "Ingress rate limit exceeded");
            Err(Rejection::new(
                StatusCode::TOO_MANY_REQUESTS,
                format!("Rate limit exceeded: {e}"),
            ))
        }
    }
}
