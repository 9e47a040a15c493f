//! API server: HTTP (REST + live socket) and the Prometheus exporter.

use crate::ingress;
use crate::rest::{self, AppState};
use crate::swagger::ApiDoc;
use crate::ws;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use notifier_core::AppConfig;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Builds the full router. Rate limits are attached per route; correlation
/// ids, CORS and request tracing apply to everything.
pub fn router(state: AppState) -> Router {
    let public_limit = middleware::from_fn_with_state(state.clone(), ingress::public_rate_limit);
    let internal_limit =
        middleware::from_fn_with_state(state.clone(), ingress::internal_rate_limit);

    Router::new()
        // Notifications
        .route(
            "/api/notifications/send",
            post(rest::send_notification).route_layer(public_limit.clone()),
        )
        .route(
            "/api/notifications/send-async",
            post(rest::send_async).route_layer(public_limit),
        )
        .route(
            "/api/notifications/internal/send",
            post(rest::internal_send).route_layer(internal_limit),
        )
        // Rate-limit diagnostics
        .route("/api/rate-limits/metrics", get(rest::all_user_metrics))
        .route("/api/rate-limits/metrics/:user_id", get(rest::user_metrics))
        // Live socket
        .route("/ws/notifications", get(ws::ws_handler))
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Middleware
        .layer(middleware::from_fn(ingress::correlation_id))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: AppConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: AppConfig, state: AppState) -> Self {
        Self { config, state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serves HTTP until `shutdown` is cancelled.
    pub async fn start_http(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let app = router(self.state.clone());

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }

    /// Installs the global metrics recorder and its scrape endpoint.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use async_trait::async_trait;
    use notifier_channels::sms::ProviderError;
    use notifier_channels::{
        ConnectionRegistry, HandlerRegistry, LiveSocketHandler, NotificationDispatcher,
        PushHandler, SmsHandler, SmsProvider,
    };
    use notifier_core::types::{Plan, Priority};
    use notifier_platform::auth::{Claims, TokenVerifier};
    use notifier_platform::{
        AdmissionController, BackoffPolicy, RateLimitEnforcer, RateLimitMetrics, WorkerPool,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    // base64("api-router-test-key")
    const SECRET: &str = "YXBpLXJvdXRlci10ZXN0LWtleQ==";

    fn verifier() -> TokenVerifier {
        TokenVerifier::from_base64_secret(SECRET).unwrap()
    }

    struct AcceptingSms;

    #[async_trait]
    impl SmsProvider for AcceptingSms {
        fn name(&self) -> &'static str {
            "accepting"
        }

        async fn send(&self, _to: &str, _body: &str) -> Result<Option<String>, ProviderError> {
            Ok(None)
        }
    }

    fn test_state() -> AppState {
        let enforcer = RateLimitEnforcer::new(
            Arc::new(AdmissionController::default()),
            Arc::new(RateLimitMetrics::new()),
        );
        let connections = Arc::new(ConnectionRegistry::new(verifier()));
        let registry = HandlerRegistry::new()
            .with(Arc::new(SmsHandler::new(
                Arc::new(AcceptingSms),
                enforcer.clone(),
                Plan::Basic,
                Priority::Low,
            )))
            .with(Arc::new(PushHandler::new()))
            .with(Arc::new(LiveSocketHandler::new(connections.clone())));
        let dispatcher = Arc::new(NotificationDispatcher::new(registry));
        let pool = Arc::new(WorkerPool::start(2, 8, BackoffPolicy::default()));
        AppState::new(
            &AppConfig::default(),
            dispatcher,
            pool,
            enforcer,
            connections,
            verifier(),
        )
    }

    fn push(user: Option<Uuid>) -> Value {
        let mut body = json!({
            "type": "PUSH",
            "payload": {"deviceToken": "tok", "title": "Hello", "message": "World"}
        });
        if let Some(user) = user {
            body["userId"] = json!(user.to_string());
        }
        body
    }

    fn post_json(uri: &str, headers: &[(&str, String)], body: &Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn call(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, headers, body)
    }

    #[tokio::test]
    async fn test_public_send_is_limited_per_user() {
        let app = router(test_state());
        let user = Uuid::new_v4();
        let headers = [("x-user-id", user.to_string())];

        for _ in 0..2 {
            let (status, _, body) =
                call(&app, post_json("/api/notifications/send", &headers, &push(Some(user)))).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["success"], true);
            assert_eq!(body["delivered"], true);
            assert_eq!(body["data"]["channel"], "PUSH");
        }

        let (status, _, body) =
            call(&app, post_json("/api/notifications/send", &headers, &push(Some(user)))).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("Rate limit exceeded"));
    }

    #[tokio::test]
    async fn test_public_send_requires_identity() {
        let app = router(test_state());

        let (status, _, body) =
            call(&app, post_json("/api/notifications/send", &[], &push(None))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing X-User-ID header or valid Bearer token");

        let (status, _, _) = call(
            &app,
            post_json(
                "/api/notifications/send",
                &[("authorization", "Bearer garbage".to_string())],
                &push(None),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_dispatch_errors_are_wrapped() {
        let app = router(test_state());
        let user = Uuid::new_v4();
        let body = json!({"type": "FAX", "userId": user.to_string(), "payload": {}});

        let (status, _, body) = call(
            &app,
            post_json("/api/notifications/send", &[("x-user-id", user.to_string())], &body),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["delivered"], false);
        assert_eq!(body["message"], "Error: Invalid NotificationType: FAX");
        assert!(Uuid::parse_str(body["correlationId"].as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_internal_send_defaults_user_to_prospect() {
        let app = router(test_state());
        let prospect = Uuid::new_v4();
        let token = verifier()
            .issue(&Claims {
                scope: vec!["internal".into()],
                aud: vec!["notification-service".into()],
                prospect_id: Some(prospect.to_string()),
                ..Default::default()
            })
            .unwrap();

        let (status, _, body) = call(
            &app,
            post_json(
                "/api/notifications/internal/send",
                &[("authorization", format!("Bearer {token}"))],
                &push(None),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["delivered"], true);

        // BASIC/HIGH is boosted past an empty bucket.
        for _ in 0..3 {
            let (status, _, _) = call(
                &app,
                post_json(
                    "/api/notifications/internal/send",
                    &[("authorization", format!("Bearer {token}"))],
                    &push(None),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_internal_send_rejects_public_tokens() {
        let app = router(test_state());
        let token = verifier()
            .issue(&Claims {
                user_id: Some(Uuid::new_v4().to_string()),
                ..Default::default()
            })
            .unwrap();

        let (status, _, body) = call(
            &app,
            post_json(
                "/api/notifications/internal/send",
                &[("authorization", format!("Bearer {token}"))],
                &push(None),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "JWT missing required scope=internal");

        let (status, _, _) = call(
            &app,
            post_json("/api/notifications/internal/send", &[], &push(None)),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_correlation_header_propagated_or_generated() {
        let app = router(test_state());

        let request = Request::builder()
            .uri("/live")
            .header("correlation-id", "trace-abc")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = call(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["correlation-id"], "trace-abc");

        let request = Request::builder().uri("/live").body(Body::empty()).unwrap();
        let (_, headers, _) = call(&app, request).await;
        let generated = headers["correlation-id"].to_str().unwrap();
        assert!(Uuid::parse_str(generated).is_ok());
    }

    #[tokio::test]
    async fn test_send_async_returns_accepted_with_correlation_id() {
        let app = router(test_state());
        let user = Uuid::new_v4();
        let cid = Uuid::new_v4();
        let mut body = push(Some(user));
        body["correlationId"] = json!(cid.to_string());

        let (status, _, body) = call(
            &app,
            post_json(
                "/api/notifications/send-async",
                &[("x-user-id", user.to_string())],
                &body,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["success"], true);
        assert_eq!(body["correlationId"], cid.to_string());
    }

    fn internal_token(prospect: Uuid) -> String {
        let token = verifier()
            .issue(&Claims {
                scope: vec!["internal".into()],
                aud: vec!["notification-service".into()],
                prospect_id: Some(prospect.to_string()),
                ..Default::default()
            })
            .unwrap();
        format!("Bearer {token}")
    }

    #[tokio::test]
    async fn test_user_metrics_count_sms_sends_only() {
        let app = router(test_state());

        // Ingress admission alone leaves the per-user counters untouched.
        let pusher = Uuid::new_v4();
        let headers = [("x-user-id", pusher.to_string())];
        for _ in 0..3 {
            call(&app, post_json("/api/notifications/send", &headers, &push(Some(pusher)))).await;
        }
        let request = Request::builder()
            .uri(format!("/api/rate-limits/metrics/{pusher}"))
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = call(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 0);

        // Internal ingress is boosted, so every request reaches the SMS limit.
        let prospect = Uuid::new_v4();
        let sms = json!({
            "type": "SMS",
            "payload": {"phoneNumber": "+15551234567", "content": "Your code is 1234"}
        });
        let auth = [("authorization", internal_token(prospect))];
        let mut delivered = Vec::new();
        for _ in 0..3 {
            let (status, _, body) =
                call(&app, post_json("/api/notifications/internal/send", &auth, &sms)).await;
            assert_eq!(status, StatusCode::OK);
            delivered.push(body["delivered"].as_bool().unwrap());
        }
        assert_eq!(delivered, vec![true, true, false]);

        let request = Request::builder()
            .uri(format!("/api/rate-limits/metrics/{prospect}"))
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = call(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["successfulRequests"], 2);
        assert_eq!(body["rateLimitedRequests"], 1);
        assert_eq!(body["total"], 3);

        let request = Request::builder()
            .uri("/api/rate-limits/metrics")
            .body(Body::empty())
            .unwrap();
        let (_, _, body) = call(&app, request).await;
        let tracked: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|snap| snap["userId"].as_str().unwrap())
            .collect();
        assert!(tracked.contains(&prospect.to_string().as_str()));

        let request = Request::builder()
            .uri("/api/rate-limits/metrics/not-a-uuid")
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = call(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_and_readiness() {
        let app = router(test_state());

        let (status, _, body) =
            call(&app, Request::builder().uri("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["live_users"], 0);

        let (status, _, _) =
            call(&app, Request::builder().uri("/ready").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
    }
}
