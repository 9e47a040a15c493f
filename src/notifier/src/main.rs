//! Notifier: admission-controlled notification dispatch service.
//!
//! Main entry point that wires the rate limiter, channel handlers and
//! dispatcher together and starts the HTTP and metrics servers.

use clap::Parser;
use notifier_api::{ApiServer, AppState};
use notifier_channels::{
    build_provider, ConnectionRegistry, HandlerRegistry, LiveSocketHandler,
    NotificationDispatcher, PushHandler, SmsHandler, TelegramApi, TelegramHandler,
};
use notifier_core::config::{AppConfig, SmsProviderKind};
use notifier_platform::{
    AdmissionController, RateLimitEnforcer, RateLimitMetrics, TokenBucketStore, TokenVerifier,
    WorkerPool,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "notifier")]
#[command(about = "Admission-controlled notification dispatch service")]
#[command(version)]
struct Cli {
    /// Optional configuration file (TOML/YAML/JSON, by extension)
    #[arg(long, env = "NOTIFIER__CONFIG")]
    config: Option<String>,

    /// Node identifier (overrides config)
    #[arg(long, env = "NOTIFIER__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "NOTIFIER__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// SMS provider: twilio, infobip or nexmo (overrides config)
    #[arg(long, env = "NOTIFIER__SMS__PROVIDER")]
    sms_provider: Option<SmsProviderKind>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "notifier=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Notifier starting up");

    let mut config = AppConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(provider) = cli.sms_provider {
        config.sms.provider = provider;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        sms_provider = ?config.sms.provider,
        workers = config.executor.workers,
        "Configuration loaded"
    );

    let shutdown = CancellationToken::new();

    // Admission control
    let verifier = TokenVerifier::from_base64_secret(&config.auth.jwt_secret)?;
    let metrics = Arc::new(RateLimitMetrics::new());
    let admission = Arc::new(AdmissionController::new(TokenBucketStore::new()));
    let enforcer = RateLimitEnforcer::new(admission, metrics);

    // Channel handlers
    let connections = Arc::new(ConnectionRegistry::new(verifier.clone()));
    let registry = HandlerRegistry::new()
        .with(Arc::new(SmsHandler::new(
            build_provider(&config.sms)?,
            enforcer.clone(),
            config.rate_limit.sms_plan,
            config.rate_limit.sms_priority,
        )))
        .with(Arc::new(PushHandler::new()))
        .with(Arc::new(TelegramHandler::new(
            Arc::new(TelegramApi::new(&config.telegram)?),
            &config.telegram,
            shutdown.child_token(),
        )))
        .with(Arc::new(LiveSocketHandler::new(connections.clone())));
    let dispatcher = Arc::new(NotificationDispatcher::new(registry));

    let pool = Arc::new(WorkerPool::from_config(&config.executor));

    let state = AppState::new(
        &config,
        dispatcher,
        pool.clone(),
        enforcer,
        connections,
        verifier,
    );
    let api_server = ApiServer::new(config.clone(), state);

    if let Err(e) = api_server.start_metrics().await {
        error!(error = %e, "Failed to start metrics exporter");
    }

    let http_shutdown = shutdown.clone();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
        signal_shutdown.cancel();
    });

    info!("Notifier is ready to serve traffic");

    // Blocks until shutdown
    let served = api_server.start_http(http_shutdown).await;

    shutdown.cancel();
    drop(api_server);
    match Arc::try_unwrap(pool) {
        Ok(pool) => pool.shutdown().await,
        Err(_) => warn!("Worker pool still referenced, skipping graceful stop"),
    }

    info!("Notifier stopped");
    served
}
