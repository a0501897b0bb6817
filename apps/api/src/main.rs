mod analysis;
mod applications;
mod auth;
mod config;
mod db;
mod errors;
mod jobs;
mod llm_client;
mod matching;
mod models;
mod notifications;
mod pagination;
mod profiles;
mod resumes;
mod routes;
mod seed;
mod skills;
mod state;
mod tasks;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::auth::JwtKeys;
use crate::config::Config;
use crate::db::{create_pool, run_migrations};
use crate::llm_client::LlmClient;
use crate::matching::scorer::MatchEngine;
use crate::notifications::bus::{run_listener, NotificationBus};
use crate::notifications::registry::ConnectionRegistry;
use crate::routes::build_router;
use crate::state::AppState;
use crate::tasks::broker::{RedisBroker, TaskBroker};
use crate::tasks::handlers::AppTaskHandler;
use crate::tasks::scheduler::{default_schedule, run_scheduler};
use crate::tasks::worker::spawn_workers;
use crate::tasks::TaskQueue;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting HireWise API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;
    run_migrations(&db).await?;
    seed::seed_reference_data(&db).await?;

    // Initialize Redis: task broker and notification bus
    let redis = redis::Client::open(config.redis_url.clone())?;
    let broker: Arc<dyn TaskBroker> = Arc::new(RedisBroker::connect(&redis).await?);
    let bus = NotificationBus::connect(&redis).await?;
    info!("Redis client initialized");

    // Initialize S3 / MinIO
    let s3 = build_s3_client(&config).await;
    info!("S3 client initialized");

    // Initialize LLM client
    let llm = LlmClient::new(config.gemini_api_key.clone(), config.gemini_model.clone())?;
    info!("LLM client initialized (model: {})", llm.model());

    // Match scorer falls back to the heuristic when no artifact is present
    let match_engine = Arc::new(MatchEngine::load(&config.match_model_path));

    let tasks = TaskQueue::new(broker.clone(), config.task_max_retries);

    let state = AppState {
        db,
        redis: redis.clone(),
        s3,
        llm,
        config: config.clone(),
        jwt: JwtKeys::new(&config.jwt_secret, config.jwt_expiry_hours),
        match_engine,
        connections: ConnectionRegistry::new(),
        bus,
        tasks: tasks.clone(),
    };

    let shutdown = install_shutdown_handler()?;

    // Background work: task workers, periodic scheduler, notification fan-out
    let mut background = Vec::new();
    if config.worker_concurrency > 0 {
        let handler = Arc::new(AppTaskHandler::new(state.clone()));
        background.extend(spawn_workers(
            &config.worker_name,
            config.worker_concurrency,
            broker,
            handler,
            shutdown.clone(),
        ));
        info!("Started {} task worker(s)", config.worker_concurrency);
    }
    background.push(tokio::spawn(run_scheduler(
        tasks,
        default_schedule(),
        shutdown.clone(),
    )));
    background.push(tokio::spawn(run_listener(
        redis,
        state.connections.clone(),
        shutdown.clone(),
    )));

    let app = build_router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await?;

    // The server can also stop on its own; make sure background loops exit.
    shutdown.cancel();
    for handle in background {
        if let Err(e) = handle.await {
            tracing::error!("Background task ended abnormally: {e}");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Returns a token cancelled on the first SIGTERM or SIGINT.
fn install_shutdown_handler() -> Result<CancellationToken> {
    let token = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        }
        trigger.cancel();
    });

    Ok(token)
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "hirewise-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    // MinIO serves buckets by path, not by virtual host.
    let s3_config = aws_sdk_s3::config::Builder::from(&s3_config)
        .force_path_style(true)
        .build();

    aws_sdk_s3::Client::from_conf(s3_config)
}
