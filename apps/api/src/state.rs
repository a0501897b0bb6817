use std::sync::Arc;

use aws_sdk_s3::Client as S3Client;
use redis::Client as RedisClient;
use sqlx::PgPool;

use crate::auth::JwtKeys;
use crate::config::Config;
use crate::llm_client::LlmClient;
use crate::matching::scorer::MatchEngine;
use crate::notifications::bus::NotificationBus;
use crate::notifications::registry::ConnectionRegistry;
use crate::tasks::TaskQueue;

/// Shared application state injected into all route handlers via Axum extractors.
/// Task workers hold a clone as well.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    /// Used by the readiness check; the broker and bus hold their own connections.
    pub redis: RedisClient,
    pub s3: S3Client,
    pub llm: LlmClient,
    pub config: Config,
    pub jwt: JwtKeys,
    /// Active match scorer. Reloadable at runtime without a restart.
    pub match_engine: Arc<MatchEngine>,
    /// WebSocket connections owned by this process.
    pub connections: ConnectionRegistry,
    pub bus: NotificationBus,
    pub tasks: TaskQueue,
}
