use std::collections::BTreeMap;
use std::future::Future;
use std::time::{Duration, Instant};

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::notifications::registry::RegistryStats;
use crate::state::AppState;
use crate::tasks::Queue;

const CHECK_TIMEOUT: Duration = Duration::from_secs(3);

/// GET /health
/// Returns a simple status object with service version.
pub async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "hirewise-api"
    }))
}

/// GET /health/live
pub async fn live_handler() -> Json<Value> {
    debug!("service is live");
    Json(json!({ "status": "alive" }))
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CheckResult {
    pub status: &'static str,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    fn is_unhealthy(&self) -> bool {
        self.status == "unhealthy"
    }
}

#[derive(Debug, Serialize)]
pub struct Checks {
    pub database: CheckResult,
    pub redis: CheckResult,
    pub match_model: CheckResult,
}

#[derive(Debug, Serialize)]
pub struct Readiness {
    pub status: &'static str,
    pub checks: Checks,
    /// Ready tasks per queue. Queues whose depth could not be read are omitted.
    pub queues: BTreeMap<&'static str, usize>,
    pub websockets: RegistryStats,
}

impl Readiness {
    fn from_checks(
        checks: Checks,
        queues: BTreeMap<&'static str, usize>,
        websockets: RegistryStats,
    ) -> Self {
        let ready = !(checks.database.is_unhealthy() || checks.redis.is_unhealthy());
        Self {
            status: if ready { "ready" } else { "not_ready" },
            checks,
            queues,
            websockets,
        }
    }

    fn status_code(&self) -> StatusCode {
        if self.status == "ready" {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Times `check` and converts its outcome into a `CheckResult`.
async fn run_check<F, E>(name: &str, check: F) -> CheckResult
where
    F: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let started = Instant::now();
    let outcome = tokio::time::timeout(CHECK_TIMEOUT, check).await;
    let latency_ms = started.elapsed().as_millis() as u64;

    let error = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(_) => Some(format!("timed out after {}s", CHECK_TIMEOUT.as_secs())),
    };
    if let Some(e) = &error {
        warn!("Readiness check '{name}' failed: {e}");
    }

    CheckResult {
        status: if error.is_none() { "healthy" } else { "unhealthy" },
        latency_ms,
        error,
    }
}

/// The heuristic scorer keeps matching available, so a missing artifact
/// degrades the node without taking it out of rotation.
fn model_check(loaded: bool) -> CheckResult {
    CheckResult {
        status: if loaded { "healthy" } else { "degraded" },
        latency_ms: 0,
        error: (!loaded).then(|| "match model artifact not loaded; using heuristic scorer".to_string()),
    }
}

async fn queue_depths(state: &AppState) -> BTreeMap<&'static str, usize> {
    let broker = state.tasks.broker();
    let mut depths = BTreeMap::new();
    for queue in Queue::ALL {
        match tokio::time::timeout(CHECK_TIMEOUT, broker.queue_len(queue)).await {
            Ok(Ok(len)) => {
                depths.insert(queue.name(), len);
            }
            Ok(Err(e)) => warn!("Could not read depth of {}: {e}", queue.name()),
            Err(_) => warn!("Timed out reading depth of {}", queue.name()),
        }
    }
    depths
}

/// GET /health/ready
pub async fn ready_handler(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    let database = run_check("database", async {
        sqlx::query("SELECT 1").execute(&state.db).await.map(|_| ())
    });
    let redis = run_check("redis", async {
        let mut conn = state.redis.get_multiplexed_async_connection().await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
    });
    let (database, redis) = tokio::join!(database, redis);

    let readiness = Readiness::from_checks(
        Checks {
            database,
            redis,
            match_model: model_check(state.match_engine.is_model_loaded()),
        },
        queue_depths(&state).await,
        state.connections.stats().await,
    );
    (readiness.status_code(), Json(readiness))
}
