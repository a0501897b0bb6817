pub mod health;
pub mod schema;

use axum::{
    extract::{DefaultBodyLimit, Request},
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, patch, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use crate::{
    applications, auth, jobs, matching, notifications, profiles, resumes, skills,
};

pub const API_VERSION: &str = "1";

/// Headroom for multipart framing and the title field around the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    let api = Router::new()
        .route("/health/ready", get(health::ready_handler))
        // Auth
        .route("/api/v1/auth/register", post(auth::handlers::handle_register))
        .route("/api/v1/auth/login", post(auth::handlers::handle_login))
        .route("/api/v1/auth/me", get(auth::handlers::handle_me))
        // Profiles and skills
        .route(
            "/api/v1/profile",
            get(profiles::handlers::handle_get).put(profiles::handlers::handle_update),
        )
        .route(
            "/api/v1/skills",
            get(skills::handlers::handle_catalog).post(skills::handlers::handle_create),
        )
        .route(
            "/api/v1/me/skills",
            get(skills::handlers::handle_my_skills).put(skills::handlers::handle_upsert_my_skill),
        )
        .route(
            "/api/v1/me/skills/:skill_id",
            delete(skills::handlers::handle_remove_my_skill),
        )
        // Jobs
        .route(
            "/api/v1/jobs",
            get(jobs::handlers::handle_search).post(jobs::handlers::handle_create),
        )
        .route("/api/v1/jobs/mine", get(jobs::handlers::handle_mine))
        .route(
            "/api/v1/jobs/:id",
            get(jobs::handlers::handle_get)
                .put(jobs::handlers::handle_update)
                .delete(jobs::handlers::handle_delete),
        )
        // Applications
        .route(
            "/api/v1/applications",
            get(applications::handlers::handle_list).post(applications::handlers::handle_apply),
        )
        .route(
            "/api/v1/applications/:id",
            get(applications::handlers::handle_get),
        )
        .route(
            "/api/v1/applications/:id/status",
            patch(applications::handlers::handle_update_status),
        )
        .route(
            "/api/v1/applications/:id/withdraw",
            post(applications::handlers::handle_withdraw),
        )
        // Resumes
        .route(
            "/api/v1/resumes",
            get(resumes::handlers::handle_list).post(resumes::handlers::handle_upload),
        )
        .route(
            "/api/v1/resumes/:id",
            get(resumes::handlers::handle_get).delete(resumes::handlers::handle_delete),
        )
        .route(
            "/api/v1/resumes/:id/reparse",
            post(resumes::handlers::handle_reparse),
        )
        .route(
            "/api/v1/resumes/:id/primary",
            post(resumes::handlers::handle_set_primary),
        )
        // Matching
        .route("/api/v1/matching/score", post(matching::handlers::handle_score))
        .route(
            "/api/v1/matching/recommendations",
            get(matching::handlers::handle_recommendations),
        )
        .route(
            "/api/v1/matching/model",
            get(matching::handlers::handle_model_status),
        )
        .route(
            "/api/v1/matching/model/reload",
            post(matching::handlers::handle_model_reload),
        )
        // Notifications
        .route(
            "/api/v1/notifications",
            get(notifications::handlers::handle_list),
        )
        .route(
            "/api/v1/notifications/unread-count",
            get(notifications::handlers::handle_unread_count),
        )
        .route(
            "/api/v1/notifications/read-all",
            post(notifications::handlers::handle_mark_all_read),
        )
        .route(
            "/api/v1/notifications/:id",
            delete(notifications::handlers::handle_delete),
        )
        .route(
            "/api/v1/notifications/:id/read",
            post(notifications::handlers::handle_mark_read),
        )
        .route("/ws/notifications", get(notifications::ws::handle_ws))
        .with_state(state);

    api.merge(stateless_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(api_version_header))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Routes that need no shared state.
fn stateless_routes() -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/health/live", get(health::live_handler))
        .route("/api/schema", get(schema::schema_handler))
}

async fn api_version_header(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert("x-api-version", HeaderValue::from_static(API_VERSION));
    response
}
