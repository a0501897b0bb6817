use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::jobs::find_job;
use crate::matching::scorer::MatchResult;
use crate::matching::service::{recommendations, score_pair, Recommendation, DEFAULT_RECOMMENDATIONS};
use crate::models::resume::ResumeRow;
use crate::models::user::Role;
use crate::resumes::service::{find_resume, owned_resume};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ScoreRequest {
    pub resume_id: Uuid,
    pub job_post_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct RecommendationParams {
    pub resume_id: Option<Uuid>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ModelStatus {
    pub version: String,
    pub model_loaded: bool,
}

/// POST /api/v1/matching/score
///
/// The caller must own the resume or the job post.
pub async fn handle_score(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<ScoreRequest>,
) -> Result<Json<MatchResult>, AppError> {
    let resume = find_resume(&state.db, req.resume_id).await?;
    let job = find_job(&state.db, req.job_post_id).await?;

    let owns_resume = resume.owner_id == user.id;
    let owns_job = job.recruiter_id == user.id;
    if !(owns_resume || owns_job || user.is_admin()) {
        return Err(AppError::Forbidden);
    }
    if !owns_job && !user.is_admin() && !job.is_published() {
        return Err(AppError::NotFound(format!("Job post {} not found", job.id)));
    }

    Ok(Json(score_pair(&state, &resume, &job).await?))
}

async fn primary_resume(state: &AppState, owner_id: Uuid) -> Result<ResumeRow, AppError> {
    sqlx::query_as::<_, ResumeRow>(
        "SELECT * FROM resumes WHERE owner_id = $1 ORDER BY is_primary DESC, created_at DESC LIMIT 1",
    )
    .bind(owner_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound("Upload a resume to get recommendations".to_string()))
}

/// GET /api/v1/matching/recommendations
pub async fn handle_recommendations(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<RecommendationParams>,
) -> Result<Json<Vec<Recommendation>>, AppError> {
    user.require_role(&[Role::JobSeeker])?;

    let resume = match params.resume_id {
        Some(id) => owned_resume(&state.db, user.id, id).await?,
        None => primary_resume(&state, user.id).await?,
    };
    let limit = params.limit.unwrap_or(DEFAULT_RECOMMENDATIONS);

    Ok(Json(recommendations(&state, &resume, limit).await?))
}

/// GET /api/v1/matching/model
pub async fn handle_model_status(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Json<ModelStatus> {
    Json(ModelStatus {
        version: state.match_engine.scorer().version(),
        model_loaded: state.match_engine.is_model_loaded(),
    })
}

/// POST /api/v1/matching/model/reload (admin)
pub async fn handle_model_reload(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ModelStatus>, AppError> {
    user.require_role(&[Role::Admin])?;
    let version = state
        .match_engine
        .reload()
        .map_err(|e| AppError::Validation(format!("Match model could not be loaded: {e}")))?;
    info!("Match model reloaded by {}: {version}", user.id);
    Ok(Json(ModelStatus {
        version,
        model_loaded: true,
    }))
}
