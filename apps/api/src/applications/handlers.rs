//! Axum route handlers for job applications.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::{Postgres, QueryBuilder};
use tracing::{info, warn};
use uuid::Uuid;

use crate::applications::{
    can_view_application, check_transition, check_withdrawal, find_application,
};
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::jobs::{find_job, visible_job};
use crate::models::application::{ApplicationRow, ApplicationStatus};
use crate::models::notification::NotificationType;
use crate::models::user::Role;
use crate::notifications::service::notify_later;
use crate::pagination::{Page, PageParams};
use crate::resumes::service::owned_resume;
use crate::state::AppState;
use crate::tasks::Task;

const MAX_COVER_LETTER_CHARS: usize = 5_000;

#[derive(Debug, Deserialize)]
pub struct ApplyRequest {
    pub job_post_id: Uuid,
    pub resume_id: Uuid,
    pub cover_letter: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: ApplicationStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub job_post_id: Option<Uuid>,
    pub status: Option<ApplicationStatus>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

const UNKNOWN_USER_NAME: &str = "A candidate";

/// Display name for notification text. Callers have already written their
/// row, so a failed lookup falls back rather than failing the request.
async fn user_name(state: &AppState, user_id: Uuid) -> String {
    let lookup = sqlx::query_scalar("SELECT full_name FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.db)
        .await;
    name_or_fallback(user_id, lookup)
}

fn name_or_fallback(user_id: Uuid, lookup: Result<Option<String>, sqlx::Error>) -> String {
    match lookup {
        Ok(Some(name)) => name,
        Ok(None) => UNKNOWN_USER_NAME.to_string(),
        Err(e) => {
            warn!("Could not look up name of user {user_id}: {e}");
            UNKNOWN_USER_NAME.to_string()
        }
    }
}

/// POST /api/v1/applications
pub async fn handle_apply(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<ApplyRequest>,
) -> Result<(StatusCode, Json<ApplicationRow>), AppError> {
    user.require_role(&[Role::JobSeeker])?;

    let job = visible_job(&state.db, &user, req.job_post_id).await?;
    if !job.is_published() {
        return Err(AppError::Validation(
            "This job post is not accepting applications".to_string(),
        ));
    }
    owned_resume(&state.db, user.id, req.resume_id).await?;

    let cover_letter = req
        .cover_letter
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());
    if cover_letter
        .as_ref()
        .map_or(false, |c| c.chars().count() > MAX_COVER_LETTER_CHARS)
    {
        return Err(AppError::Validation(format!(
            "cover_letter must be at most {MAX_COVER_LETTER_CHARS} characters"
        )));
    }

    let application = sqlx::query_as::<_, ApplicationRow>(
        r#"
        INSERT INTO applications (id, job_seeker_id, job_post_id, resume_id, cover_letter, status)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user.id)
    .bind(job.id)
    .bind(req.resume_id)
    .bind(&cover_letter)
    .bind(ApplicationStatus::Pending.as_str())
    .fetch_one(&state.db)
    .await
    .map_err(|e| match AppError::from(e) {
        AppError::Conflict(_) => {
            AppError::Conflict("You have already applied to this job".to_string())
        }
        other => other,
    })?;

    info!(
        "Application {} created by {} for job {}",
        application.id, user.id, job.id
    );

    if let Err(e) = state
        .tasks
        .dispatch(Task::CalculateMatchScore {
            application_id: application.id,
        })
        .await
    {
        warn!("Application {} created but scoring was not queued: {e}", application.id);
    }

    let vars = HashMap::from([
        ("job_title".to_string(), job.title.clone()),
        ("applicant_name".to_string(), user_name(&state, user.id).await),
    ]);
    notify_later(
        &state,
        job.recruiter_id,
        NotificationType::ApplicationReceived,
        vars,
        json!({ "application_id": application.id, "job_post_id": job.id }),
    )
    .await;

    Ok((StatusCode::CREATED, Json(application)))
}

fn push_list_filters(qb: &mut QueryBuilder<'_, Postgres>, user: &AuthUser, params: &ListParams) {
    qb.push(" WHERE TRUE");
    match user.role {
        Role::JobSeeker => {
            qb.push(" AND a.job_seeker_id = ").push_bind(user.id);
        }
        Role::Recruiter => {
            qb.push(" AND j.recruiter_id = ").push_bind(user.id);
        }
        Role::Admin => {}
    }
    if let Some(job_post_id) = params.job_post_id {
        qb.push(" AND a.job_post_id = ").push_bind(job_post_id);
    }
    if let Some(status) = params.status {
        qb.push(" AND a.status = ").push_bind(status.as_str());
    }
}

/// GET /api/v1/applications
///
/// Job seekers see their own applications, recruiters see applications to
/// their job posts, admins see everything.
pub async fn handle_list(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<ListParams>,
) -> Result<Json<Page<ApplicationRow>>, AppError> {
    let page = PageParams {
        page: params.page,
        per_page: params.per_page,
    };

    let mut query = QueryBuilder::<Postgres>::new(
        "SELECT a.* FROM applications a JOIN job_posts j ON j.id = a.job_post_id",
    );
    push_list_filters(&mut query, &user, &params);
    query
        .push(" ORDER BY a.created_at DESC LIMIT ")
        .push_bind(page.per_page())
        .push(" OFFSET ")
        .push_bind(page.offset());
    let items = query
        .build_query_as::<ApplicationRow>()
        .fetch_all(&state.db)
        .await?;

    let mut count = QueryBuilder::<Postgres>::new(
        "SELECT COUNT(*) FROM applications a JOIN job_posts j ON j.id = a.job_post_id",
    );
    push_list_filters(&mut count, &user, &params);
    let total: i64 = count.build_query_scalar().fetch_one(&state.db).await?;

    Ok(Json(Page::new(items, total, page)))
}

/// GET /api/v1/applications/:id
pub async fn handle_get(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApplicationRow>, AppError> {
    let application = find_application(&state.db, id).await?;
    let job = find_job(&state.db, application.job_post_id).await?;
    if !can_view_application(&user, &application, job.recruiter_id) {
        return Err(AppError::NotFound(format!("Application {id} not found")));
    }
    Ok(Json(application))
}

/// Moves an application only if its status is still `from`.
async fn update_status(
    state: &AppState,
    id: Uuid,
    from: ApplicationStatus,
    to: ApplicationStatus,
) -> Result<ApplicationRow, AppError> {
    sqlx::query_as::<_, ApplicationRow>(
        r#"
        UPDATE applications SET status = $3, updated_at = NOW()
        WHERE id = $1 AND status = $2
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(from.as_str())
    .bind(to.as_str())
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| {
        AppError::Conflict(format!(
            "Application {id} was modified concurrently, reload and try again"
        ))
    })
}

/// PATCH /api/v1/applications/:id/status
pub async fn handle_update_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<ApplicationRow>, AppError> {
    let application = find_application(&state.db, id).await?;
    let job = find_job(&state.db, application.job_post_id).await?;
    if !can_view_application(&user, &application, job.recruiter_id) {
        return Err(AppError::NotFound(format!("Application {id} not found")));
    }
    if job.recruiter_id != user.id && !user.is_admin() {
        return Err(AppError::Forbidden);
    }

    let current = application.status();
    check_transition(current, req.status)?;
    let updated = update_status(&state, id, current, req.status).await?;

    info!("Application {id} moved {current} -> {} by {}", req.status, user.id);

    let vars = HashMap::from([
        ("job_title".to_string(), job.title.clone()),
        ("company".to_string(), job.company.clone()),
        ("status".to_string(), req.status.label().to_string()),
        (
            "recipient_name".to_string(),
            user_name(&state, application.job_seeker_id).await,
        ),
    ]);
    notify_later(
        &state,
        application.job_seeker_id,
        NotificationType::ApplicationStatusChanged,
        vars,
        json!({ "application_id": id, "status": req.status }),
    )
    .await;

    Ok(Json(updated))
}

/// POST /api/v1/applications/:id/withdraw
pub async fn handle_withdraw(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApplicationRow>, AppError> {
    let application = find_application(&state.db, id).await?;
    if application.job_seeker_id != user.id {
        return Err(AppError::NotFound(format!("Application {id} not found")));
    }

    let current = application.status();
    check_withdrawal(current)?;
    let updated = update_status(&state, id, current, ApplicationStatus::Withdrawn).await?;

    info!("Application {id} withdrawn by {}", user.id);
    Ok(Json(updated))
}
