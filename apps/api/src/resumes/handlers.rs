//! Axum route handlers for resume upload and management.

use std::future::Future;

use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::StatusCode,
    Json,
};
use bytes::Bytes;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis;
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::resume::{ParseStatus, ResumeRow};
use crate::models::user::Role;
use crate::resumes::parser::{extract_text, normalize_text, DocumentKind};
use crate::resumes::service::{owned_resume, visible_resume};
use crate::resumes::storage::{delete_resume_object, put_resume_object, resume_object_key};
use crate::state::AppState;
use crate::tasks::Task;

const MAX_TITLE_LEN: usize = 200;

struct UploadedFile {
    file_name: String,
    content_type: Option<String>,
    body: Bytes,
}

fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge("Resume file is too large".to_string())
    } else {
        AppError::Validation(format!("Invalid multipart body: {}", err.body_text()))
    }
}

/// Runs `cleanup` when `result` is an error and hands the original result back.
/// A failed cleanup is logged; the caller still sees the first error.
async fn undo_on_error<T, F, Fut>(
    result: Result<T, AppError>,
    what: &str,
    cleanup: F,
) -> Result<T, AppError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), AppError>>,
{
    if result.is_err() {
        if let Err(e) = cleanup().await {
            warn!("Could not clean up {what} after a failed write: {e}");
        }
    }
    result
}

/// Title used when the upload carries none: the file name without extension.
fn default_title(file_name: &str) -> String {
    let stem = file_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(file_name)
        .trim();
    if stem.is_empty() {
        "Resume".to_string()
    } else {
        stem.to_string()
    }
}

fn resolve_title(title: Option<String>, file_name: &str) -> Result<String, AppError> {
    let title = title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| default_title(file_name));
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(AppError::Validation(format!(
            "title must be at most {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(title)
}

/// POST /api/v1/resumes (multipart: `file`, optional `title`)
pub async fn handle_upload(
    State(state): State<AppState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ResumeRow>), AppError> {
    user.require_role(&[Role::JobSeeker])?;

    let mut upload: Option<UploadedFile> = None;
    let mut title: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or("resume").to_string();
                let content_type = field.content_type().map(str::to_string);
                let body = field.bytes().await.map_err(multipart_error)?;
                upload = Some(UploadedFile {
                    file_name,
                    content_type,
                    body,
                });
            }
            Some("title") => title = Some(field.text().await.map_err(multipart_error)?),
            _ => {}
        }
    }

    let upload =
        upload.ok_or_else(|| AppError::Validation("A 'file' field is required".to_string()))?;
    if upload.body.is_empty() {
        return Err(AppError::Validation("Uploaded file is empty".to_string()));
    }
    if upload.body.len() > state.config.max_upload_bytes {
        return Err(AppError::PayloadTooLarge(format!(
            "Resume exceeds the {} byte limit",
            state.config.max_upload_bytes
        )));
    }

    let kind = DocumentKind::detect(upload.content_type.as_deref(), &upload.file_name)
        .ok_or_else(|| {
            AppError::Validation("Only PDF and plain-text resumes are supported".to_string())
        })?;
    let title = resolve_title(title, &upload.file_name)?;

    let text = normalize_text(&extract_text(kind, upload.body.clone()).await?);

    let resume_id = Uuid::new_v4();
    let file_key = resume_object_key(user.id, resume_id, &upload.file_name);
    let file_size = upload.body.len() as i64;
    put_resume_object(
        &state.s3,
        &state.config.s3_bucket,
        &file_key,
        upload.body,
        kind.content_type(),
    )
    .await?;

    let resume = sqlx::query_as::<_, ResumeRow>(
        r#"
        INSERT INTO resumes
            (id, owner_id, title, file_key, file_name, content_type, file_size, parsed_text, is_primary)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8,
                NOT EXISTS (SELECT 1 FROM resumes WHERE owner_id = $2))
        RETURNING *
        "#,
    )
    .bind(resume_id)
    .bind(user.id)
    .bind(&title)
    .bind(&file_key)
    .bind(&upload.file_name)
    .bind(kind.content_type())
    .bind(file_size)
    .bind(&text)
    .fetch_one(&state.db)
    .await
    .map_err(AppError::from);

    // Without its row the stored object would be unreachable.
    let resume = undo_on_error(resume, &file_key, || {
        delete_resume_object(&state.s3, &state.config.s3_bucket, &file_key)
    })
    .await?;

    info!(
        "Resume {} uploaded by {} ({} bytes, {} chars of text)",
        resume.id,
        user.id,
        file_size,
        text.chars().count()
    );

    if let Err(e) = state.tasks.dispatch(Task::ParseResume { resume_id }).await {
        warn!("Resume {resume_id} stored but parsing was not queued: {e}");
    }

    Ok((StatusCode::CREATED, Json(resume)))
}

/// GET /api/v1/resumes
pub async fn handle_list(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<ResumeRow>>, AppError> {
    let resumes = sqlx::query_as::<_, ResumeRow>(
        "SELECT * FROM resumes WHERE owner_id = $1 ORDER BY is_primary DESC, created_at DESC",
    )
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(resumes))
}

/// GET /api/v1/resumes/:id
pub async fn handle_get(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ResumeRow>, AppError> {
    Ok(Json(visible_resume(&state.db, &user, id).await?))
}

/// DELETE /api/v1/resumes/:id
pub async fn handle_delete(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let resume = owned_resume(&state.db, user.id, id).await?;

    let mut tx = state.db.begin().await?;
    sqlx::query("DELETE FROM resumes WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    if resume.is_primary {
        // Promote the newest remaining resume.
        sqlx::query(
            r#"
            UPDATE resumes SET is_primary = TRUE, updated_at = NOW()
            WHERE id = (SELECT id FROM resumes WHERE owner_id = $1 ORDER BY created_at DESC LIMIT 1)
            "#,
        )
        .bind(user.id)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    if let Err(e) =
        delete_resume_object(&state.s3, &state.config.s3_bucket, &resume.file_key).await
    {
        warn!("Resume {id} deleted but its object was not removed: {e}");
    }

    info!("Resume {id} deleted by {}", user.id);
    Ok(StatusCode::NO_CONTENT)
}

/// Resets a resume to pending unless a worker is parsing it right now. The
/// status check lives in the UPDATE so concurrent callers cannot both pass.
const RESET_FOR_REPARSE_SQL: &str = r#"
    UPDATE resumes SET parse_status = $2, parse_error = NULL, updated_at = NOW()
    WHERE id = $1 AND parse_status <> $3
    RETURNING *
"#;

/// No row back from the guarded reset means the resume is mid-parse.
fn claimed_for_reparse<T>(id: Uuid, reset: Option<T>) -> Result<T, AppError> {
    reset.ok_or_else(|| AppError::Conflict(format!("Resume {id} is already being processed")))
}

/// POST /api/v1/resumes/:id/reparse
pub async fn handle_reparse(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<ResumeRow>), AppError> {
    owned_resume(&state.db, user.id, id).await?;

    let reset = sqlx::query_as::<_, ResumeRow>(RESET_FOR_REPARSE_SQL)
        .bind(id)
        .bind(ParseStatus::Pending.as_str())
        .bind(ParseStatus::Processing.as_str())
        .fetch_optional(&state.db)
        .await?;
    let resume = claimed_for_reparse(id, reset)?;

    analysis::invalidate_resume(&state.db, id).await?;
    state.tasks.dispatch(Task::ParseResume { resume_id: id }).await?;

    Ok((StatusCode::ACCEPTED, Json(resume)))
}

/// POST /api/v1/resumes/:id/primary
pub async fn handle_set_primary(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ResumeRow>, AppError> {
    owned_resume(&state.db, user.id, id).await?;

    let mut tx = state.db.begin().await?;
    sqlx::query("UPDATE resumes SET is_primary = FALSE WHERE owner_id = $1 AND is_primary")
        .bind(user.id)
        .execute(&mut *tx)
        .await?;
    let resume = sqlx::query_as::<_, ResumeRow>(
        "UPDATE resumes SET is_primary = TRUE, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(Json(resume))
}
