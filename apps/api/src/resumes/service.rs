//! Resume lookups and the background parse pipeline.

use std::collections::HashMap;

use serde_json::json;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::{self, NewAnalysis};
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::matching::service::applications_for_resume;
use crate::models::analysis::AnalysisType;
use crate::models::notification::NotificationType;
use crate::models::resume::{ParseStatus, ResumeRow};
use crate::models::user::Role;
use crate::notifications::service::notify;
use crate::resumes::parser::parse_resume_text;
use crate::state::AppState;
use crate::tasks::{Task, TaskError};

pub const EMPTY_TEXT_REASON: &str = "No readable text was found in the document";

pub async fn find_resume(pool: &PgPool, resume_id: Uuid) -> Result<ResumeRow, AppError> {
    sqlx::query_as::<_, ResumeRow>("SELECT * FROM resumes WHERE id = $1")
        .bind(resume_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Resume {resume_id} not found")))
}

/// Owners and admins see every resume. Recruiters see resumes attached to
/// applications on their own job posts.
pub async fn can_view_resume(
    pool: &PgPool,
    user: &AuthUser,
    resume: &ResumeRow,
) -> Result<bool, sqlx::Error> {
    if resume.owner_id == user.id || user.is_admin() {
        return Ok(true);
    }
    if user.role != Role::Recruiter {
        return Ok(false);
    }
    sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM applications a
            JOIN job_posts j ON j.id = a.job_post_id
            WHERE a.resume_id = $1 AND j.recruiter_id = $2
        )
        "#,
    )
    .bind(resume.id)
    .bind(user.id)
    .fetch_one(pool)
    .await
}

/// Loads a resume the caller may read. Anything else looks like a 404.
pub async fn visible_resume(
    pool: &PgPool,
    user: &AuthUser,
    resume_id: Uuid,
) -> Result<ResumeRow, AppError> {
    let resume = find_resume(pool, resume_id).await?;
    if !can_view_resume(pool, user, &resume).await? {
        return Err(AppError::NotFound(format!("Resume {resume_id} not found")));
    }
    Ok(resume)
}

/// Loads a resume owned by the caller.
pub async fn owned_resume(
    pool: &PgPool,
    owner_id: Uuid,
    resume_id: Uuid,
) -> Result<ResumeRow, AppError> {
    let resume = find_resume(pool, resume_id).await?;
    if resume.owner_id != owner_id {
        return Err(AppError::NotFound(format!("Resume {resume_id} not found")));
    }
    Ok(resume)
}

async fn set_status(
    pool: &PgPool,
    resume_id: Uuid,
    status: ParseStatus,
    error: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE resumes SET parse_status = $2, parse_error = $3, updated_at = NOW() WHERE id = $1",
    )
    .bind(resume_id)
    .bind(status.as_str())
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

/// Runs the `parse_resume` task: LLM extraction of structured fields from
/// the stored text, cached as a `resume_parse` analysis.
pub async fn process_resume(state: &AppState, resume_id: Uuid) -> Result<(), TaskError> {
    let resume = find_resume(&state.db, resume_id).await?;

    let text = resume.parsed_text.as_deref().unwrap_or_default().trim();
    if text.is_empty() {
        mark_parse_failed(state, resume_id, EMPTY_TEXT_REASON).await?;
        return Ok(());
    }

    set_status(&state.db, resume_id, ParseStatus::Processing, None).await?;

    let parsed = parse_resume_text(&state.llm, text).await.map_err(|e| {
        if e.is_transient() {
            TaskError::Retryable(e.to_string())
        } else {
            TaskError::Fatal(e.to_string())
        }
    })?;
    let payload = serde_json::to_value(&parsed).map_err(|e| TaskError::Fatal(e.to_string()))?;

    sqlx::query(
        r#"
        UPDATE resumes
        SET parsed_data = $2, parse_status = $3, parse_error = NULL, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(resume_id)
    .bind(&payload)
    .bind(ParseStatus::Completed.as_str())
    .execute(&state.db)
    .await?;

    analysis::store(
        &state.db,
        NewAnalysis {
            resume_id,
            job_post_id: None,
            analysis_type: AnalysisType::ResumeParse,
            payload: &payload,
            score: None,
            model_version: state.llm.model(),
            ttl_hours: state.config.analysis_cache_ttl_hours,
        },
    )
    .await?;

    info!(
        "Resume {resume_id} parsed: {} skills, {} positions",
        parsed.skills.len(),
        parsed.experience.len()
    );

    // Scores computed before parsing finished only saw the raw text.
    for application_id in applications_for_resume(state, resume_id).await? {
        if let Err(e) = state
            .tasks
            .dispatch(Task::CalculateMatchScore { application_id })
            .await
        {
            warn!("Could not queue rescoring of application {application_id}: {e}");
        }
    }

    let vars = HashMap::from([
        ("resume_title".to_string(), resume.title.clone()),
        ("skill_count".to_string(), parsed.skills.len().to_string()),
    ]);
    if let Err(e) = notify(
        state,
        resume.owner_id,
        NotificationType::ResumeParsed,
        &vars,
        json!({ "resume_id": resume_id }),
    )
    .await
    {
        warn!("Resume {resume_id} parsed but the owner was not notified: {e}");
    }

    Ok(())
}

/// Marks a resume failed and tells the owner why.
pub async fn mark_parse_failed(
    state: &AppState,
    resume_id: Uuid,
    reason: &str,
) -> Result<(), AppError> {
    let resume = find_resume(&state.db, resume_id).await?;
    set_status(&state.db, resume_id, ParseStatus::Failed, Some(reason)).await?;
    warn!("Resume {resume_id} failed to parse: {reason}");

    let vars = HashMap::from([
        ("resume_title".to_string(), resume.title),
        ("reason".to_string(), reason.to_string()),
    ]);
    notify(
        state,
        resume.owner_id,
        NotificationType::ResumeParseFailed,
        &vars,
        json!({ "resume_id": resume_id }),
    )
    .await?;
    Ok(())
}

/// Reason stored on the resume when the task gives up. Provider error detail
/// is kept out of the user-facing message.
pub fn failure_reason(error: &TaskError) -> String {
    match error {
        TaskError::TimeLimitExceeded(_) => "Processing took too long".to_string(),
        TaskError::Retryable(_) => "The AI service is unavailable, please try again later".to_string(),
        TaskError::Fatal(_) => "The resume could not be analysed".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_failure_reason_hides_provider_detail() {
        let reason = failure_reason(&TaskError::Retryable(
            "API error (status 503): upstream key=abc".to_string(),
        ));
        assert!(!reason.contains("abc"));
        assert!(failure_reason(&TaskError::TimeLimitExceeded(Duration::from_secs(300)))
            .contains("too long"));
    }
}
