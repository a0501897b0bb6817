//! Scoring with a persistent cache, plus the background scoring task.

use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::{self, NewAnalysis};
use crate::applications::find_application;
use crate::errors::AppError;
use crate::jobs::find_job;
use crate::matching::features::ResumeInput;
use crate::matching::scorer::MatchResult;
use crate::models::analysis::{AnalysisResultRow, AnalysisType};
use crate::models::job::{JobPostRow, JobStatus};
use crate::models::notification::NotificationType;
use crate::models::resume::ResumeRow;
use crate::notifications::service::notify;
use crate::resumes::service::find_resume;
use crate::state::AppState;
use crate::tasks::TaskError;

pub const DEFAULT_RECOMMENDATIONS: i64 = 10;
pub const MAX_RECOMMENDATIONS: i64 = 50;
/// Newest published posts considered for recommendations.
const RECOMMENDATION_POOL: i64 = 200;

pub fn resume_input(resume: &ResumeRow) -> ResumeInput {
    ResumeInput {
        text: resume.parsed_text.clone().unwrap_or_default(),
        parsed: resume.parsed().unwrap_or_default(),
    }
}

/// A cached score is reusable while it has not expired, came from the active
/// scorer and is newer than both inputs.
pub fn cached_result(
    row: &AnalysisResultRow,
    scorer_version: &str,
    resume: &ResumeRow,
    job: &JobPostRow,
) -> Option<MatchResult> {
    let now = Utc::now();
    if !row.is_fresh(now)
        || row.model_version != scorer_version
        || row.created_at < resume.updated_at
        || row.created_at < job.updated_at
    {
        return None;
    }
    serde_json::from_value(row.payload.clone()).ok()
}

/// Scores a resume against a job post, reusing the cached analysis when valid.
pub async fn score_pair(
    state: &AppState,
    resume: &ResumeRow,
    job: &JobPostRow,
) -> Result<MatchResult, AppError> {
    let scorer = state.match_engine.scorer();
    let version = scorer.version();

    if let Some(row) = analysis::find(&state.db, resume.id, Some(job.id), AnalysisType::MatchScore).await? {
        if let Some(result) = cached_result(&row, &version, resume, job) {
            debug!("Match cache hit for resume {} / job {}", resume.id, job.id);
            return Ok(result);
        }
    }

    let result = scorer.score(&resume_input(resume), job).await;
    let payload = serde_json::to_value(&result)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode match result: {e}")))?;

    analysis::store(
        &state.db,
        NewAnalysis {
            resume_id: resume.id,
            job_post_id: Some(job.id),
            analysis_type: AnalysisType::MatchScore,
            payload: &payload,
            score: Some(result.score),
            model_version: &version,
            ttl_hours: state.config.analysis_cache_ttl_hours,
        },
    )
    .await?;

    Ok(result)
}

/// Runs the `calculate_match_score` task and stores the score on the application.
pub async fn score_application(state: &AppState, application_id: Uuid) -> Result<(), TaskError> {
    let application = find_application(&state.db, application_id).await?;
    let resume = find_resume(&state.db, application.resume_id).await?;
    let job = find_job(&state.db, application.job_post_id).await?;

    let result = score_pair(state, &resume, &job).await?;

    sqlx::query("UPDATE applications SET match_score = $2, updated_at = NOW() WHERE id = $1")
        .bind(application_id)
        .bind(result.score)
        .execute(&state.db)
        .await?;

    info!(
        "Application {application_id} scored {:.2} ({})",
        result.score, result.model_version
    );

    let vars = HashMap::from([
        ("job_title".to_string(), job.title.clone()),
        ("score".to_string(), format!("{:.0}", result.score)),
    ]);
    if let Err(e) = notify(
        state,
        application.job_seeker_id,
        NotificationType::MatchScoreReady,
        &vars,
        json!({ "application_id": application_id, "score": result.score }),
    )
    .await
    {
        warn!("Application {application_id} scored but the applicant was not notified: {e}");
    }

    Ok(())
}

/// Application ids whose score depends on `resume_id`.
pub async fn applications_for_resume(
    state: &AppState,
    resume_id: Uuid,
) -> Result<Vec<Uuid>, sqlx::Error> {
    sqlx::query_scalar("SELECT id FROM applications WHERE resume_id = $1")
        .bind(resume_id)
        .fetch_all(&state.db)
        .await
}

#[derive(Debug, Serialize)]
pub struct Recommendation {
    pub job: JobPostRow,
    pub result: MatchResult,
}

/// Ranks recent published job posts for a resume, best match first.
pub async fn recommendations(
    state: &AppState,
    resume: &ResumeRow,
    limit: i64,
) -> Result<Vec<Recommendation>, AppError> {
    let jobs = sqlx::query_as::<_, JobPostRow>(
        r#"
        SELECT * FROM job_posts
        WHERE status = $1
          AND id NOT IN (SELECT job_post_id FROM applications WHERE job_seeker_id = $2)
        ORDER BY created_at DESC
        LIMIT $3
        "#,
    )
    .bind(JobStatus::Published.as_str())
    .bind(resume.owner_id)
    .bind(RECOMMENDATION_POOL)
    .fetch_all(&state.db)
    .await?;

    let scorer = state.match_engine.scorer();
    let input = resume_input(resume);
    let mut ranked = Vec::with_capacity(jobs.len());
    for job in jobs {
        let result = scorer.score(&input, &job).await;
        ranked.push(Recommendation { job, result });
    }
    Ok(rank(ranked, limit))
}

fn rank(mut ranked: Vec<Recommendation>, limit: i64) -> Vec<Recommendation> {
    ranked.sort_by(|a, b| b.result.score.total_cmp(&a.result.score));
    ranked.truncate(limit.clamp(1, MAX_RECOMMENDATIONS) as usize);
    ranked
}
