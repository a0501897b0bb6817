//! Cache of AI analysis results in `ai_analysis_results`.
//!
//! One row per (resume, job post, analysis type). Resume-only analyses have a
//! NULL job post, which the unique index coalesces to the nil UUID.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::analysis::{AnalysisResultRow, AnalysisType};

pub struct NewAnalysis<'a> {
    pub resume_id: Uuid,
    pub job_post_id: Option<Uuid>,
    pub analysis_type: AnalysisType,
    pub payload: &'a Value,
    pub score: Option<f64>,
    pub model_version: &'a str,
    pub ttl_hours: i64,
}

pub fn cache_expiry(now: DateTime<Utc>, ttl_hours: i64) -> Option<DateTime<Utc>> {
    (ttl_hours > 0).then(|| now + Duration::hours(ttl_hours))
}

pub async fn find(
    pool: &PgPool,
    resume_id: Uuid,
    job_post_id: Option<Uuid>,
    analysis_type: AnalysisType,
) -> Result<Option<AnalysisResultRow>, sqlx::Error> {
    sqlx::query_as::<_, AnalysisResultRow>(
        "SELECT * FROM ai_analysis_results \
         WHERE resume_id = $1 AND job_post_id IS NOT DISTINCT FROM $2 AND analysis_type = $3",
    )
    .bind(resume_id)
    .bind(job_post_id)
    .bind(analysis_type.as_str())
    .fetch_optional(pool)
    .await
}

/// Inserts or replaces the cached result for the analysis key.
pub async fn store(pool: &PgPool, new: NewAnalysis<'_>) -> Result<AnalysisResultRow, sqlx::Error> {
    sqlx::query_as::<_, AnalysisResultRow>(
        r#"
        INSERT INTO ai_analysis_results
            (id, resume_id, job_post_id, analysis_type, payload, score, model_version, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (resume_id, (COALESCE(job_post_id, '00000000-0000-0000-0000-000000000000'::uuid)), analysis_type)
        DO UPDATE SET
            payload = EXCLUDED.payload,
            score = EXCLUDED.score,
            model_version = EXCLUDED.model_version,
            created_at = NOW(),
            expires_at = EXCLUDED.expires_at
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(new.resume_id)
    .bind(new.job_post_id)
    .bind(new.analysis_type.as_str())
    .bind(new.payload)
    .bind(new.score)
    .bind(new.model_version)
    .bind(cache_expiry(Utc::now(), new.ttl_hours))
    .fetch_one(pool)
    .await
}

/// Drops every cached result derived from `resume_id`, e.g. before a reparse.
pub async fn invalidate_resume(pool: &PgPool, resume_id: Uuid) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM ai_analysis_results WHERE resume_id = $1")
        .bind(resume_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn cleanup_expired(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM ai_analysis_results WHERE expires_at IS NOT NULL AND expires_at <= NOW()",
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_expiry() {
        let now = Utc::now();
        assert_eq!(cache_expiry(now, 168), Some(now + Duration::hours(168)));
        assert_eq!(cache_expiry(now, 0), None);
    }
}
