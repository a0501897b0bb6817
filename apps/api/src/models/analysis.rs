use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use super::text_enum;

text_enum! {
    pub enum AnalysisType {
        ResumeParse => "resume_parse",
        MatchScore => "match_score",
        SkillGap => "skill_gap",
    }
}

/// Cached analysis payload keyed by (resume, job post, analysis type).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AnalysisResultRow {
    pub id: Uuid,
    pub resume_id: Uuid,
    pub job_post_id: Option<Uuid>,
    pub analysis_type: String,
    pub payload: Value,
    pub score: Option<f64>,
    pub model_version: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AnalysisResultRow {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp > now).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn row(expires_at: Option<DateTime<Utc>>) -> AnalysisResultRow {
        AnalysisResultRow {
            id: Uuid::new_v4(),
            resume_id: Uuid::new_v4(),
            job_post_id: None,
            analysis_type: AnalysisType::MatchScore.as_str().to_string(),
            payload: json!({}),
            score: Some(71.5),
            model_version: "test".to_string(),
            created_at: Utc::now(),
            expires_at,
        }
    }

    #[test]
    fn test_expired_row_is_stale() {
        let now = Utc::now();
        assert!(!row(Some(now - Duration::minutes(1))).is_fresh(now));
        assert!(row(Some(now + Duration::minutes(1))).is_fresh(now));
    }

    #[test]
    fn test_row_without_expiry_never_goes_stale() {
        assert!(row(None).is_fresh(Utc::now()));
    }
}
