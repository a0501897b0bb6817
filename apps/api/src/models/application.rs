use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::text_enum;

text_enum! {
    pub enum ApplicationStatus {
        Pending => "pending",
        Reviewing => "reviewing",
        Shortlisted => "shortlisted",
        Interview => "interview",
        Offered => "offered",
        Rejected => "rejected",
        Withdrawn => "withdrawn",
    }
}

impl ApplicationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ApplicationStatus::Offered | ApplicationStatus::Rejected | ApplicationStatus::Withdrawn
        )
    }

    /// Whether a recruiter may move an application from `self` to `next`.
    /// Withdrawal is an applicant action and is not part of this table.
    pub fn can_transition_to(&self, next: ApplicationStatus) -> bool {
        use ApplicationStatus::*;
        matches!(
            (self, next),
            (Pending, Reviewing | Shortlisted | Rejected)
                | (Reviewing, Shortlisted | Interview | Rejected)
                | (Shortlisted, Interview | Rejected)
                | (Interview, Offered | Rejected)
        )
    }

    /// Human-readable label used in notification text.
    pub fn label(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "Pending",
            ApplicationStatus::Reviewing => "Under review",
            ApplicationStatus::Shortlisted => "Shortlisted",
            ApplicationStatus::Interview => "Interview",
            ApplicationStatus::Offered => "Offer extended",
            ApplicationStatus::Rejected => "Not selected",
            ApplicationStatus::Withdrawn => "Withdrawn",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApplicationRow {
    pub id: Uuid,
    pub job_seeker_id: Uuid,
    pub job_post_id: Uuid,
    pub resume_id: Uuid,
    pub cover_letter: Option<String>,
    pub status: String,
    pub match_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApplicationRow {
    pub fn status(&self) -> ApplicationStatus {
        self.status.parse().unwrap_or(ApplicationStatus::Pending)
    }
}
