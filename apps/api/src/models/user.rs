use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::text_enum;

text_enum! {
    /// The two primary user roles, plus platform administrators.
    pub enum Role {
        JobSeeker => "job_seeker",
        Recruiter => "recruiter",
        Admin => "admin",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub full_name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn role(&self) -> Option<Role> {
        self.role.parse().ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobSeekerProfile {
    pub user_id: Uuid,
    pub headline: Option<String>,
    pub location: Option<String>,
    pub years_experience: Option<i32>,
    pub desired_salary_min: Option<i32>,
    pub desired_salary_max: Option<i32>,
    pub open_to_remote: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RecruiterProfile {
    pub user_id: Uuid,
    pub company_name: Option<String>,
    pub company_website: Option<String>,
    pub position: Option<String>,
    pub updated_at: DateTime<Utc>,
}
