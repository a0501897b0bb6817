use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::text_enum;

text_enum! {
    pub enum JobStatus {
        Draft => "draft",
        Published => "published",
        Closed => "closed",
    }
}

text_enum! {
    pub enum EmploymentType {
        FullTime => "full_time",
        PartTime => "part_time",
        Contract => "contract",
        Internship => "internship",
    }
}

text_enum! {
    pub enum ExperienceLevel {
        Entry => "entry",
        Mid => "mid",
        Senior => "senior",
        Lead => "lead",
    }
}

impl ExperienceLevel {
    /// Years of experience a candidate is expected to bring at this level.
    pub fn target_years(&self) -> f64 {
        match self {
            ExperienceLevel::Entry => 0.0,
            ExperienceLevel::Mid => 2.0,
            ExperienceLevel::Senior => 5.0,
            ExperienceLevel::Lead => 8.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobPostRow {
    pub id: Uuid,
    pub recruiter_id: Uuid,
    pub title: String,
    pub company: String,
    pub description: String,
    pub requirements: String,
    pub location: Option<String>,
    pub employment_type: String,
    pub experience_level: String,
    pub salary_min: Option<i32>,
    pub salary_max: Option<i32>,
    pub remote: bool,
    pub required_skills: Vec<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobPostRow {
    pub fn is_published(&self) -> bool {
        self.status == JobStatus::Published.as_str()
    }

    pub fn experience_level(&self) -> ExperienceLevel {
        self.experience_level.parse().unwrap_or(ExperienceLevel::Mid)
    }
}
