use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use super::text_enum;

text_enum! {
    pub enum ParseStatus {
        Pending => "pending",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ResumeRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub file_key: String,
    pub file_name: String,
    pub content_type: String,
    pub file_size: i64,
    #[serde(skip_serializing)]
    pub parsed_text: Option<String>,
    pub parsed_data: Option<Value>,
    pub parse_status: String,
    pub parse_error: Option<String>,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One position extracted from a resume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperienceItem {
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EducationItem {
    pub institution: String,
    #[serde(default)]
    pub degree: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub graduation_year: Option<i32>,
}

/// Structured fields extracted from a resume by the LLM.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedResume {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub experience: Vec<ExperienceItem>,
    #[serde(default)]
    pub education: Vec<EducationItem>,
    #[serde(default)]
    pub total_years_experience: Option<f64>,
}

impl ResumeRow {
    /// Decodes `parsed_data` if parsing has completed.
    pub fn parsed(&self) -> Option<ParsedResume> {
        self.parsed_data
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}
