use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use super::text_enum;

text_enum! {
    pub enum NotificationType {
        ApplicationReceived => "application_received",
        ApplicationStatusChanged => "application_status_changed",
        ResumeParsed => "resume_parsed",
        ResumeParseFailed => "resume_parse_failed",
        MatchScoreReady => "match_score_ready",
        JobRecommendation => "job_recommendation",
        System => "system",
    }
}

text_enum! {
    pub enum Channel {
        InApp => "in_app",
        Email => "email",
        Websocket => "websocket",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NotificationRow {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub notification_type: String,
    pub channel: String,
    pub title: String,
    pub message: String,
    pub data: Value,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NotificationTemplateRow {
    pub id: Uuid,
    pub notification_type: String,
    pub channel: String,
    pub subject_template: String,
    pub body_template: String,
    pub is_active: bool,
}
