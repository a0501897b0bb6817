use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::text_enum;

text_enum! {
    pub enum Proficiency {
        Beginner => "beginner",
        Intermediate => "intermediate",
        Advanced => "advanced",
        Expert => "expert",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SkillRow {
    pub id: Uuid,
    pub name: String,
    pub category: String,
}

/// A user's skill joined with the catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserSkillRow {
    pub skill_id: Uuid,
    pub name: String,
    pub category: String,
    pub proficiency: String,
    pub years_experience: Option<f32>,
}
