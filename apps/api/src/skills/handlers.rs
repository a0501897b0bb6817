use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::skill::{Proficiency, SkillRow, UserSkillRow};
use crate::models::user::Role;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CatalogParams {
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSkillRequest {
    pub name: String,
    pub category: String,
}

#[derive(Debug, Deserialize)]
pub struct UpsertUserSkillRequest {
    pub skill_id: Uuid,
    #[serde(default = "default_proficiency")]
    pub proficiency: Proficiency,
    pub years_experience: Option<f32>,
}

fn default_proficiency() -> Proficiency {
    Proficiency::Intermediate
}

fn validate_skill(req: &CreateSkillRequest) -> Result<(String, String), AppError> {
    let name = req.name.trim();
    let category = req.category.trim().to_lowercase();
    if name.is_empty() || name.chars().count() > 100 {
        return Err(AppError::Validation(
            "name must be between 1 and 100 characters".to_string(),
        ));
    }
    if category.is_empty() {
        return Err(AppError::Validation("category cannot be empty".to_string()));
    }
    Ok((name.to_string(), category))
}

fn validate_years(years: Option<f32>) -> Result<(), AppError> {
    match years {
        Some(y) if !y.is_finite() || !(0.0..=70.0).contains(&y) => Err(AppError::Validation(
            "years_experience must be between 0 and 70".to_string(),
        )),
        _ => Ok(()),
    }
}

/// GET /api/v1/skills
pub async fn handle_catalog(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(params): Query<CatalogParams>,
) -> Result<Json<Vec<SkillRow>>, AppError> {
    let skills = match params.category.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        Some(category) => {
            sqlx::query_as::<_, SkillRow>(
                "SELECT * FROM skills WHERE category = $1 ORDER BY name",
            )
            .bind(category.to_lowercase())
            .fetch_all(&state.db)
            .await?
        }
        None => {
            sqlx::query_as::<_, SkillRow>("SELECT * FROM skills ORDER BY category, name")
                .fetch_all(&state.db)
                .await?
        }
    };
    Ok(Json(skills))
}

/// POST /api/v1/skills
pub async fn handle_create(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateSkillRequest>,
) -> Result<(StatusCode, Json<SkillRow>), AppError> {
    user.require_role(&[Role::Admin, Role::Recruiter])?;
    let (name, category) = validate_skill(&req)?;

    let skill = sqlx::query_as::<_, SkillRow>(
        "INSERT INTO skills (id, name, category) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(&name)
    .bind(&category)
    .fetch_one(&state.db)
    .await
    .map_err(|e| match AppError::from(e) {
        AppError::Conflict(_) => AppError::Conflict(format!("Skill '{name}' already exists")),
        other => other,
    })?;

    Ok((StatusCode::CREATED, Json(skill)))
}

async fn load_user_skills(state: &AppState, user_id: Uuid) -> Result<Vec<UserSkillRow>, AppError> {
    Ok(sqlx::query_as::<_, UserSkillRow>(
        r#"
        SELECT us.skill_id, s.name, s.category, us.proficiency, us.years_experience
        FROM user_skills us
        JOIN skills s ON s.id = us.skill_id
        WHERE us.user_id = $1
        ORDER BY s.name
        "#,
    )
    .bind(user_id)
    .fetch_all(&state.db)
    .await?)
}

/// GET /api/v1/me/skills
pub async fn handle_my_skills(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<UserSkillRow>>, AppError> {
    Ok(Json(load_user_skills(&state, user.id).await?))
}

/// PUT /api/v1/me/skills
pub async fn handle_upsert_my_skill(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<UpsertUserSkillRequest>,
) -> Result<Json<Vec<UserSkillRow>>, AppError> {
    validate_years(req.years_experience)?;

    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM skills WHERE id = $1)")
        .bind(req.skill_id)
        .fetch_one(&state.db)
        .await?;
    if !exists {
        return Err(AppError::NotFound(format!("Skill {} not found", req.skill_id)));
    }

    sqlx::query(
        r#"
        INSERT INTO user_skills (user_id, skill_id, proficiency, years_experience)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_id, skill_id) DO UPDATE SET
            proficiency = EXCLUDED.proficiency,
            years_experience = EXCLUDED.years_experience
        "#,
    )
    .bind(user.id)
    .bind(req.skill_id)
    .bind(req.proficiency.as_str())
    .bind(req.years_experience)
    .execute(&state.db)
    .await?;

    Ok(Json(load_user_skills(&state, user.id).await?))
}

/// DELETE /api/v1/me/skills/:skill_id
pub async fn handle_remove_my_skill(
    State(state): State<AppState>,
    user: AuthUser,
    Path(skill_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let result = sqlx::query("DELETE FROM user_skills WHERE user_id = $1 AND skill_id = $2")
        .bind(user.id)
        .bind(skill_id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Skill {skill_id} is not on your profile")));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_skill_normalizes_category() {
        let (name, category) = validate_skill(&CreateSkillRequest {
            name: " Rust ".to_string(),
            category: "Programming ".to_string(),
        })
        .unwrap();
        assert_eq!(name, "Rust");
        assert_eq!(category, "programming");
    }

    #[test]
    fn test_validate_skill_rejects_blank() {
        assert!(validate_skill(&CreateSkillRequest {
            name: "  ".to_string(),
            category: "x".to_string(),
        })
        .is_err());
    }

    #[test]
    fn test_validate_years() {
        assert!(validate_years(None).is_ok());
        assert!(validate_years(Some(3.5)).is_ok());
        assert!(validate_years(Some(-1.0)).is_err());
        assert!(validate_years(Some(f32::NAN)).is_err());
    }

    #[test]
    fn test_default_proficiency() {
        let req: UpsertUserSkillRequest =
            serde_json::from_str(&format!(r#"{{"skill_id":"{}"}}"#, Uuid::nil())).unwrap();
        assert_eq!(req.proficiency, Proficiency::Intermediate);
    }
}
