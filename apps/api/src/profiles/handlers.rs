use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::user::{JobSeekerProfile, RecruiterProfile, Role};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ProfileResponse {
    JobSeeker(JobSeekerProfile),
    Recruiter(RecruiterProfile),
}

/// Accepts either profile shape; fields that do not apply to the caller's
/// role are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub headline: Option<String>,
    pub location: Option<String>,
    pub years_experience: Option<i32>,
    pub desired_salary_min: Option<i32>,
    pub desired_salary_max: Option<i32>,
    pub open_to_remote: Option<bool>,
    pub company_name: Option<String>,
    pub company_website: Option<String>,
    pub position: Option<String>,
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn validate_seeker_update(req: &UpdateProfileRequest) -> Result<(), AppError> {
    if req.years_experience.map_or(false, |y| !(0..=70).contains(&y)) {
        return Err(AppError::Validation(
            "years_experience must be between 0 and 70".to_string(),
        ));
    }
    if let (Some(min), Some(max)) = (req.desired_salary_min, req.desired_salary_max) {
        if min > max {
            return Err(AppError::Validation(
                "desired_salary_min cannot exceed desired_salary_max".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_recruiter_update(req: &UpdateProfileRequest) -> Result<(), AppError> {
    if let Some(site) = req.company_website.as_deref().map(str::trim) {
        if !site.is_empty() && !(site.starts_with("http://") || site.starts_with("https://")) {
            return Err(AppError::Validation(
                "company_website must start with http:// or https://".to_string(),
            ));
        }
    }
    Ok(())
}

/// GET /api/v1/profile
pub async fn handle_get(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ProfileResponse>, AppError> {
    let profile = match user.role {
        Role::JobSeeker => ProfileResponse::JobSeeker(
            sqlx::query_as::<_, JobSeekerProfile>(
                "SELECT * FROM job_seeker_profiles WHERE user_id = $1",
            )
            .bind(user.id)
            .fetch_optional(&state.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Profile not found".to_string()))?,
        ),
        Role::Recruiter => ProfileResponse::Recruiter(
            sqlx::query_as::<_, RecruiterProfile>(
                "SELECT * FROM recruiter_profiles WHERE user_id = $1",
            )
            .bind(user.id)
            .fetch_optional(&state.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Profile not found".to_string()))?,
        ),
        Role::Admin => return Err(AppError::NotFound("Admins have no profile".to_string())),
    };
    Ok(Json(profile))
}

/// PUT /api/v1/profile
///
/// Upserts so accounts created before profiles existed still get a row.
pub async fn handle_update(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>, AppError> {
    let profile = match user.role {
        Role::JobSeeker => {
            validate_seeker_update(&req)?;
            let row = sqlx::query_as::<_, JobSeekerProfile>(
                r#"
                INSERT INTO job_seeker_profiles
                    (user_id, headline, location, years_experience,
                     desired_salary_min, desired_salary_max, open_to_remote)
                VALUES ($1, $2, $3, $4, $5, $6, COALESCE($7, TRUE))
                ON CONFLICT (user_id) DO UPDATE SET
                    headline = COALESCE(EXCLUDED.headline, job_seeker_profiles.headline),
                    location = COALESCE(EXCLUDED.location, job_seeker_profiles.location),
                    years_experience = COALESCE(EXCLUDED.years_experience, job_seeker_profiles.years_experience),
                    desired_salary_min = COALESCE(EXCLUDED.desired_salary_min, job_seeker_profiles.desired_salary_min),
                    desired_salary_max = COALESCE(EXCLUDED.desired_salary_max, job_seeker_profiles.desired_salary_max),
                    open_to_remote = COALESCE($7, job_seeker_profiles.open_to_remote),
                    updated_at = NOW()
                RETURNING *
                "#,
            )
            .bind(user.id)
            .bind(clean(req.headline))
            .bind(clean(req.location))
            .bind(req.years_experience)
            .bind(req.desired_salary_min)
            .bind(req.desired_salary_max)
            .bind(req.open_to_remote)
            .fetch_one(&state.db)
            .await?;
            ProfileResponse::JobSeeker(row)
        }
        Role::Recruiter => {
            validate_recruiter_update(&req)?;
            let row = sqlx::query_as::<_, RecruiterProfile>(
                r#"
                INSERT INTO recruiter_profiles (user_id, company_name, company_website, position)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (user_id) DO UPDATE SET
                    company_name = COALESCE(EXCLUDED.company_name, recruiter_profiles.company_name),
                    company_website = COALESCE(EXCLUDED.company_website, recruiter_profiles.company_website),
                    position = COALESCE(EXCLUDED.position, recruiter_profiles.position),
                    updated_at = NOW()
                RETURNING *
                "#,
            )
            .bind(user.id)
            .bind(clean(req.company_name))
            .bind(clean(req.company_website))
            .bind(clean(req.position))
            .fetch_one(&state.db)
            .await?;
            ProfileResponse::Recruiter(row)
        }
        Role::Admin => return Err(AppError::NotFound("Admins have no profile".to_string())),
    };

    info!("Profile updated for {}", user.id);
    Ok(Json(profile))
}
