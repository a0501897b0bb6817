//! Axum route handlers for registration and login.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::auth::{hash_password, verify_password, AuthUser};
use crate::errors::AppError;
use crate::models::user::{Role, User};
use crate::state::AppState;

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_registration(req: &RegisterRequest) -> Result<(), AppError> {
    let email = normalize_email(&req.email);
    let valid_email = email
        .split_once('@')
        .map(|(local, domain)| !local.is_empty() && domain.contains('.'))
        .unwrap_or(false);
    if !valid_email {
        return Err(AppError::Validation("A valid email is required".to_string()));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if req.full_name.trim().is_empty() {
        return Err(AppError::Validation("full_name cannot be empty".to_string()));
    }
    if req.role == Role::Admin {
        return Err(AppError::Validation(
            "role must be job_seeker or recruiter".to_string(),
        ));
    }
    Ok(())
}

/// POST /api/v1/auth/register
pub async fn handle_register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    validate_registration(&req)?;

    let email = normalize_email(&req.email);
    let password_hash = hash_password(&req.password).await?;

    let mut tx = state.db.begin().await?;

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (id, email, password_hash, role, full_name)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&email)
    .bind(&password_hash)
    .bind(req.role.as_str())
    .bind(req.full_name.trim())
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match AppError::from(e) {
        AppError::Conflict(_) => AppError::Conflict(format!("Email {email} is already registered")),
        other => other,
    })?;

    let profile_sql = match req.role {
        Role::JobSeeker => "INSERT INTO job_seeker_profiles (user_id) VALUES ($1)",
        _ => "INSERT INTO recruiter_profiles (user_id) VALUES ($1)",
    };
    sqlx::query(profile_sql).bind(user.id).execute(&mut *tx).await?;

    tx.commit().await?;

    info!("Registered user {} as {}", user.id, req.role);

    let token = state.jwt.issue(user.id, req.role)?;
    Ok((StatusCode::CREATED, Json(AuthResponse { user, token })))
}

/// POST /api/v1/auth/login
pub async fn handle_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let email = normalize_email(&req.email);

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;

    // Same message for unknown email and bad password.
    let invalid = || AppError::Unauthorized("Invalid email or password".to_string());

    let user = user.ok_or_else(invalid)?;
    if !verify_password(&req.password, &user.password_hash).await? {
        return Err(invalid());
    }
    if !user.is_active {
        return Err(AppError::Unauthorized("Account is disabled".to_string()));
    }

    let role = user
        .role()
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("User {} has unknown role", user.id)))?;
    let token = state.jwt.issue(user.id, role)?;

    info!("User {} logged in", user.id);
    Ok(Json(AuthResponse { user, token }))
}

/// GET /api/v1/auth/me
pub async fn handle_me(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<User>, AppError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(auth.id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    Ok(Json(user))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(email: &str, password: &str, role: Role) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
            full_name: "Grace Hopper".to_string(),
            role,
        }
    }

    #[test]
    fn test_valid_registration_passes() {
        assert!(validate_registration(&request("grace@navy.mil", "cobol1959", Role::JobSeeker)).is_ok());
    }

    #[test]
    fn test_short_password_rejected() {
        let err = validate_registration(&request("grace@navy.mil", "short", Role::JobSeeker));
        assert!(matches!(err, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_bad_email_rejected() {
        assert!(validate_registration(&request("not-an-email", "longenough", Role::Recruiter)).is_err());
        assert!(validate_registration(&request("@example.com", "longenough", Role::Recruiter)).is_err());
    }

    #[test]
    fn test_admin_cannot_self_register() {
        assert!(validate_registration(&request("root@example.com", "longenough", Role::Admin)).is_err());
    }

    #[test]
    fn test_email_is_normalized() {
        assert_eq!(normalize_email("  Grace@Navy.MIL "), "grace@navy.mil");
    }
}
