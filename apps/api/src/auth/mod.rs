//! Authentication: password hashing, JWT bearer tokens and the `AuthUser` extractor.

pub mod handlers;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::user::Role;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub iat: usize,
    pub exp: usize,
}

/// Signing material for access tokens.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expiry: Duration,
}

impl JwtKeys {
    pub fn new(secret: &str, expiry_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            expiry: Duration::hours(expiry_hours),
        }
    }

    pub fn issue(&self, user_id: Uuid, role: Role) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id,
            role,
            iat: now.timestamp() as usize,
            exp: (now + self.expiry).timestamp() as usize,
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to sign token: {e}")))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AppError> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!("Rejected token: {e}");
                AppError::Unauthorized("Invalid or expired token".to_string())
            })
    }
}

// Argon2 takes tens of milliseconds per call, so both run on the blocking pool.

pub async fn hash_password(password: &str) -> Result<String, AppError> {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || password_auth::generate_hash(password))
        .await
        .map_err(|e| AppError::Internal(e.into()))
}

pub async fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let (password, hash) = (password.to_owned(), hash.to_owned());
    tokio::task::spawn_blocking(move || password_auth::verify_password(password, &hash).is_ok())
        .await
        .map_err(|e| AppError::Internal(e.into()))
}

/// The authenticated caller, resolved from `Authorization: Bearer <token>`.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
}

impl AuthUser {
    pub fn require_role(&self, allowed: &[Role]) -> Result<(), AppError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Extracts the token from an `Authorization` header value.
fn bearer_token(header: &str) -> Option<&str> {
    let mut parts = header.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => Some(token),
        _ => None,
    }
}

/// Verifies a token and confirms the user still exists and is active.
pub async fn authenticate_token(state: &AppState, token: &str) -> Result<AuthUser, AppError> {
    let claims = state.jwt.verify(token)?;

    let active: Option<bool> = sqlx::query_scalar("SELECT is_active FROM users WHERE id = $1")
        .bind(claims.sub)
        .fetch_optional(&state.db)
        .await?;

    match active {
        Some(true) => Ok(AuthUser {
            id: claims.sub,
            role: claims.role,
        }),
        Some(false) => Err(AppError::Unauthorized("Account is disabled".to_string())),
        None => Err(AppError::Unauthorized("User not found".to_string())),
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| AppError::Unauthorized("Authorization header not found".to_string()))?
            .to_str()
            .map_err(|_| AppError::Unauthorized("Authorization header is not valid text".to_string()))?;

        let token = bearer_token(header)
            .ok_or_else(|| AppError::Unauthorized("Invalid Authorization header".to_string()))?;

        authenticate_token(state, token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip() {
        let keys = JwtKeys::new("test-secret", 1);
        let user_id = Uuid::new_v4();
        let token = keys.issue(user_id, Role::Recruiter).unwrap();

        let claims = keys.verify(&token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.role, Role::Recruiter);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_token_signed_with_other_secret_is_rejected() {
        let token = JwtKeys::new("secret-a", 1)
            .issue(Uuid::new_v4(), Role::JobSeeker)
            .unwrap();
        let err = JwtKeys::new("secret-b", 1).verify(&token).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        // Past the default 60s leeway.
        let keys = JwtKeys::new("test-secret", -1);
        let token = keys.issue(Uuid::new_v4(), Role::JobSeeker).unwrap();
        assert!(keys.verify(&token).is_err());
    }

    #[tokio::test]
    async fn test_password_hash_verifies() {
        let hash = hash_password("correct horse battery staple").await.unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse battery staple", &hash).await.unwrap());
        assert!(!verify_password("wrong password", &hash).await.unwrap());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_hashing_leaves_runtime_responsive() {
        // On a single-threaded runtime a ticker only advances while the
        // hash is off the runtime thread.
        let ticks = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = ticks.clone();
        let ticker = tokio::spawn(async move {
            loop {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                tokio::task::yield_now().await;
            }
        });

        hash_password("correct horse battery staple").await.unwrap();
        ticker.abort();
        assert!(ticks.load(std::sync::atomic::Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_verify_rejects_malformed_hash() {
        assert!(!verify_password("anything", "not-a-phc-string").await.unwrap());
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer"), None);
        assert_eq!(bearer_token("Bearer a b"), None);
    }

    #[test]
    fn test_require_role() {
        let user = AuthUser {
            id: Uuid::new_v4(),
            role: Role::JobSeeker,
        };
        assert!(user.require_role(&[Role::JobSeeker]).is_ok());
        assert!(matches!(
            user.require_role(&[Role::Recruiter]),
            Err(AppError::Forbidden)
        ));
    }
}
