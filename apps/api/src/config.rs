use std::str::FromStr;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Startup fails if a required variable is missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    pub match_model_path: String,
    pub port: u16,
    pub rust_log: String,
    /// Prefix for worker consumer names. Must be unique per process.
    pub worker_name: String,
    /// Number of in-process task workers. 0 disables them (API-only node).
    pub worker_concurrency: usize,
    pub task_max_retries: u32,
    pub notification_retention_days: i64,
    pub analysis_cache_ttl_hours: i64,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: require_env("REDIS_URL")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            gemini_api_key: require_env("GEMINI_API_KEY")?,
            gemini_model: optional_env("GEMINI_MODEL", "gemini-1.5-flash".to_string())?,
            jwt_secret: require_env("JWT_SECRET")?,
            jwt_expiry_hours: optional_env("JWT_EXPIRY_HOURS", 24)?,
            match_model_path: optional_env(
                "MATCH_MODEL_PATH",
                "models/match_model.json".to_string(),
            )?,
            port: optional_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            worker_name: optional_env("WORKER_NAME", "worker".to_string())?,
            worker_concurrency: optional_env("WORKER_CONCURRENCY", 2)?,
            task_max_retries: optional_env("TASK_MAX_RETRIES", 3)?,
            notification_retention_days: optional_env("NOTIFICATION_RETENTION_DAYS", 30)?,
            analysis_cache_ttl_hours: optional_env("ANALYSIS_CACHE_TTL_HOURS", 168)?,
            max_upload_bytes: optional_env("MAX_UPLOAD_BYTES", 10 * 1024 * 1024)?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

/// Reads and parses an optional variable, falling back to `default` when unset.
fn optional_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("Environment variable '{key}' has an invalid value: {raw}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_trims_whitespace() {
        let port: u16 = parse_value("PORT", " 9000 ").unwrap();
        assert_eq!(port, 9000);
    }

    #[test]
    fn test_parse_value_reports_key_on_error() {
        let err = parse_value::<u16>("PORT", "not-a-port").unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn test_optional_env_uses_default_when_unset() {
        let value: usize = optional_env("HIREWISE_TEST_SURELY_UNSET_VAR", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_require_env_names_missing_variable() {
        let err = require_env("HIREWISE_TEST_SURELY_UNSET_VAR").unwrap_err();
        assert!(err.to_string().contains("HIREWISE_TEST_SURELY_UNSET_VAR"));
    }
}
