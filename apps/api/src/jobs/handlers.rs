//! Axum route handlers for job posts.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use sqlx::{Postgres, QueryBuilder};
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::jobs::{owned_job, visible_job};
use crate::models::job::{EmploymentType, ExperienceLevel, JobPostRow, JobStatus};
use crate::models::user::Role;
use crate::pagination::{Page, PageParams};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub title: String,
    pub company: Option<String>,
    pub description: String,
    #[serde(default)]
    pub requirements: String,
    pub location: Option<String>,
    #[serde(default = "default_employment_type")]
    pub employment_type: EmploymentType,
    #[serde(default = "default_experience_level")]
    pub experience_level: ExperienceLevel,
    pub salary_min: Option<i32>,
    pub salary_max: Option<i32>,
    #[serde(default)]
    pub remote: bool,
    #[serde(default)]
    pub required_skills: Vec<String>,
    #[serde(default = "default_status")]
    pub status: JobStatus,
}

fn default_employment_type() -> EmploymentType {
    EmploymentType::FullTime
}

fn default_experience_level() -> ExperienceLevel {
    ExperienceLevel::Mid
}

fn default_status() -> JobStatus {
    JobStatus::Draft
}

/// Partial update. Absent fields keep their current value.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateJobRequest {
    pub title: Option<String>,
    pub company: Option<String>,
    pub description: Option<String>,
    pub requirements: Option<String>,
    pub location: Option<String>,
    pub employment_type: Option<EmploymentType>,
    pub experience_level: Option<ExperienceLevel>,
    pub salary_min: Option<i32>,
    pub salary_max: Option<i32>,
    pub remote: Option<bool>,
    pub required_skills: Option<Vec<String>>,
    pub status: Option<JobStatus>,
}

/// The editable fields of a job post, validated before every write.
#[derive(Debug, Clone, PartialEq)]
struct JobDraft {
    title: String,
    company: String,
    description: String,
    requirements: String,
    location: Option<String>,
    employment_type: EmploymentType,
    experience_level: ExperienceLevel,
    salary_min: Option<i32>,
    salary_max: Option<i32>,
    remote: bool,
    required_skills: Vec<String>,
    status: JobStatus,
}

impl JobDraft {
    fn from_row(row: &JobPostRow) -> Result<Self, AppError> {
        let parse_err = |e: String| AppError::Internal(anyhow::anyhow!(e));
        Ok(Self {
            title: row.title.clone(),
            company: row.company.clone(),
            description: row.description.clone(),
            requirements: row.requirements.clone(),
            location: row.location.clone(),
            employment_type: row.employment_type.parse().map_err(parse_err)?,
            experience_level: row.experience_level.parse().map_err(parse_err)?,
            salary_min: row.salary_min,
            salary_max: row.salary_max,
            remote: row.remote,
            required_skills: row.required_skills.clone(),
            status: row.status.parse().map_err(parse_err)?,
        })
    }

    fn apply(mut self, req: UpdateJobRequest) -> Self {
        if let Some(v) = req.title {
            self.title = v;
        }
        if let Some(v) = req.company {
            self.company = v;
        }
        if let Some(v) = req.description {
            self.description = v;
        }
        if let Some(v) = req.requirements {
            self.requirements = v;
        }
        if req.location.is_some() {
            self.location = req.location;
        }
        if let Some(v) = req.employment_type {
            self.employment_type = v;
        }
        if let Some(v) = req.experience_level {
            self.experience_level = v;
        }
        if req.salary_min.is_some() {
            self.salary_min = req.salary_min;
        }
        if req.salary_max.is_some() {
            self.salary_max = req.salary_max;
        }
        if let Some(v) = req.remote {
            self.remote = v;
        }
        if let Some(v) = req.required_skills {
            self.required_skills = v;
        }
        if let Some(v) = req.status {
            self.status = v;
        }
        self
    }

    /// Trims text fields, dedups skills and checks the invariants.
    fn validate(mut self) -> Result<Self, AppError> {
        self.title = self.title.trim().to_string();
        self.company = self.company.trim().to_string();
        self.description = self.description.trim().to_string();
        self.location = self
            .location
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());

        if self.title.is_empty() {
            return Err(AppError::Validation("title cannot be empty".to_string()));
        }
        if self.description.is_empty() {
            return Err(AppError::Validation("description cannot be empty".to_string()));
        }
        if self.company.is_empty() {
            return Err(AppError::Validation(
                "company is required (set it here or on your recruiter profile)".to_string(),
            ));
        }
        if let (Some(min), Some(max)) = (self.salary_min, self.salary_max) {
            if min > max {
                return Err(AppError::Validation(
                    "salary_min cannot exceed salary_max".to_string(),
                ));
            }
        }
        if self.salary_min.map_or(false, |s| s < 0) || self.salary_max.map_or(false, |s| s < 0) {
            return Err(AppError::Validation("salaries cannot be negative".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        self.required_skills = self
            .required_skills
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && seen.insert(s.to_lowercase()))
            .collect();

        Ok(self)
    }
}

/// POST /api/v1/jobs
pub async fn handle_create(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<JobPostRow>), AppError> {
    user.require_role(&[Role::Recruiter, Role::Admin])?;

    let company = match req.company.filter(|c| !c.trim().is_empty()) {
        Some(company) => company,
        None => sqlx::query_scalar::<_, Option<String>>(
            "SELECT company_name FROM recruiter_profiles WHERE user_id = $1",
        )
        .bind(user.id)
        .fetch_optional(&state.db)
        .await?
        .flatten()
        .unwrap_or_default(),
    };

    let draft = JobDraft {
        title: req.title,
        company,
        description: req.description,
        requirements: req.requirements,
        location: req.location,
        employment_type: req.employment_type,
        experience_level: req.experience_level,
        salary_min: req.salary_min,
        salary_max: req.salary_max,
        remote: req.remote,
        required_skills: req.required_skills,
        status: req.status,
    }
    .validate()?;

    let job = sqlx::query_as::<_, JobPostRow>(
        r#"
        INSERT INTO job_posts
            (id, recruiter_id, title, company, description, requirements, location,
             employment_type, experience_level, salary_min, salary_max, remote,
             required_skills, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user.id)
    .bind(&draft.title)
    .bind(&draft.company)
    .bind(&draft.description)
    .bind(&draft.requirements)
    .bind(&draft.location)
    .bind(draft.employment_type.as_str())
    .bind(draft.experience_level.as_str())
    .bind(draft.salary_min)
    .bind(draft.salary_max)
    .bind(draft.remote)
    .bind(&draft.required_skills)
    .bind(draft.status.as_str())
    .fetch_one(&state.db)
    .await?;

    info!("Job post {} created by {} ({})", job.id, user.id, job.status);
    Ok((StatusCode::CREATED, Json(job)))
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub location: Option<String>,
    pub remote: Option<bool>,
    pub employment_type: Option<EmploymentType>,
    pub experience_level: Option<ExperienceLevel>,
    pub skill: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Escapes LIKE wildcards so user input matches literally.
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn push_search_filters(qb: &mut QueryBuilder<'_, Postgres>, params: &SearchParams) {
    qb.push(" WHERE status = ").push_bind(JobStatus::Published.as_str());

    if let Some(q) = params.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = like_pattern(q);
        qb.push(" AND (title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR description ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR company ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(location) = params
        .location
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
    {
        qb.push(" AND location ILIKE ").push_bind(like_pattern(location));
    }
    if let Some(remote) = params.remote {
        qb.push(" AND remote = ").push_bind(remote);
    }
    if let Some(kind) = params.employment_type {
        qb.push(" AND employment_type = ").push_bind(kind.as_str());
    }
    if let Some(level) = params.experience_level {
        qb.push(" AND experience_level = ").push_bind(level.as_str());
    }
    if let Some(skill) = params.skill.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND EXISTS (SELECT 1 FROM unnest(required_skills) s WHERE lower(s) = lower(")
            .push_bind(skill.to_string())
            .push("))");
    }
}

/// GET /api/v1/jobs
pub async fn handle_search(
    State(state): State<AppState>,
    _user: AuthUser,
    Query(params): Query<SearchParams>,
) -> Result<Json<Page<JobPostRow>>, AppError> {
    let page = PageParams {
        page: params.page,
        per_page: params.per_page,
    };

    let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM job_posts");
    push_search_filters(&mut query, &params);
    query
        .push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(page.per_page())
        .push(" OFFSET ")
        .push_bind(page.offset());
    let items = query
        .build_query_as::<JobPostRow>()
        .fetch_all(&state.db)
        .await?;

    let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM job_posts");
    push_search_filters(&mut count, &params);
    let total: i64 = count.build_query_scalar().fetch_one(&state.db).await?;

    Ok(Json(Page::new(items, total, page)))
}

/// GET /api/v1/jobs/mine
pub async fn handle_mine(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<JobPostRow>>, AppError> {
    user.require_role(&[Role::Recruiter, Role::Admin])?;
    let jobs = sqlx::query_as::<_, JobPostRow>(
        "SELECT * FROM job_posts WHERE recruiter_id = $1 ORDER BY created_at DESC",
    )
    .bind(user.id)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(jobs))
}

/// GET /api/v1/jobs/:id
pub async fn handle_get(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<JobPostRow>, AppError> {
    Ok(Json(visible_job(&state.db, &user, id).await?))
}

/// PUT /api/v1/jobs/:id
pub async fn handle_update(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateJobRequest>,
) -> Result<Json<JobPostRow>, AppError> {
    let current = owned_job(&state.db, &user, id).await?;
    let draft = JobDraft::from_row(&current)?.apply(req).validate()?;

    let job = sqlx::query_as::<_, JobPostRow>(
        r#"
        UPDATE job_posts SET
            title = $2, company = $3, description = $4, requirements = $5, location = $6,
            employment_type = $7, experience_level = $8, salary_min = $9, salary_max = $10,
            remote = $11, required_skills = $12, status = $13, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&draft.title)
    .bind(&draft.company)
    .bind(&draft.description)
    .bind(&draft.requirements)
    .bind(&draft.location)
    .bind(draft.employment_type.as_str())
    .bind(draft.experience_level.as_str())
    .bind(draft.salary_min)
    .bind(draft.salary_max)
    .bind(draft.remote)
    .bind(&draft.required_skills)
    .bind(draft.status.as_str())
    .fetch_one(&state.db)
    .await?;

    info!("Job post {id} updated by {}", user.id);
    Ok(Json(job))
}

/// DELETE /api/v1/jobs/:id
pub async fn handle_delete(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    owned_job(&state.db, &user, id).await?;
    sqlx::query("DELETE FROM job_posts WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;
    info!("Job post {id} deleted by {}", user.id);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::features::tests::make_job;

    fn draft() -> JobDraft {
        JobDraft::from_row(&make_job("Backend Engineer", "senior", &["Rust"])).unwrap()
    }

    #[test]
    fn test_validate_trims_and_dedups_skills() {
        let mut d = draft();
        d.title = "  Backend Engineer  ".to_string();
        d.required_skills = vec!["Rust".into(), " rust ".into(), "".into(), "SQL".into()];
        let d = d.validate().unwrap();
        assert_eq!(d.title, "Backend Engineer");
        assert_eq!(d.required_skills, vec!["Rust", "SQL"]);
    }

    #[test]
    fn test_validate_rejects_inverted_salary_range() {
        let mut d = draft();
        d.salary_min = Some(150_000);
        d.salary_max = Some(90_000);
        assert!(matches!(d.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_blank_title_and_description() {
        let mut d = draft();
        d.title = "   ".to_string();
        assert!(d.validate().is_err());

        let mut d = draft();
        d.description = String::new();
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_partial_update_keeps_other_fields() {
        let before = draft();
        let after = before.clone().apply(UpdateJobRequest {
            status: Some(JobStatus::Closed),
            ..Default::default()
        });
        assert_eq!(after.status, JobStatus::Closed);
        assert_eq!(after.title, before.title);
        assert_eq!(after.required_skills, before.required_skills);
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("rust"), "%rust%");
        assert_eq!(like_pattern("100%_done"), "%100\\%\\_done%");
    }

    #[test]
    fn test_search_sql_only_includes_given_filters() {
        let params = SearchParams {
            q: Some("rust".to_string()),
            remote: Some(true),
            ..Default::default()
        };
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM job_posts");
        push_search_filters(&mut qb, &params);
        let sql = qb.sql();
        assert!(sql.contains("status = $1"));
        assert!(sql.contains("title ILIKE $2"));
        assert!(sql.contains("remote = $5"));
        assert!(!sql.contains("experience_level"));
        assert!(!sql.contains("location"));
    }
}
