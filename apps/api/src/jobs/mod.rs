// Job posts: recruiter-owned CRUD and public search over published posts.

pub mod handlers;

use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::job::JobPostRow;

pub async fn find_job(pool: &PgPool, job_id: Uuid) -> Result<JobPostRow, AppError> {
    sqlx::query_as::<_, JobPostRow>("SELECT * FROM job_posts WHERE id = $1")
        .bind(job_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Job post {job_id} not found")))
}

/// Published posts are visible to everyone; drafts and closed posts only to
/// their owner and admins.
pub fn can_view_job(user: &AuthUser, job: &JobPostRow) -> bool {
    job.is_published() || job.recruiter_id == user.id || user.is_admin()
}

pub async fn visible_job(pool: &PgPool, user: &AuthUser, job_id: Uuid) -> Result<JobPostRow, AppError> {
    let job = find_job(pool, job_id).await?;
    if !can_view_job(user, &job) {
        return Err(AppError::NotFound(format!("Job post {job_id} not found")));
    }
    Ok(job)
}

/// Loads a job post the caller may modify (owner or admin).
pub async fn owned_job(pool: &PgPool, user: &AuthUser, job_id: Uuid) -> Result<JobPostRow, AppError> {
    let job = visible_job(pool, user, job_id).await?;
    if job.recruiter_id != user.id && !user.is_admin() {
        return Err(AppError::Forbidden);
    }
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::features::tests::make_job;
    use crate::models::user::Role;

    #[test]
    fn test_draft_visible_only_to_owner_and_admin() {
        let mut job = make_job("Engineer", "mid", &[]);
        job.status = "draft".to_string();
        let owner = AuthUser {
            id: job.recruiter_id,
            role: Role::Recruiter,
        };
        let stranger = AuthUser {
            id: Uuid::new_v4(),
            role: Role::JobSeeker,
        };
        let admin = AuthUser {
            id: Uuid::new_v4(),
            role: Role::Admin,
        };
        assert!(can_view_job(&owner, &job));
        assert!(can_view_job(&admin, &job));
        assert!(!can_view_job(&stranger, &job));

        job.status = "published".to_string();
        assert!(can_view_job(&stranger, &job));
    }
}
