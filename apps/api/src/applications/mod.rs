// Applications: one per (job seeker, job post), moved through a fixed status
// workflow by the job owner.

pub mod handlers;

use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::application::{ApplicationRow, ApplicationStatus};

pub async fn find_application(pool: &PgPool, id: Uuid) -> Result<ApplicationRow, AppError> {
    sqlx::query_as::<_, ApplicationRow>("SELECT * FROM applications WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Application {id} not found")))
}

/// The applicant, the job owner and admins may see an application.
pub fn can_view_application(user: &AuthUser, app: &ApplicationRow, job_owner: Uuid) -> bool {
    app.job_seeker_id == user.id || job_owner == user.id || user.is_admin()
}

/// Checks a recruiter-driven status change against the workflow table.
pub fn check_transition(
    current: ApplicationStatus,
    next: ApplicationStatus,
) -> Result<(), AppError> {
    if next == ApplicationStatus::Withdrawn {
        return Err(AppError::Validation(
            "Only the applicant can withdraw an application".to_string(),
        ));
    }
    if current.is_terminal() {
        return Err(AppError::Validation(format!(
            "Application is already {current} and cannot change"
        )));
    }
    if !current.can_transition_to(next) {
        return Err(AppError::Validation(format!(
            "Cannot move application from {current} to {next}"
        )));
    }
    Ok(())
}

pub fn check_withdrawal(current: ApplicationStatus) -> Result<(), AppError> {
    if current.is_terminal() {
        return Err(AppError::Validation(format!(
            "Application is already {current} and cannot be withdrawn"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::Role;
    use ApplicationStatus::*;

    #[test]
    fn test_valid_transitions_pass() {
        assert!(check_transition(Pending, Reviewing).is_ok());
        assert!(check_transition(Reviewing, Interview).is_ok());
        assert!(check_transition(Interview, Offered).is_ok());
    }

    #[test]
    fn test_invalid_transitions_are_validation_errors() {
        assert!(matches!(
            check_transition(Pending, Offered),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            check_transition(Rejected, Reviewing),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            check_transition(Reviewing, Withdrawn),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_withdrawal_only_from_open_states() {
        assert!(check_withdrawal(Pending).is_ok());
        assert!(check_withdrawal(Interview).is_ok());
        assert!(check_withdrawal(Offered).is_err());
        assert!(check_withdrawal(Withdrawn).is_err());
    }

    #[test]
    fn test_visibility() {
        let seeker = Uuid::new_v4();
        let recruiter = Uuid::new_v4();
        let app = ApplicationRow {
            id: Uuid::new_v4(),
            job_seeker_id: seeker,
            job_post_id: Uuid::new_v4(),
            resume_id: Uuid::new_v4(),
            cover_letter: None,
            status: "pending".to_string(),
            match_score: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        let as_user = |id, role| AuthUser { id, role };

        assert!(can_view_application(&as_user(seeker, Role::JobSeeker), &app, recruiter));
        assert!(can_view_application(&as_user(recruiter, Role::Recruiter), &app, recruiter));
        assert!(!can_view_application(
            &as_user(Uuid::new_v4(), Role::Recruiter),
            &app,
            recruiter
        ));
    }
}
