//! Production task handler: routes each task to the service that runs it.

use async_trait::async_trait;
use tracing::{error, info};

use crate::analysis;
use crate::matching::service::score_application;
use crate::notifications::service as notifications;
use crate::resumes::service::{failure_reason, mark_parse_failed, process_resume};
use crate::state::AppState;
use crate::tasks::worker::TaskHandler;
use crate::tasks::{Task, TaskError};

pub struct AppTaskHandler {
    state: AppState,
}

impl AppTaskHandler {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl TaskHandler for AppTaskHandler {
    async fn handle(&self, task: &Task) -> Result<(), TaskError> {
        let state = &self.state;
        match task {
            Task::ParseResume { resume_id } => process_resume(state, *resume_id).await,
            Task::CalculateMatchScore { application_id } => {
                score_application(state, *application_id).await
            }
            Task::SendNotification {
                recipient_id,
                notification_type,
                variables,
                data,
            } => {
                notifications::notify(
                    state,
                    *recipient_id,
                    *notification_type,
                    variables,
                    data.clone(),
                )
                .await?;
                Ok(())
            }
            Task::SendEmail { to, subject, body } => {
                // No mail transport is configured; the rendered message is logged.
                info!(
                    to = %to,
                    subject = %subject,
                    "Email delivered to log transport ({} chars)",
                    body.chars().count()
                );
                Ok(())
            }
            Task::CleanupExpiredNotifications => {
                let removed = notifications::cleanup_expired(&state.db).await?;
                info!("Removed {removed} expired notification(s)");
                Ok(())
            }
            Task::CleanupExpiredAnalyses => {
                let removed = analysis::cleanup_expired(&state.db).await?;
                info!("Removed {removed} expired analysis result(s)");
                Ok(())
            }
            Task::WarmMatchModel => {
                match state.match_engine.reload() {
                    Ok(version) => info!("Match model warm: {version}"),
                    // Keep serving with whatever scorer is active.
                    Err(e) => info!("Match model not reloaded: {e}"),
                }
                Ok(())
            }
        }
    }

    async fn on_failure(&self, task: &Task, err: &TaskError) {
        if let Task::ParseResume { resume_id } = task {
            if let Err(e) = mark_parse_failed(&self.state, *resume_id, &failure_reason(err)).await {
                error!("Could not mark resume {resume_id} as failed: {e}");
            }
        }
    }
}
