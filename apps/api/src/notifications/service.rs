//! Notification persistence and dispatch.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::notification::{Channel, NotificationRow, NotificationType};
use crate::notifications::bus::{self, NotificationEvent};
use crate::notifications::templates::{resolve_template, Template};
use crate::pagination::PageParams;
use crate::state::AppState;
use crate::tasks::Task;

/// Renders the in-app template, stores the notification, pushes it to live
/// sockets and queues an email when an email template exists for `kind`.
pub async fn notify(
    state: &AppState,
    recipient_id: Uuid,
    kind: NotificationType,
    vars: &HashMap<String, String>,
    data: Value,
) -> Result<NotificationRow, AppError> {
    let template = resolve_template(&state.db, kind, Channel::InApp)
        .await?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("No in-app template for {kind}")))?;
    let rendered = template.render(vars);
    let expires_at = expiry(Utc::now(), state.config.notification_retention_days);

    let row = sqlx::query_as::<_, NotificationRow>(
        "INSERT INTO notifications \
         (id, recipient_id, notification_type, channel, title, message, data, expires_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(recipient_id)
    .bind(kind.as_str())
    .bind(Channel::InApp.as_str())
    .bind(&rendered.subject)
    .bind(&rendered.body)
    .bind(if data.is_null() { serde_json::json!({}) } else { data })
    .bind(expires_at)
    .fetch_one(&state.db)
    .await?;

    info!("Notification {} ({kind}) created for {recipient_id}", row.id);

    let event = NotificationEvent {
        recipient_id,
        notification: row.clone(),
    };
    if let Err(e) = state.bus.publish(&event).await {
        // Without the channel only sockets on this process can be reached.
        warn!("Could not publish notification {}: {e}", row.id);
        bus::deliver(&state.connections, event).await;
    }

    // The row is stored and pushed; a failure past this point must not
    // surface as an error, or a retried task would notify twice.
    if let Err(e) = queue_email(state, recipient_id, kind, vars).await {
        warn!("Could not queue email for notification {}: {e}", row.id);
    }

    Ok(row)
}

/// Dispatches `SendEmail` when `kind` has an email template and the recipient
/// has an address. Returns whether a task was queued.
async fn queue_email(
    state: &AppState,
    recipient_id: Uuid,
    kind: NotificationType,
    vars: &HashMap<String, String>,
) -> Result<bool, AppError> {
    let Some(template) = resolve_template(&state.db, kind, Channel::Email).await? else {
        return Ok(false);
    };
    let email: Option<String> = sqlx::query_scalar("SELECT email FROM users WHERE id = $1")
        .bind(recipient_id)
        .fetch_optional(&state.db)
        .await?;
    let Some(task) = email_task(&template, email, vars) else {
        return Ok(false);
    };
    state.tasks.dispatch(task).await?;
    Ok(true)
}

fn email_task(template: &Template, to: Option<String>, vars: &HashMap<String, String>) -> Option<Task> {
    let to = to.filter(|address| !address.trim().is_empty())?;
    let message = template.render(vars);
    Some(Task::SendEmail {
        to,
        subject: message.subject,
        body: message.body,
    })
}

/// Queues a notification for the worker pool instead of sending it inline.
pub async fn notify_later(
    state: &AppState,
    recipient_id: Uuid,
    kind: NotificationType,
    variables: HashMap<String, String>,
    data: Value,
) {
    let task = Task::SendNotification {
        recipient_id,
        notification_type: kind,
        variables,
        data,
    };
    if let Err(e) = state.tasks.dispatch(task).await {
        warn!("Could not queue {kind} notification for {recipient_id}: {e}");
    }
}

pub fn expiry(now: DateTime<Utc>, retention_days: i64) -> Option<DateTime<Utc>> {
    (retention_days > 0).then(|| now + Duration::days(retention_days))
}

const LIVE: &str = "(expires_at IS NULL OR expires_at > NOW())";

pub async fn list(
    pool: &PgPool,
    recipient_id: Uuid,
    unread_only: bool,
    page: PageParams,
) -> Result<(Vec<NotificationRow>, i64), sqlx::Error> {
    let unread_filter = if unread_only { "AND is_read = FALSE" } else { "" };

    let items = sqlx::query_as::<_, NotificationRow>(&format!(
        "SELECT * FROM notifications \
         WHERE recipient_id = $1 AND {LIVE} {unread_filter} \
         ORDER BY created_at DESC LIMIT $2 OFFSET $3"
    ))
    .bind(recipient_id)
    .bind(page.per_page())
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM notifications WHERE recipient_id = $1 AND {LIVE} {unread_filter}"
    ))
    .bind(recipient_id)
    .fetch_one(pool)
    .await?;

    Ok((items, total))
}

pub async fn unread_count(pool: &PgPool, recipient_id: Uuid) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM notifications \
         WHERE recipient_id = $1 AND is_read = FALSE AND {LIVE}"
    ))
    .bind(recipient_id)
    .fetch_one(pool)
    .await
}

pub async fn latest_unread(
    pool: &PgPool,
    recipient_id: Uuid,
    limit: i64,
) -> Result<Vec<NotificationRow>, sqlx::Error> {
    sqlx::query_as::<_, NotificationRow>(&format!(
        "SELECT * FROM notifications \
         WHERE recipient_id = $1 AND is_read = FALSE AND {LIVE} \
         ORDER BY created_at DESC LIMIT $2"
    ))
    .bind(recipient_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Marks one notification read. Already-read notifications keep their
/// original `read_at`.
pub async fn mark_read(
    pool: &PgPool,
    recipient_id: Uuid,
    notification_id: Uuid,
) -> Result<NotificationRow, AppError> {
    sqlx::query_as::<_, NotificationRow>(
        "UPDATE notifications \
         SET is_read = TRUE, read_at = COALESCE(read_at, NOW()) \
         WHERE id = $1 AND recipient_id = $2 \
         RETURNING *",
    )
    .bind(notification_id)
    .bind(recipient_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Notification {notification_id} not found")))
}

pub async fn mark_all_read(pool: &PgPool, recipient_id: Uuid) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE notifications SET is_read = TRUE, read_at = NOW() \
         WHERE recipient_id = $1 AND is_read = FALSE",
    )
    .bind(recipient_id)
    .execute(pool)
    .await?;
    debug!(
        "Marked {} notification(s) read for {recipient_id}",
        result.rows_affected()
    );
    Ok(result.rows_affected())
}

pub async fn delete(
    pool: &PgPool,
    recipient_id: Uuid,
    notification_id: Uuid,
) -> Result<(), AppError> {
    let result = sqlx::query("DELETE FROM notifications WHERE id = $1 AND recipient_id = $2")
        .bind(notification_id)
        .bind(recipient_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Notification {notification_id} not found"
        )));
    }
    Ok(())
}

pub async fn cleanup_expired(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result =
        sqlx::query("DELETE FROM notifications WHERE expires_at IS NOT NULL AND expires_at <= NOW()")
            .execute(pool)
            .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_adds_retention() {
        let now = Utc::now();
        assert_eq!(expiry(now, 30), Some(now + Duration::days(30)));
    }

    #[test]
    fn test_zero_retention_never_expires() {
        assert_eq!(expiry(Utc::now(), 0), None);
    }

    fn template() -> Template {
        Template {
            subject: "New application for {job_title}".to_string(),
            body: "{applicant_name} applied.".to_string(),
        }
    }

    #[test]
    fn test_email_task_renders_template() {
        let vars = HashMap::from([
            ("job_title".to_string(), "Rust Engineer".to_string()),
            ("applicant_name".to_string(), "Ada".to_string()),
        ]);
        match email_task(&template(), Some("r@example.com".to_string()), &vars) {
            Some(Task::SendEmail { to, subject, body }) => {
                assert_eq!(to, "r@example.com");
                assert_eq!(subject, "New application for Rust Engineer");
                assert_eq!(body, "Ada applied.");
            }
            other => panic!("expected SendEmail, got {other:?}"),
        }
    }

    #[test]
    fn test_email_task_skipped_without_address() {
        assert!(email_task(&template(), None, &HashMap::new()).is_none());
        assert!(email_task(&template(), Some("  ".to_string()), &HashMap::new()).is_none());
    }
}
