//! Background task layer.
//!
//! Tasks are JSON envelopes routed to named queues. Workers reserve one task at
//! a time, acknowledge it only after the handler finishes, and retry transient
//! failures with an exponential countdown. A scheduler enqueues periodic
//! maintenance tasks.

pub mod broker;
pub mod handlers;
pub mod scheduler;
pub mod worker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::notification::NotificationType;
use crate::tasks::broker::{BrokerError, TaskBroker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Queue {
    ResumeProcessing,
    AiAnalysis,
    Notifications,
    Maintenance,
}

impl Queue {
    pub const ALL: [Queue; 4] = [
        Queue::ResumeProcessing,
        Queue::AiAnalysis,
        Queue::Notifications,
        Queue::Maintenance,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Queue::ResumeProcessing => "resume_processing",
            Queue::AiAnalysis => "ai_analysis",
            Queue::Notifications => "notifications",
            Queue::Maintenance => "maintenance",
        }
    }
}

/// Every task the workers know how to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "args", rename_all = "snake_case")]
pub enum Task {
    ParseResume {
        resume_id: Uuid,
    },
    CalculateMatchScore {
        application_id: Uuid,
    },
    SendNotification {
        recipient_id: Uuid,
        notification_type: NotificationType,
        #[serde(default)]
        variables: HashMap<String, String>,
        #[serde(default)]
        data: serde_json::Value,
    },
    SendEmail {
        to: String,
        subject: String,
        body: String,
    },
    CleanupExpiredNotifications,
    CleanupExpiredAnalyses,
    WarmMatchModel,
}

/// Soft limit logs a warning; hard limit aborts the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeLimits {
    pub soft: Duration,
    pub hard: Duration,
}

impl TimeLimits {
    const fn secs(soft: u64, hard: u64) -> Self {
        Self {
            soft: Duration::from_secs(soft),
            hard: Duration::from_secs(hard),
        }
    }
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::ParseResume { .. } => "parse_resume",
            Task::CalculateMatchScore { .. } => "calculate_match_score",
            Task::SendNotification { .. } => "send_notification",
            Task::SendEmail { .. } => "send_email",
            Task::CleanupExpiredNotifications => "cleanup_expired_notifications",
            Task::CleanupExpiredAnalyses => "cleanup_expired_analyses",
            Task::WarmMatchModel => "warm_match_model",
        }
    }

    /// Fixed routing of tasks to queues.
    pub fn queue(&self) -> Queue {
        match self {
            Task::ParseResume { .. } => Queue::ResumeProcessing,
            Task::CalculateMatchScore { .. } | Task::WarmMatchModel => Queue::AiAnalysis,
            Task::SendNotification { .. } | Task::SendEmail { .. } => Queue::Notifications,
            Task::CleanupExpiredNotifications | Task::CleanupExpiredAnalyses => Queue::Maintenance,
        }
    }

    pub fn limits(&self) -> TimeLimits {
        match self.queue() {
            Queue::ResumeProcessing => TimeLimits::secs(240, 300),
            Queue::AiAnalysis => TimeLimits::secs(50, 60),
            Queue::Notifications => TimeLimits::secs(25, 30),
            Queue::Maintenance => TimeLimits::secs(540, 600),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub id: Uuid,
    pub task: Task,
    pub attempt: u32,
    pub max_retries: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl TaskEnvelope {
    pub fn new(task: Task, max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            task,
            attempt: 0,
            max_retries,
            enqueued_at: Utc::now(),
        }
    }

    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_retries
    }

    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            enqueued_at: Utc::now(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    /// Worth retrying: the dependency may recover (network, database, rate limit).
    #[error("retryable: {0}")]
    Retryable(String),

    /// Retrying will not help (missing row, bad input).
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("hard time limit of {0:?} exceeded")]
    TimeLimitExceeded(Duration),
}

impl TaskError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Retryable(_) | TaskError::TimeLimitExceeded(_))
    }
}

impl From<AppError> for TaskError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(_)
            | AppError::Validation(_)
            | AppError::Conflict(_)
            | AppError::PayloadTooLarge(_)
            | AppError::Unauthorized(_)
            | AppError::Forbidden => TaskError::Fatal(err.to_string()),
            _ => TaskError::Retryable(err.to_string()),
        }
    }
}

impl From<sqlx::Error> for TaskError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => TaskError::Fatal(err.to_string()),
            other => TaskError::Retryable(other.to_string()),
        }
    }
}

/// Retry countdown: `base · 2^attempt`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(10),
            max: Duration::from_secs(600),
        }
    }
}

impl RetryPolicy {
    pub fn countdown(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Dispatch handle held in `AppState`. Cloning is cheap.
#[derive(Clone)]
pub struct TaskQueue {
    broker: Arc<dyn TaskBroker>,
    max_retries: u32,
}

impl TaskQueue {
    pub fn new(broker: Arc<dyn TaskBroker>, max_retries: u32) -> Self {
        Self {
            broker,
            max_retries,
        }
    }

    pub fn broker(&self) -> Arc<dyn TaskBroker> {
        self.broker.clone()
    }

    /// Enqueues a task on its routed queue and returns the envelope id.
    pub async fn dispatch(&self, task: Task) -> Result<Uuid, BrokerError> {
        let queue = task.queue();
        let envelope = TaskEnvelope::new(task, self.max_retries);
        self.broker.enqueue(queue, &envelope).await?;
        debug!(
            "Dispatched {} ({}) to {}",
            envelope.task.name(),
            envelope.id,
            queue.name()
        );
        Ok(envelope.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_routing_by_queue() {
        assert_eq!(
            Task::ParseResume { resume_id: Uuid::nil() }.queue(),
            Queue::ResumeProcessing
        );
        assert_eq!(
            Task::CalculateMatchScore { application_id: Uuid::nil() }.queue(),
            Queue::AiAnalysis
        );
        assert_eq!(
            Task::SendEmail {
                to: "a@b.c".into(),
                subject: "s".into(),
                body: "b".into()
            }
            .queue(),
            Queue::Notifications
        );
        assert_eq!(Task::CleanupExpiredNotifications.queue(), Queue::Maintenance);
    }

    #[test]
    fn test_soft_limit_below_hard_limit() {
        let tasks = [
            Task::ParseResume { resume_id: Uuid::nil() },
            Task::WarmMatchModel,
            Task::CleanupExpiredAnalyses,
        ];
        for task in tasks {
            let limits = task.limits();
            assert!(limits.soft < limits.hard, "{}", task.name());
        }
    }

    #[test]
    fn test_task_wire_format() {
        let task = Task::ParseResume {
            resume_id: Uuid::nil(),
        };
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["name"], "parse_resume");
        assert_eq!(value["args"]["resume_id"], Uuid::nil().to_string());

        let unit = serde_json::to_value(Task::WarmMatchModel).unwrap();
        assert_eq!(unit, json!({"name": "warm_match_model"}));
    }

    #[test]
    fn test_notification_task_defaults() {
        let raw = json!({
            "name": "send_notification",
            "args": {"recipient_id": Uuid::nil(), "notification_type": "system"}
        });
        let task: Task = serde_json::from_value(raw).unwrap();
        match task {
            Task::SendNotification { variables, data, .. } => {
                assert!(variables.is_empty());
                assert!(data.is_null());
            }
            other => panic!("unexpected task {other:?}"),
        }
    }

    #[test]
    fn test_retry_countdown_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.countdown(0), Duration::from_secs(10));
        assert_eq!(policy.countdown(1), Duration::from_secs(20));
        assert_eq!(policy.countdown(3), Duration::from_secs(80));
        assert_eq!(policy.countdown(10), Duration::from_secs(600));
        assert_eq!(policy.countdown(64), Duration::from_secs(600));
    }

    #[test]
    fn test_envelope_retry_budget() {
        let envelope = TaskEnvelope::new(Task::WarmMatchModel, 2);
        assert!(envelope.can_retry());
        let second = envelope.next_attempt();
        assert_eq!(second.id, envelope.id);
        assert_eq!(second.attempt, 1);
        assert!(!second.next_attempt().can_retry());
    }

    #[test]
    fn test_app_error_classification() {
        assert!(!TaskError::from(AppError::NotFound("x".into())).is_retryable());
        assert!(TaskError::from(AppError::Storage("s3 down".into())).is_retryable());
        assert!(!TaskError::from(sqlx::Error::RowNotFound).is_retryable());
        assert!(TaskError::TimeLimitExceeded(Duration::from_secs(1)).is_retryable());
    }
}
