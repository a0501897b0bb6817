//! Task workers.
//!
//! Each worker reserves one task at a time (prefetch 1), runs it under the
//! task's time limits and acknowledges it only once the outcome is settled.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::tasks::broker::{BrokerError, Reserved, TaskBroker};
use crate::tasks::{Queue, RetryPolicy, Task, TaskError};

/// Executes tasks. `AppTaskHandler` is the production implementation.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<(), TaskError>;

    /// Runs once a task has failed for good (retries exhausted or fatal error).
    async fn on_failure(&self, task: &Task, error: &TaskError);
}

/// What happened to a reserved task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Retrying,
    Failed,
    Discarded,
}

pub struct Worker {
    id: String,
    queues: Vec<Queue>,
    broker: Arc<dyn TaskBroker>,
    handler: Arc<dyn TaskHandler>,
    retry: RetryPolicy,
    idle_wait: Duration,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        queues: Vec<Queue>,
        broker: Arc<dyn TaskBroker>,
        handler: Arc<dyn TaskHandler>,
    ) -> Self {
        Self {
            id: id.into(),
            queues,
            broker,
            handler,
            retry: RetryPolicy::default(),
            idle_wait: Duration::from_millis(500),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Polls queues until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        for queue in &self.queues {
            match self.broker.requeue_unacked(*queue, &self.id).await {
                Ok(0) => {}
                Ok(n) => warn!(
                    "Worker {} requeued {} unacknowledged task(s) on {}",
                    self.id,
                    n,
                    queue.name()
                ),
                Err(e) => error!("Worker {} could not requeue {}: {e}", self.id, queue.name()),
            }
        }

        info!(
            "Worker {} started on queues [{}]",
            self.id,
            self.queues
                .iter()
                .map(Queue::name)
                .collect::<Vec<_>>()
                .join(", ")
        );

        while !shutdown.is_cancelled() {
            let wait = match self.run_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => self.idle_wait,
                Err(e) => {
                    error!("Worker {} broker error: {e}", self.id);
                    Duration::from_secs(2)
                }
            };
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!("Worker {} stopped", self.id);
    }

    /// Promotes due retries, then processes at most one task.
    /// Returns `None` when every queue was empty.
    pub async fn run_once(&self) -> Result<Option<Outcome>, BrokerError> {
        for queue in &self.queues {
            self.broker.promote_due(*queue).await?;
        }
        for queue in &self.queues {
            if let Some(reserved) = self.broker.try_reserve(*queue, &self.id).await? {
                let outcome = self.process(&reserved).await?;
                return Ok(Some(outcome));
            }
        }
        Ok(None)
    }

    async fn process(&self, reserved: &Reserved) -> Result<Outcome, BrokerError> {
        let envelope = match reserved.envelope() {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(
                    "Discarding undecodable task on {}: {e}",
                    reserved.queue.name()
                );
                self.broker.ack(reserved).await?;
                return Ok(Outcome::Discarded);
            }
        };

        let task = &envelope.task;
        let limits = task.limits();
        let started = Instant::now();

        let result = match tokio::time::timeout(limits.hard, self.handler.handle(task)).await {
            Ok(result) => result,
            Err(_) => Err(TaskError::TimeLimitExceeded(limits.hard)),
        };

        let elapsed = started.elapsed();
        if elapsed > limits.soft {
            warn!(
                "Task {} ({}) exceeded soft time limit: {:?} > {:?}",
                task.name(),
                envelope.id,
                elapsed,
                limits.soft
            );
        }

        let outcome = match result {
            Ok(()) => {
                info!(
                    "Task {} ({}) succeeded in {}ms",
                    task.name(),
                    envelope.id,
                    elapsed.as_millis()
                );
                Outcome::Succeeded
            }
            Err(e) if e.is_retryable() && envelope.can_retry() => {
                let countdown = self.retry.countdown(envelope.attempt);
                warn!(
                    "Task {} ({}) failed on attempt {}/{}: {e}; retrying in {:?}",
                    task.name(),
                    envelope.id,
                    envelope.attempt + 1,
                    envelope.max_retries + 1,
                    countdown
                );
                self.broker
                    .enqueue_delayed(reserved.queue, &envelope.next_attempt(), countdown)
                    .await?;
                Outcome::Retrying
            }
            Err(e) => {
                error!(
                    "Task {} ({}) failed permanently after {} attempt(s): {e}",
                    task.name(),
                    envelope.id,
                    envelope.attempt + 1
                );
                self.handler.on_failure(task, &e).await;
                Outcome::Failed
            }
        };

        self.broker.ack(reserved).await?;
        Ok(outcome)
    }
}

/// Spawns `concurrency` workers, each consuming every queue.
pub fn spawn_workers(
    name: &str,
    concurrency: usize,
    broker: Arc<dyn TaskBroker>,
    handler: Arc<dyn TaskHandler>,
    shutdown: CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    (0..concurrency)
        .map(|slot| {
            let worker = Worker::new(
                format!("{name}-{slot}"),
                Queue::ALL.to_vec(),
                broker.clone(),
                handler.clone(),
            );
            tokio::spawn(worker.run(shutdown.clone()))
        })
        .collect()
}
