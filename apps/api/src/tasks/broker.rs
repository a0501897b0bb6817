//! Task brokers.
//!
//! Redis layout per queue `q`:
//! - `hirewise:queue:q`: ready list (producers LPUSH, consumers LMOVE from the right)
//! - `hirewise:queue:q:processing:<consumer>`: reserved, not yet acknowledged
//! - `hirewise:queue:q:delayed`: sorted set scored by due time (unix millis)

#[cfg(test)]
use std::collections::{HashMap, VecDeque};
#[cfg(test)]
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use thiserror::Error;

use crate::tasks::{Queue, TaskEnvelope};

const KEY_PREFIX: &str = "hirewise:queue";

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("task serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A task taken off a queue but not yet acknowledged.
#[derive(Debug, Clone)]
pub struct Reserved {
    pub queue: Queue,
    pub consumer: String,
    /// Exact payload as stored, needed to remove it from the processing list.
    pub payload: String,
}

impl Reserved {
    pub fn envelope(&self) -> Result<TaskEnvelope, BrokerError> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

#[async_trait]
pub trait TaskBroker: Send + Sync {
    async fn enqueue(&self, queue: Queue, envelope: &TaskEnvelope) -> Result<(), BrokerError>;

    async fn enqueue_delayed(
        &self,
        queue: Queue,
        envelope: &TaskEnvelope,
        delay: Duration,
    ) -> Result<(), BrokerError>;

    /// Moves delayed tasks whose due time has passed onto the ready list.
    async fn promote_due(&self, queue: Queue) -> Result<usize, BrokerError>;

    /// Takes the oldest ready task into `consumer`'s processing list.
    async fn try_reserve(&self, queue: Queue, consumer: &str)
        -> Result<Option<Reserved>, BrokerError>;

    async fn ack(&self, reserved: &Reserved) -> Result<(), BrokerError>;

    /// Returns tasks a previous run of `consumer` reserved but never acknowledged.
    async fn requeue_unacked(&self, queue: Queue, consumer: &str) -> Result<usize, BrokerError>;

    /// Ready tasks waiting on `queue`; reported by `/health/ready`.
    async fn queue_len(&self, queue: Queue) -> Result<usize, BrokerError>;
}

fn ready_key(queue: Queue) -> String {
    format!("{KEY_PREFIX}:{}", queue.name())
}

fn processing_key(queue: Queue, consumer: &str) -> String {
    format!("{KEY_PREFIX}:{}:processing:{consumer}", queue.name())
}

fn delayed_key(queue: Queue) -> String {
    format!("{KEY_PREFIX}:{}:delayed", queue.name())
}

fn due_at_millis(delay: Duration) -> i64 {
    Utc::now().timestamp_millis() + delay.as_millis().min(i64::MAX as u128) as i64
}

// ────────────────────────────────────────────────────────────────────────────
// Redis
// ────────────────────────────────────────────────────────────────────────────

pub struct RedisBroker {
    conn: MultiplexedConnection,
}

impl RedisBroker {
    pub async fn connect(client: &redis::Client) -> Result<Self, BrokerError> {
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl TaskBroker for RedisBroker {
    async fn enqueue(&self, queue: Queue, envelope: &TaskEnvelope) -> Result<(), BrokerError> {
        let payload = serde_json::to_string(envelope)?;
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(ready_key(queue), payload).await?;
        Ok(())
    }

    async fn enqueue_delayed(
        &self,
        queue: Queue,
        envelope: &TaskEnvelope,
        delay: Duration,
    ) -> Result<(), BrokerError> {
        let payload = serde_json::to_string(envelope)?;
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(delayed_key(queue), payload, due_at_millis(delay))
            .await?;
        Ok(())
    }

    async fn promote_due(&self, queue: Queue) -> Result<usize, BrokerError> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp_millis();
        let due: Vec<String> = conn
            .zrangebyscore(delayed_key(queue), "-inf", now)
            .await?;

        let mut promoted = 0;
        for payload in due {
            // Only the caller that wins the ZREM pushes the task.
            let removed: usize = conn.zrem(delayed_key(queue), &payload).await?;
            if removed == 1 {
                conn.lpush::<_, _, ()>(ready_key(queue), &payload).await?;
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    async fn try_reserve(
        &self,
        queue: Queue,
        consumer: &str,
    ) -> Result<Option<Reserved>, BrokerError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = redis::cmd("LMOVE")
            .arg(ready_key(queue))
            .arg(processing_key(queue, consumer))
            .arg("RIGHT")
            .arg("LEFT")
            .query_async(&mut conn)
            .await?;
        Ok(payload.map(|payload| Reserved {
            queue,
            consumer: consumer.to_string(),
            payload,
        }))
    }

    async fn ack(&self, reserved: &Reserved) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        conn.lrem::<_, _, ()>(
            processing_key(reserved.queue, &reserved.consumer),
            1,
            &reserved.payload,
        )
        .await?;
        Ok(())
    }

    async fn requeue_unacked(&self, queue: Queue, consumer: &str) -> Result<usize, BrokerError> {
        let mut conn = self.conn.clone();
        let mut moved = 0;
        loop {
            // Back onto the consuming end so they run next.
            let payload: Option<String> = redis::cmd("LMOVE")
                .arg(processing_key(queue, consumer))
                .arg(ready_key(queue))
                .arg("RIGHT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await?;
            if payload.is_none() {
                break;
            }
            moved += 1;
        }
        Ok(moved)
    }

    async fn queue_len(&self, queue: Queue) -> Result<usize, BrokerError> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(ready_key(queue)).await?)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[derive(Default)]
struct MemoryState {
    ready: HashMap<Queue, VecDeque<String>>,
    processing: HashMap<(Queue, String), Vec<String>>,
    delayed: Vec<(Queue, i64, String)>,
}

/// Process-local broker with the same semantics as `RedisBroker`.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<MemoryState>,
}

#[cfg(test)]
impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn processing_len(&self, queue: Queue, consumer: &str) -> usize {
        self.with_state(|s| {
            s.processing
                .get(&(queue, consumer.to_string()))
                .map(Vec::len)
                .unwrap_or(0)
        })
    }

    pub fn delayed_len(&self, queue: Queue) -> usize {
        self.with_state(|s| s.delayed.iter().filter(|(q, _, _)| *q == queue).count())
    }
}

#[cfg(test)]
#[async_trait]
impl TaskBroker for MemoryBroker {
    async fn enqueue(&self, queue: Queue, envelope: &TaskEnvelope) -> Result<(), BrokerError> {
        let payload = serde_json::to_string(envelope)?;
        self.with_state(|s| s.ready.entry(queue).or_default().push_front(payload));
        Ok(())
    }

    async fn enqueue_delayed(
        &self,
        queue: Queue,
        envelope: &TaskEnvelope,
        delay: Duration,
    ) -> Result<(), BrokerError> {
        let payload = serde_json::to_string(envelope)?;
        let due = due_at_millis(delay);
        self.with_state(|s| s.delayed.push((queue, due, payload)));
        Ok(())
    }

    async fn promote_due(&self, queue: Queue) -> Result<usize, BrokerError> {
        let now = Utc::now().timestamp_millis();
        Ok(self.with_state(|s| {
            let (due, pending): (Vec<_>, Vec<_>) = s
                .delayed
                .drain(..)
                .partition(|(q, at, _)| *q == queue && *at <= now);
            s.delayed = pending;
            let count = due.len();
            let ready = s.ready.entry(queue).or_default();
            for (_, _, payload) in due {
                ready.push_front(payload);
            }
            count
        }))
    }

    async fn try_reserve(
        &self,
        queue: Queue,
        consumer: &str,
    ) -> Result<Option<Reserved>, BrokerError> {
        Ok(self.with_state(|s| {
            let payload = s.ready.get_mut(&queue)?.pop_back()?;
            s.processing
                .entry((queue, consumer.to_string()))
                .or_default()
                .push(payload.clone());
            Some(Reserved {
                queue,
                consumer: consumer.to_string(),
                payload,
            })
        }))
    }

    async fn ack(&self, reserved: &Reserved) -> Result<(), BrokerError> {
        self.with_state(|s| {
            if let Some(list) = s
                .processing
                .get_mut(&(reserved.queue, reserved.consumer.clone()))
            {
                if let Some(pos) = list.iter().position(|p| *p == reserved.payload) {
                    list.remove(pos);
                }
            }
        });
        Ok(())
    }

    async fn requeue_unacked(&self, queue: Queue, consumer: &str) -> Result<usize, BrokerError> {
        Ok(self.with_state(|s| {
            let pending = s
                .processing
                .remove(&(queue, consumer.to_string()))
                .unwrap_or_default();
            let count = pending.len();
            let ready = s.ready.entry(queue).or_default();
            for payload in pending {
                ready.push_back(payload);
            }
            count
        }))
    }

    async fn queue_len(&self, queue: Queue) -> Result<usize, BrokerError> {
        Ok(self.with_state(|s| s.ready.get(&queue).map(VecDeque::len).unwrap_or(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::Task;
    use uuid::Uuid;

    fn envelope(resume_id: Uuid) -> TaskEnvelope {
        TaskEnvelope::new(Task::ParseResume { resume_id }, 3)
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let broker = MemoryBroker::new();
        let first = envelope(Uuid::new_v4());
        let second = envelope(Uuid::new_v4());
        broker.enqueue(Queue::ResumeProcessing, &first).await.unwrap();
        broker.enqueue(Queue::ResumeProcessing, &second).await.unwrap();

        let r1 = broker
            .try_reserve(Queue::ResumeProcessing, "w1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(r1.envelope().unwrap().id, first.id);
    }

    #[tokio::test]
    async fn test_reserved_task_stays_until_ack() {
        let broker = MemoryBroker::new();
        broker
            .enqueue(Queue::ResumeProcessing, &envelope(Uuid::new_v4()))
            .await
            .unwrap();

        let reserved = broker
            .try_reserve(Queue::ResumeProcessing, "w1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(broker.queue_len(Queue::ResumeProcessing).await.unwrap(), 0);
        assert_eq!(broker.processing_len(Queue::ResumeProcessing, "w1"), 1);

        broker.ack(&reserved).await.unwrap();
        assert_eq!(broker.processing_len(Queue::ResumeProcessing, "w1"), 0);
    }

    #[tokio::test]
    async fn test_unacked_tasks_are_requeued_for_same_consumer() {
        let broker = MemoryBroker::new();
        let env = envelope(Uuid::new_v4());
        broker.enqueue(Queue::ResumeProcessing, &env).await.unwrap();
        broker
            .try_reserve(Queue::ResumeProcessing, "w1")
            .await
            .unwrap();

        // Another consumer's restart does not steal w1's task.
        assert_eq!(
            broker
                .requeue_unacked(Queue::ResumeProcessing, "w2")
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            broker
                .requeue_unacked(Queue::ResumeProcessing, "w1")
                .await
                .unwrap(),
            1
        );

        let again = broker
            .try_reserve(Queue::ResumeProcessing, "w1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.envelope().unwrap().id, env.id);
    }

    #[tokio::test]
    async fn test_delayed_task_waits_until_due() {
        let broker = MemoryBroker::new();
        broker
            .enqueue_delayed(
                Queue::AiAnalysis,
                &envelope(Uuid::new_v4()),
                Duration::from_secs(3600),
            )
            .await
            .unwrap();
        broker
            .enqueue_delayed(Queue::AiAnalysis, &envelope(Uuid::new_v4()), Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(broker.promote_due(Queue::AiAnalysis).await.unwrap(), 1);
        assert_eq!(broker.queue_len(Queue::AiAnalysis).await.unwrap(), 1);
        assert_eq!(broker.delayed_len(Queue::AiAnalysis), 1);
    }

    #[tokio::test]
    async fn test_queues_are_isolated() {
        let broker = MemoryBroker::new();
        broker
            .enqueue(Queue::Notifications, &envelope(Uuid::new_v4()))
            .await
            .unwrap();
        assert!(broker
            .try_reserve(Queue::Maintenance, "w1")
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(ready_key(Queue::AiAnalysis), "hirewise:queue:ai_analysis");
        assert_eq!(
            processing_key(Queue::AiAnalysis, "node-1-0"),
            "hirewise:queue:ai_analysis:processing:node-1-0"
        );
        assert_eq!(delayed_key(Queue::Maintenance), "hirewise:queue:maintenance:delayed");
    }
}
