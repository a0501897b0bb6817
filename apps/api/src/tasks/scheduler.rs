//! Periodic task scheduler.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::tasks::{Task, TaskQueue};

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub task: Task,
    pub every: Duration,
}

pub fn default_schedule() -> Vec<ScheduleEntry> {
    vec![
        ScheduleEntry {
            task: Task::CleanupExpiredNotifications,
            every: DAY,
        },
        ScheduleEntry {
            task: Task::CleanupExpiredAnalyses,
            every: DAY,
        },
        ScheduleEntry {
            task: Task::WarmMatchModel,
            every: HOUR,
        },
    ]
}

/// Dispatches each entry's task on its period until shutdown. The first tick
/// of every entry fires one full period after start.
pub async fn run_scheduler(
    queue: TaskQueue,
    schedule: Vec<ScheduleEntry>,
    shutdown: CancellationToken,
) {
    let handles: Vec<_> = schedule
        .into_iter()
        .map(|entry| {
            let queue = queue.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let start = tokio::time::Instant::now() + entry.every;
                let mut ticker = tokio::time::interval_at(start, entry.every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => {
                            match queue.dispatch(entry.task.clone()).await {
                                Ok(id) => info!("Scheduled {} ({id})", entry.task.name()),
                                Err(e) => error!("Failed to schedule {}: {e}", entry.task.name()),
                            }
                        }
                    }
                }
            })
        })
        .collect();

    info!("Scheduler started with {} periodic task(s)", handles.len());
    for handle in handles {
        let _ = handle.await;
    }
    info!("Scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::broker::{MemoryBroker, TaskBroker};
    use crate::tasks::Queue;
    use std::sync::Arc;

    #[test]
    fn test_default_schedule_covers_maintenance() {
        let schedule = default_schedule();
        let names: Vec<_> = schedule.iter().map(|e| e.task.name()).collect();
        assert!(names.contains(&"cleanup_expired_notifications"));
        assert!(names.contains(&"cleanup_expired_analyses"));
        assert!(schedule
            .iter()
            .filter(|e| e.task.queue() == Queue::Maintenance)
            .all(|e| e.every == DAY));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_dispatches_on_period() {
        let broker = Arc::new(MemoryBroker::new());
        let queue = TaskQueue::new(broker.clone(), 3);
        let shutdown = CancellationToken::new();

        let schedule = vec![ScheduleEntry {
            task: Task::CleanupExpiredNotifications,
            every: Duration::from_secs(60),
        }];
        let handle = tokio::spawn(run_scheduler(queue, schedule, shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(broker.queue_len(Queue::Maintenance).await.unwrap(), 0);

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(broker.queue_len(Queue::Maintenance).await.unwrap(), 2);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
