//! Per-user tracking of live WebSocket connections.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Frames queued for a socket's writer task, already serialized to JSON.
pub type Outbound = mpsc::UnboundedSender<String>;

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<Uuid, HashMap<Uuid, Outbound>>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub online_users: usize,
    pub connections: usize,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a socket for `user_id` and returns its connection id.
    pub async fn register(&self, user_id: Uuid, sender: Outbound) -> Uuid {
        let connection_id = Uuid::new_v4();
        let mut inner = self.inner.write().await;
        inner
            .entry(user_id)
            .or_default()
            .insert(connection_id, sender);
        debug!(
            "Registered connection {connection_id} for user {user_id} ({} open)",
            inner.get(&user_id).map(HashMap::len).unwrap_or(0)
        );
        connection_id
    }

    pub async fn unregister(&self, user_id: Uuid, connection_id: Uuid) {
        let mut inner = self.inner.write().await;
        if let Some(connections) = inner.get_mut(&user_id) {
            connections.remove(&connection_id);
            if connections.is_empty() {
                inner.remove(&user_id);
            }
        }
        debug!("Unregistered connection {connection_id} for user {user_id}");
    }

    /// Queues `frame` on every open socket of `user_id` and returns how many
    /// sockets accepted it. Connections whose writer has gone away are pruned.
    pub async fn send_to_user(&self, user_id: Uuid, frame: &str) -> usize {
        let (delivered, dead) = {
            let inner = self.inner.read().await;
            let Some(connections) = inner.get(&user_id) else {
                return 0;
            };
            let mut delivered = 0;
            let mut dead = Vec::new();
            for (id, sender) in connections {
                match sender.send(frame.to_string()) {
                    Ok(()) => delivered += 1,
                    Err(_) => dead.push(*id),
                }
            }
            (delivered, dead)
        };

        if !dead.is_empty() {
            self.prune(user_id, &dead).await;
        }
        delivered
    }

    /// Removes `dead` under a single write lock. Ids already gone are skipped.
    async fn prune(&self, user_id: Uuid, dead: &[Uuid]) {
        let mut inner = self.inner.write().await;
        if let Some(connections) = inner.get_mut(&user_id) {
            for connection_id in dead {
                connections.remove(connection_id);
            }
            if connections.is_empty() {
                inner.remove(&user_id);
            }
        }
        debug!("Pruned {} closed connection(s) for user {user_id}", dead.len());
    }

    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        self.inner
            .read()
            .await
            .get(&user_id)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    /// Totals across all users, reported by `/health/ready`.
    pub async fn stats(&self) -> RegistryStats {
        let inner = self.inner.read().await;
        RegistryStats {
            online_users: inner.len(),
            connections: inner.values().map(HashMap::len).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_reaches_every_connection_of_user() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        registry.register(user, tx1).await;
        registry.register(user, tx2).await;

        assert_eq!(registry.send_to_user(user, "{\"type\":\"pong\"}").await, 2);
        assert_eq!(rx1.recv().await.unwrap(), "{\"type\":\"pong\"}");
        assert_eq!(rx2.recv().await.unwrap(), "{\"type\":\"pong\"}");
    }

    #[tokio::test]
    async fn test_send_to_other_user_is_isolated() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(Uuid::new_v4(), tx).await;

        assert_eq!(registry.send_to_user(Uuid::new_v4(), "hello").await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister_last_connection_marks_offline() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = registry.register(user, tx).await;
        assert_eq!(registry.connection_count(user).await, 1);

        registry.unregister(user, conn).await;
        assert_eq!(registry.connection_count(user).await, 0);
        assert_eq!(registry.stats().await.online_users, 0);
    }

    #[tokio::test]
    async fn test_closed_receivers_are_pruned() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (live_tx, mut live_rx) = mpsc::unbounded_channel();
        let (dead_tx, dead_rx) = mpsc::unbounded_channel();
        registry.register(user, live_tx).await;
        registry.register(user, dead_tx).await;
        drop(dead_rx);

        assert_eq!(registry.send_to_user(user, "x").await, 1);
        assert_eq!(registry.connection_count(user).await, 1);
        assert_eq!(live_rx.recv().await.unwrap(), "x");

        // The surviving socket keeps receiving after the prune.
        assert_eq!(registry.send_to_user(user, "y").await, 1);
        assert_eq!(live_rx.recv().await.unwrap(), "y");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sends_to_dead_connection_report_zero() {
        for _ in 0..200 {
            let registry = ConnectionRegistry::new();
            let user = Uuid::new_v4();
            let (tx, rx) = mpsc::unbounded_channel();
            let conn = registry.register(user, tx).await;
            drop(rx);

            let mut handles = Vec::new();
            for _ in 0..4 {
                let registry = registry.clone();
                handles.push(tokio::spawn(async move {
                    registry.send_to_user(user, "x").await
                }));
            }
            let unregister = {
                let registry = registry.clone();
                tokio::spawn(async move { registry.unregister(user, conn).await })
            };

            for handle in handles {
                assert_eq!(handle.await.unwrap(), 0);
            }
            unregister.await.unwrap();
            assert_eq!(registry.connection_count(user).await, 0);
        }
    }

    #[tokio::test]
    async fn test_stats() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = mpsc::unbounded_channel();
        let (b, _rb) = mpsc::unbounded_channel();
        let (c, _rc) = mpsc::unbounded_channel();
        let alice = Uuid::new_v4();
        registry.register(alice, a).await;
        registry.register(alice, b).await;
        registry.register(Uuid::new_v4(), c).await;

        let stats = registry.stats().await;
        assert_eq!(stats.online_users, 2);
        assert_eq!(stats.connections, 3);
    }
}
