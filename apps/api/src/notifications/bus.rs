//! Cross-process notification fan-out over Redis pub/sub.
//!
//! Any process may publish; every API process runs one listener that forwards
//! events to the sockets it holds locally.

use std::time::Duration;

use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::notification::NotificationRow;
use crate::notifications::registry::ConnectionRegistry;
use crate::notifications::ws::ServerFrame;

pub const NOTIFICATION_CHANNEL: &str = "hirewise:notifications";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub recipient_id: Uuid,
    pub notification: NotificationRow,
}

/// Publishing side of the channel. Cloning shares the multiplexed connection.
#[derive(Clone)]
pub struct NotificationBus {
    conn: MultiplexedConnection,
}

impl NotificationBus {
    pub async fn connect(client: &redis::Client) -> Result<Self, redis::RedisError> {
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }

    /// Publishes an event and returns the number of listening processes.
    pub async fn publish(&self, event: &NotificationEvent) -> Result<usize, redis::RedisError> {
        let payload = serde_json::to_string(event).map_err(|e| {
            redis::RedisError::from((
                redis::ErrorKind::TypeError,
                "notification event is not serializable",
                e.to_string(),
            ))
        })?;
        let mut conn = self.conn.clone();
        let receivers: usize = conn.publish(NOTIFICATION_CHANNEL, payload).await?;
        debug!(
            "Published notification {} to {receivers} listener(s)",
            event.notification.id
        );
        Ok(receivers)
    }
}

/// Delivers one event to the recipient's local sockets. Returns how many
/// sockets received it.
pub async fn deliver(registry: &ConnectionRegistry, event: NotificationEvent) -> usize {
    let recipient = event.recipient_id;
    let frame = ServerFrame::Notification {
        notification: event.notification,
    };
    registry.send_to_user(recipient, &frame.to_text()).await
}

/// Subscribes to the notification channel until `shutdown` is cancelled,
/// reconnecting with a capped backoff when the subscription drops.
pub async fn run_listener(
    client: redis::Client,
    registry: ConnectionRegistry,
    shutdown: CancellationToken,
) {
    let mut backoff = Duration::from_secs(1);

    while !shutdown.is_cancelled() {
        match listen_once(&client, &registry, &shutdown).await {
            Ok(()) => break,
            Err(e) => {
                error!("Notification listener lost its subscription: {e}");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(Duration::from_secs(30));
            }
        }
    }

    info!("Notification listener stopped");
}

/// Returns `Ok` on shutdown and `Err` when the subscription fails or ends.
async fn listen_once(
    client: &redis::Client,
    registry: &ConnectionRegistry,
    shutdown: &CancellationToken,
) -> Result<(), redis::RedisError> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(NOTIFICATION_CHANNEL).await?;
    info!("Subscribed to {NOTIFICATION_CHANNEL}");

    let mut messages = pubsub.on_message();
    loop {
        let msg = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            msg = messages.next() => msg,
        };
        let Some(msg) = msg else {
            return Err(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "pub/sub stream ended",
            )));
        };

        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Ignoring non-text notification payload: {e}");
                continue;
            }
        };
        match serde_json::from_str::<NotificationEvent>(&payload) {
            Ok(event) => {
                let recipient = event.recipient_id;
                let delivered = deliver(registry, event).await;
                debug!("Notification for {recipient} reached {delivered} socket(s)");
            }
            Err(e) => warn!("Ignoring malformed notification event: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn sample_row(recipient_id: Uuid) -> NotificationRow {
        NotificationRow {
            id: Uuid::new_v4(),
            recipient_id,
            notification_type: "system".to_string(),
            channel: "in_app".to_string(),
            title: "Maintenance".to_string(),
            message: "Back soon".to_string(),
            data: json!({}),
            is_read: false,
            read_at: None,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    #[test]
    fn test_event_wire_format() {
        let recipient = Uuid::new_v4();
        let event = NotificationEvent {
            recipient_id: recipient,
            notification: sample_row(recipient),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["recipient_id"], recipient.to_string());
        assert_eq!(value["notification"]["title"], "Maintenance");

        let back: NotificationEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back.notification.id, event.notification.id);
    }

    #[tokio::test]
    async fn test_deliver_wraps_in_notification_frame() {
        let registry = ConnectionRegistry::new();
        let recipient = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(recipient, tx).await;

        let delivered = deliver(
            &registry,
            NotificationEvent {
                recipient_id: recipient,
                notification: sample_row(recipient),
            },
        )
        .await;
        assert_eq!(delivered, 1);

        let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "notification");
        assert_eq!(frame["notification"]["message"], "Back soon");
    }

    #[tokio::test]
    async fn test_deliver_to_offline_user_is_noop() {
        let registry = ConnectionRegistry::new();
        let recipient = Uuid::new_v4();
        let delivered = deliver(
            &registry,
            NotificationEvent {
                recipient_id: recipient,
                notification: sample_row(recipient),
            },
        )
        .await;
        assert_eq!(delivered, 0);
    }
}
