//! WebSocket gateway for live notifications.
//!
//! Each socket gets a writer task fed by an unbounded channel. The channel's
//! sender is registered in the `ConnectionRegistry` so pub/sub events and
//! replies to client frames share one ordered path to the socket.

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::authenticate_token;
use crate::errors::AppError;
use crate::models::notification::NotificationRow;
use crate::notifications::service;
use crate::state::AppState;

/// Unread notifications replayed after a `subscribe` frame.
pub const SUBSCRIBE_REPLAY_LIMIT: i64 = 20;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping,
    Subscribe,
    MarkRead { notification_id: Uuid },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    ConnectionEstablished { user_id: Uuid, unread_count: i64 },
    Pong { timestamp: DateTime<Utc> },
    Subscribed { unread_count: i64 },
    MarkedRead { notification_id: Uuid },
    Notification { notification: NotificationRow },
    Error { message: String },
}

impl ServerFrame {
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            warn!("Failed to serialize server frame: {e}");
            r#"{"type":"error","message":"internal serialization error"}"#.to_string()
        })
    }
}

/// Notification reads needed while serving a socket.
#[async_trait]
pub trait FrameStore: Send + Sync {
    async fn unread_count(&self, user_id: Uuid) -> Result<i64, AppError>;

    async fn latest_unread(&self, user_id: Uuid, limit: i64)
        -> Result<Vec<NotificationRow>, AppError>;

    async fn mark_read(&self, user_id: Uuid, notification_id: Uuid) -> Result<(), AppError>;
}

pub struct PgFrameStore(pub PgPool);

#[async_trait]
impl FrameStore for PgFrameStore {
    async fn unread_count(&self, user_id: Uuid) -> Result<i64, AppError> {
        Ok(service::unread_count(&self.0, user_id).await?)
    }

    async fn latest_unread(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<NotificationRow>, AppError> {
        Ok(service::latest_unread(&self.0, user_id, limit).await?)
    }

    async fn mark_read(&self, user_id: Uuid, notification_id: Uuid) -> Result<(), AppError> {
        service::mark_read(&self.0, user_id, notification_id).await?;
        Ok(())
    }
}

/// Produces the reply frames for one text frame from the client.
pub async fn handle_frame(store: &dyn FrameStore, user_id: Uuid, text: &str) -> Vec<ServerFrame> {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("Malformed frame from {user_id}: {e}");
            return vec![ServerFrame::Error {
                message: format!("Malformed frame: {e}"),
            }];
        }
    };

    let result = match frame {
        ClientFrame::Ping => Ok(vec![ServerFrame::Pong {
            timestamp: Utc::now(),
        }]),
        ClientFrame::Subscribe => subscribe(store, user_id).await,
        ClientFrame::MarkRead { notification_id } => store
            .mark_read(user_id, notification_id)
            .await
            .map(|()| vec![ServerFrame::MarkedRead { notification_id }]),
    };

    result.unwrap_or_else(|e| {
        let message = match e {
            AppError::NotFound(msg) => msg,
            other => {
                warn!("Frame handling failed for {user_id}: {other}");
                "Request could not be processed".to_string()
            }
        };
        vec![ServerFrame::Error { message }]
    })
}

async fn subscribe(store: &dyn FrameStore, user_id: Uuid) -> Result<Vec<ServerFrame>, AppError> {
    let unread_count = store.unread_count(user_id).await?;
    let mut frames = vec![ServerFrame::Subscribed { unread_count }];
    frames.extend(
        store
            .latest_unread(user_id, SUBSCRIBE_REPLAY_LIMIT)
            .await?
            .into_iter()
            .map(|notification| ServerFrame::Notification { notification }),
    );
    Ok(frames)
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// GET /ws/notifications?token=<jwt>
pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let token = params
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Missing token".to_string()))?;
    let user = authenticate_token(&state, &token).await?;

    Ok(ws.on_upgrade(move |socket| serve_socket(state, user.id, socket)))
}

async fn serve_socket(state: AppState, user_id: Uuid, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let connection_id = state.connections.register(user_id, tx.clone()).await;
    let store = PgFrameStore(state.db.clone());
    info!("WebSocket {connection_id} opened for {user_id}");

    let unread_count = store.unread_count(user_id).await.unwrap_or_else(|e| {
        warn!("Could not count unread notifications for {user_id}: {e}");
        0
    });
    let _ = tx.send(
        ServerFrame::ConnectionEstablished {
            user_id,
            unread_count,
        }
        .to_text(),
    );

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                for frame in handle_frame(&store, user_id, &text).await {
                    if tx.send(frame.to_text()).is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("WebSocket {connection_id} read error: {e}");
                break;
            }
        }
    }

    state.connections.unregister(user_id, connection_id).await;
    drop(tx);
    let _ = writer.await;
    info!("WebSocket {connection_id} closed for {user_id}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory notifications keyed by id.
    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<HashMap<Uuid, NotificationRow>>,
    }

    impl MemoryStore {
        fn insert(&self, recipient_id: Uuid, title: &str) -> Uuid {
            let row = NotificationRow {
                id: Uuid::new_v4(),
                recipient_id,
                notification_type: "system".to_string(),
                channel: "in_app".to_string(),
                title: title.to_string(),
                message: String::new(),
                data: json!({}),
                is_read: false,
                read_at: None,
                created_at: Utc::now(),
                expires_at: None,
            };
            let id = row.id;
            self.rows.lock().unwrap().insert(id, row);
            id
        }

        fn read_at(&self, id: Uuid) -> Option<DateTime<Utc>> {
            self.rows.lock().unwrap()[&id].read_at
        }
    }

    #[async_trait]
    impl FrameStore for MemoryStore {
        async fn unread_count(&self, user_id: Uuid) -> Result<i64, AppError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter(|r| r.recipient_id == user_id && !r.is_read)
                .count() as i64)
        }

        async fn latest_unread(
            &self,
            user_id: Uuid,
            limit: i64,
        ) -> Result<Vec<NotificationRow>, AppError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter(|r| r.recipient_id == user_id && !r.is_read)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn mark_read(&self, user_id: Uuid, notification_id: Uuid) -> Result<(), AppError> {
            let mut rows = self.rows.lock().unwrap();
            match rows.get_mut(&notification_id) {
                Some(row) if row.recipient_id == user_id => {
                    row.is_read = true;
                    row.read_at.get_or_insert_with(Utc::now);
                    Ok(())
                }
                _ => Err(AppError::NotFound(format!(
                    "Notification {notification_id} not found"
                ))),
            }
        }
    }

    fn as_json(frames: &[ServerFrame]) -> Vec<serde_json::Value> {
        frames
            .iter()
            .map(|f| serde_json::from_str(&f.to_text()).unwrap())
            .collect()
    }

    #[test]
    fn test_parse_client_frames() {
        assert_eq!(
            serde_json::from_str::<ClientFrame>(r#"{"type":"ping"}"#).unwrap(),
            ClientFrame::Ping
        );
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"type":"mark_read","notification_id":"{id}"}}"#);
        assert_eq!(
            serde_json::from_str::<ClientFrame>(&raw).unwrap(),
            ClientFrame::MarkRead { notification_id: id }
        );
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"mark_read"}"#).is_err());
    }

    #[tokio::test]
    async fn test_ping_gets_pong() {
        let store = MemoryStore::default();
        let frames = as_json(&handle_frame(&store, Uuid::new_v4(), r#"{"type":"ping"}"#).await);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "pong");
        assert!(frames[0]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_error() {
        let store = MemoryStore::default();
        for raw in ["not json", r#"{"type":"dance"}"#, r#"{"no_type":true}"#] {
            let frames = as_json(&handle_frame(&store, Uuid::new_v4(), raw).await);
            assert_eq!(frames.len(), 1, "{raw}");
            assert_eq!(frames[0]["type"], "error");
        }
    }

    #[tokio::test]
    async fn test_subscribe_replays_unread() {
        let store = MemoryStore::default();
        let user = Uuid::new_v4();
        store.insert(user, "one");
        store.insert(user, "two");
        store.insert(Uuid::new_v4(), "someone else's");

        let frames = as_json(&handle_frame(&store, user, r#"{"type":"subscribe"}"#).await);
        assert_eq!(frames[0]["type"], "subscribed");
        assert_eq!(frames[0]["unread_count"], 2);
        assert_eq!(frames.len(), 3);
        assert!(frames[1..].iter().all(|f| f["type"] == "notification"));
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent() {
        let store = MemoryStore::default();
        let user = Uuid::new_v4();
        let id = store.insert(user, "hello");
        let raw = format!(r#"{{"type":"mark_read","notification_id":"{id}"}}"#);

        let first = as_json(&handle_frame(&store, user, &raw).await);
        assert_eq!(first[0]["type"], "marked_read");
        let read_at = store.read_at(id);
        assert!(read_at.is_some());

        let second = as_json(&handle_frame(&store, user, &raw).await);
        assert_eq!(second[0]["type"], "marked_read");
        assert_eq!(store.read_at(id), read_at);
        assert_eq!(store.unread_count(user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_read_of_foreign_notification_is_error() {
        let store = MemoryStore::default();
        let id = store.insert(Uuid::new_v4(), "private");
        let raw = format!(r#"{{"type":"mark_read","notification_id":"{id}"}}"#);

        let frames = as_json(&handle_frame(&store, Uuid::new_v4(), &raw).await);
        assert_eq!(frames[0]["type"], "error");
        assert!(store.read_at(id).is_none());
    }

    #[test]
    fn test_connection_established_shape() {
        let user_id = Uuid::new_v4();
        let value: serde_json::Value = serde_json::from_str(
            &ServerFrame::ConnectionEstablished {
                user_id,
                unread_count: 4,
            }
            .to_text(),
        )
        .unwrap();
        assert_eq!(value["type"], "connection_established");
        assert_eq!(value["user_id"], user_id.to_string());
        assert_eq!(value["unread_count"], 4);
    }
}
