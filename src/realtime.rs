//! Room-based event fan-out for connected browsers.
//!
//! Each room is a tokio broadcast channel created on first use. Events are
//! delivered at most once to whoever is subscribed at send time; nothing is
//! buffered for sockets that connect later.

use std::{collections::HashMap, sync::Arc};

use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

const ROOM_CAPACITY: usize = 100;

/// Every authenticated socket is subscribed to this room.
pub const LOBBY_ROOM: &str = "lobby";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    NewNotification,
    TicketCreated,
    TicketUpdated,
    TicketNewComment,
    ReservationCreated,
    ReservationUpdated,
    ReservationDeleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NewNotification => "new_notification",
            EventKind::TicketCreated => "ticket_created",
            EventKind::TicketUpdated => "ticket_updated",
            EventKind::TicketNewComment => "ticket_new_comment",
            EventKind::ReservationCreated => "reservation_created",
            EventKind::ReservationUpdated => "reservation_updated",
            EventKind::ReservationDeleted => "reservation_deleted",
        }
    }
}

/// Wire frame in both directions: `{ "event": ..., "data": ... }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SocketMessage {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl SocketMessage {
    pub fn new(kind: EventKind, data: impl Serialize) -> Self {
        Self {
            event: kind.as_str().to_string(),
            data: serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            event: "error".to_string(),
            data: serde_json::Value::String(message.into()),
        }
    }
}

pub fn user_room(user_id: Uuid) -> String {
    format!("user:{user_id}")
}

pub fn department_room(department: &str) -> String {
    format!("department:{department}")
}

#[derive(Clone, Default)]
pub struct Hub {
    rooms: Arc<RwLock<HashMap<String, broadcast::Sender<SocketMessage>>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, room: &str) -> broadcast::Receiver<SocketMessage> {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room.to_string())
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .subscribe()
    }

    /// Sends to a room and returns how many sockets received it.
    pub async fn emit(&self, room: &str, message: SocketMessage) -> usize {
        let sender = {
            let rooms = self.rooms.read().await;
            rooms.get(room).cloned()
        };

        match sender {
            Some(sender) => match sender.send(message) {
                Ok(receivers) => receivers,
                Err(_) => {
                    debug!("No listeners left in room {room}");
                    self.release(room).await;
                    0
                }
            },
            None => 0,
        }
    }

    pub async fn emit_to_user(&self, user_id: Uuid, kind: EventKind, data: impl Serialize) -> usize {
        self.emit(&user_room(user_id), SocketMessage::new(kind, data)).await
    }

    pub async fn emit_to_department(&self, department: &str, kind: EventKind, data: impl Serialize) -> usize {
        self.emit(&department_room(department), SocketMessage::new(kind, data)).await
    }

    pub async fn emit_to_all(&self, kind: EventKind, data: impl Serialize) -> usize {
        self.emit(LOBBY_ROOM, SocketMessage::new(kind, data)).await
    }

    /// Drops the room once its last subscriber is gone.
    pub async fn release(&self, room: &str) {
        let mut rooms = self.rooms.write().await;
        if rooms.get(room).is_some_and(|sender| sender.receiver_count() == 0) {
            rooms.remove(room);
        }
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn emit_reaches_only_the_target_room() {
        let hub = Hub::new();
        let user = Uuid::new_v4();
        let mut mine = hub.subscribe(&user_room(user)).await;
        let mut theirs = hub.subscribe(&department_room("IT")).await;

        let delivered = hub
            .emit_to_user(user, EventKind::NewNotification, json!({ "title": "Merhaba" }))
            .await;

        assert_eq!(delivered, 1);
        let message = mine.recv().await.unwrap();
        assert_eq!(message.event, "new_notification");
        assert_eq!(message.data["title"], "Merhaba");
        assert!(theirs.try_recv().is_err());
    }

    #[tokio::test]
    async fn emit_without_listeners_is_dropped() {
        let hub = Hub::new();
        assert_eq!(hub.emit_to_department("Satış", EventKind::TicketCreated, json!({})).await, 0);
    }

    #[tokio::test]
    async fn abandoned_rooms_are_pruned() {
        let hub = Hub::new();
        let receiver = hub.subscribe(&department_room("IT")).await;
        drop(receiver);

        assert_eq!(hub.emit_to_department("IT", EventKind::TicketUpdated, json!({})).await, 0);
        assert_eq!(hub.room_count().await, 0);
    }

    #[test]
    fn client_frames_parse_with_string_payload() {
        let frame: SocketMessage =
            serde_json::from_str(r#"{"event":"join_department_room","data":"IT"}"#).unwrap();
        assert_eq!(frame.event, "join_department_room");
        assert_eq!(frame.data, json!("IT"));
    }
}
