use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info};
use serde::Deserialize;
use tokio::{
    sync::{
        broadcast::error::RecvError,
        mpsc::{self, error::TrySendError},
        Mutex,
    },
    task::JoinHandle,
};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    middleware::{authenticate, CurrentUser},
    realtime::{department_room, user_room, Hub, SocketMessage, LOBBY_ROOM},
    state::AppState,
};

/// Frames queued for one socket's writer before further events are dropped.
const OUTBOUND_CAPACITY: usize = 64;

#[derive(Debug, Deserialize)]
pub struct SocketParams {
    token: Option<String>,
}

/// Resolves a client join request to a room name, or the reason it was refused.
fn room_for(user: &CurrentUser, frame: &SocketMessage) -> Result<String, String> {
    let target = frame.data.as_str().ok_or("Oda bilgisi metin olmalıdır")?;

    match frame.event.as_str() {
        "join_user_room" => {
            let id: Uuid = target.parse().map_err(|_| "Geçersiz kullanıcı kimliği".to_string())?;
            if user.is_admin() || id == user.id {
                Ok(user_room(id))
            } else {
                Err("Başka bir kullanıcının odasına katılamazsınız".to_string())
            }
        }
        "join_department_room" => {
            if user.is_admin() || target == user.department {
                Ok(department_room(target))
            } else {
                Err("Başka bir departmanın odasına katılamazsınız".to_string())
            }
        }
        other => Err(format!("Bilinmeyen olay: {other}")),
    }
}

pub async fn socket_handler(
    State(state): State<AppState>,
    Query(params): Query<SocketParams>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> AppResult<Response> {
    let token = params
        .token
        .ok_or_else(|| AppError::Unauthorized("Erişim anahtarı gerekli".to_string()))?;
    let user = authenticate(&token, &state.config.jwt_secret)?;

    let upgrade = upgrade.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    let hub = state.hub.clone();

    Ok(upgrade.on_upgrade(move |socket| handle_socket(socket, hub, user)))
}

/// Copies a room's events into the socket queue until the socket goes away.
///
/// A full queue drops the event for this socket only. The task releases its
/// subscription as soon as the queue closes, even if the room stays quiet.
async fn forward(hub: &Hub, room: &str, outbound: mpsc::Sender<SocketMessage>) -> JoinHandle<()> {
    let mut receiver = hub.subscribe(room).await;
    let hub = hub.clone();
    let room = room.to_string();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = outbound.closed() => break,
                received = receiver.recv() => match received {
                    Ok(message) => match outbound.try_send(message) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => debug!("Socket queue full in {room}, event dropped"),
                        Err(TrySendError::Closed(_)) => break,
                    },
                    Err(RecvError::Lagged(skipped)) => debug!("Socket lagging in {room}, dropped {skipped} events"),
                    Err(RecvError::Closed) => break,
                },
            }
        }

        drop(receiver);
        hub.release(&room).await;
    })
}

async fn handle_socket(socket: WebSocket, hub: Hub, user: CurrentUser) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound, mut queue) = mpsc::channel::<SocketMessage>(OUTBOUND_CAPACITY);

    info!("Socket connected for {}", user.email);

    let rooms: Arc<Mutex<HashMap<String, JoinHandle<()>>>> = Arc::default();
    rooms
        .lock()
        .await
        .insert(LOBBY_ROOM.to_string(), forward(&hub, LOBBY_ROOM, outbound.clone()).await);

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = queue.recv().await {
            let Ok(json) = serde_json::to_string(&message) else {
                continue;
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let receive_user = user.clone();
    let joined = rooms.clone();
    let mut receive_task = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    let reply = match serde_json::from_str::<SocketMessage>(&text) {
                        Ok(frame) => match room_for(&receive_user, &frame) {
                            Ok(room) => {
                                let mut joined = joined.lock().await;
                                if !joined.contains_key(&room) {
                                    let handle = forward(&hub, &room, outbound.clone()).await;
                                    joined.insert(room.clone(), handle);
                                    debug!("{} joined {room}", receive_user.email);
                                }
                                None
                            }
                            Err(reason) => Some(SocketMessage::error(reason)),
                        },
                        Err(_) => Some(SocketMessage::error("Geçersiz mesaj biçimi")),
                    };

                    if let Some(reply) = reply {
                        if outbound.send(reply).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    error!("WebSocket error: {e}");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            receive_task.abort();
            let _ = receive_task.await;
        }
        _ = &mut receive_task => {
            send_task.abort();
            let _ = send_task.await;
        }
    }

    // The queue is gone now, so every forwarder exits and releases its room.
    let forwarders: Vec<JoinHandle<()>> = rooms.lock().await.drain().map(|(_, handle)| handle).collect();
    for handle in forwarders {
        let _ = handle.await;
    }

    info!("Socket closed for {}", user.email);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::Role, realtime::EventKind};
    use serde_json::json;
    use std::time::Duration;

    fn user(roles: Vec<Role>) -> CurrentUser {
        CurrentUser {
            id: Uuid::new_v4(),
            email: "ws@gurgil.com".to_string(),
            first_name: "Ws".to_string(),
            last_name: "Test".to_string(),
            department: "IT".to_string(),
            roles,
        }
    }

    fn frame(event: &str, data: serde_json::Value) -> SocketMessage {
        SocketMessage {
            event: event.to_string(),
            data,
        }
    }

    #[test]
    fn users_join_their_own_rooms() {
        let me = user(vec![Role::Employee]);
        assert_eq!(
            room_for(&me, &frame("join_user_room", json!(me.id.to_string()))),
            Ok(user_room(me.id))
        );
        assert_eq!(
            room_for(&me, &frame("join_department_room", json!("IT"))),
            Ok(department_room("IT"))
        );
    }

    #[test]
    fn foreign_rooms_are_refused_unless_admin() {
        let me = user(vec![Role::Employee]);
        let other = Uuid::new_v4().to_string();
        assert!(room_for(&me, &frame("join_user_room", json!(other))).is_err());
        assert!(room_for(&me, &frame("join_department_room", json!("Satış"))).is_err());

        let admin = user(vec![Role::Admin]);
        assert!(room_for(&admin, &frame("join_department_room", json!("Satış"))).is_ok());
    }

    #[test]
    fn malformed_frames_are_refused() {
        let me = user(vec![Role::Employee]);
        assert!(room_for(&me, &frame("join_user_room", json!(42))).is_err());
        assert!(room_for(&me, &frame("join_user_room", json!("not-a-uuid"))).is_err());
        assert!(room_for(&me, &frame("dance", json!("IT"))).is_err());
    }

    #[tokio::test]
    async fn stalled_socket_queue_stays_bounded() {
        let hub = Hub::new();
        let (outbound, mut queue) = mpsc::channel(OUTBOUND_CAPACITY);
        let _forwarder = forward(&hub, LOBBY_ROOM, outbound).await;

        for n in 0..5000 {
            hub.emit_to_all(EventKind::TicketCreated, json!({ "n": n })).await;
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut queued = 0;
        while queue.try_recv().is_ok() {
            queued += 1;
        }
        assert!(queued > 0);
        assert!(queued <= OUTBOUND_CAPACITY, "queued {queued} frames");
    }

    #[tokio::test]
    async fn quiet_room_is_released_when_socket_goes_away() {
        let hub = Hub::new();
        let (outbound, queue) = mpsc::channel(OUTBOUND_CAPACITY);
        let forwarder = forward(&hub, &user_room(Uuid::new_v4()), outbound).await;
        assert_eq!(hub.room_count().await, 1);

        drop(queue);

        tokio::time::timeout(Duration::from_secs(1), forwarder)
            .await
            .expect("forwarder should stop")
            .unwrap();
        assert_eq!(hub.room_count().await, 0);
    }
}
