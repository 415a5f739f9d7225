//! In-process chat backend: REST message store plus a per-room relay hub.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, info};

use parlor_types::api::{MessageQuery, SendMessageRequest, SendMessageResponse};
use parlor_types::{ChannelId, Message};

/// Room id used by connections that did not ask for one.
const LOBBY: ChannelId = 0;

/// Page size when a listing carries no `limit`.
const DEFAULT_LIMIT: usize = 100;

#[derive(Clone, Default)]
struct BackendState {
    messages: Arc<Mutex<Vec<Message>>>,
    rooms: Arc<Mutex<HashMap<ChannelId, broadcast::Sender<String>>>>,
}

impl BackendState {
    fn room(&self, room_id: ChannelId) -> broadcast::Sender<String> {
        self.rooms
            .lock()
            .unwrap()
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }
}

pub struct Backend {
    pub addr: SocketAddr,
}

impl Backend {
    pub fn http_url(&self) -> url::Url {
        url::Url::parse(&format!("http://{}", self.addr)).unwrap()
    }

    pub fn ws_url(&self) -> url::Url {
        url::Url::parse(&format!("ws://{}/ws", self.addr)).unwrap()
    }
}

/// Serve `app` on an ephemeral loopback port.
pub async fn spawn_router(app: Router) -> Backend {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    info!("Test backend listening on {}", addr);

    Backend { addr }
}

pub async fn spawn_backend() -> Backend {
    let app = Router::new()
        .route("/messages", get(list_messages).post(create_message))
        .route("/ws", get(ws_upgrade))
        .with_state(BackendState::default());
    spawn_router(app).await
}

async fn list_messages(State(state): State<BackendState>, Query(query): Query<MessageQuery>) -> Json<Vec<Message>> {
    let messages = state.messages.lock().unwrap();
    let limit = query.limit.map_or(DEFAULT_LIMIT, |l| l as usize);
    // Oldest first, after the cursor, one page at a time.
    let page: Vec<Message> = messages
        .iter()
        .filter(|m| m.channel_id == query.channel_id)
        .filter(|m| query.last_message_id.is_none_or(|after| m.id > after))
        .take(limit)
        .cloned()
        .collect();
    Json(page)
}

async fn create_message(
    State(state): State<BackendState>,
    Json(req): Json<SendMessageRequest>,
) -> Json<SendMessageResponse> {
    let mut messages = state.messages.lock().unwrap();
    let id = messages.last().map_or(1, |m| m.id + 1);
    messages.push(Message {
        id,
        channel_id: req.channel_id,
        user_id: req.user_id,
        user_name: format!("user{}", req.user_id),
        text: req.text,
    });
    Json(SendMessageResponse { id })
}

async fn ws_upgrade(
    State(state): State<BackendState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let room_id = params
        .get("roomID")
        .and_then(|v| v.parse().ok())
        .unwrap_or(LOBBY);
    // Join before the handshake completes so nothing sent after it is missed.
    let room = state.room(room_id);
    let rx = room.subscribe();
    ws.on_upgrade(move |socket| relay(socket, room, rx, room_id))
}

/// Every text frame is relayed to all members of the room, the sender included.
/// Newlines inside a frame become spaces; whatever has queued up for a member
/// goes out as one frame, newline separated.
async fn relay(
    socket: WebSocket,
    room: broadcast::Sender<String>,
    mut rx: broadcast::Receiver<String>,
    room_id: ChannelId,
) {
    let (mut sender, mut receiver) = socket.split();
    debug!("Client joined room {}", room_id);

    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = room.send(text.as_str().replace('\n', " ").trim().to_owned());
                }
                Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            relayed = rx.recv() => match relayed {
                Ok(first) => {
                    let mut batch = vec![first];
                    while let Ok(next) = rx.try_recv() {
                        batch.push(next);
                    }
                    if sender.send(WsMessage::Text(batch.join("\n").into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    debug!("Client left room {}", room_id);
}
