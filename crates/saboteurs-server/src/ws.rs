use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ConnectInfo;
use axum::extract::FromRequest;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;

use saboteurs_core::net::messages::{ClientMessage, JoinRoomMsg, MessageType};
use saboteurs_core::net::protocol::{
    MAX_MESSAGE_SIZE, PROTOCOL_VERSION, decode_client_message, decode_message_type,
};
use saboteurs_core::player::PlayerId;
use saboteurs_core::room::is_valid_room_code;

use crate::registry::RoomRegistry;
use crate::state::{AppState, ConnectionGuard, IpConnectionGuard};

pub async fn ws_handler(
    State(state): State<AppState>,
    request: axum::extract::Request,
) -> Result<axum::response::Response, StatusCode> {
    let max_ws = state.config.limits.max_ws_connections;
    let current = state.ws_connection_count.load(Ordering::Relaxed);
    if current >= max_ws {
        tracing::warn!(current, max = max_ws, "WS connection limit reached");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    // Per-IP connection limit
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
    let max_per_ip = state.config.limits.max_ws_per_ip;
    let Some(ip_guard) = IpConnectionGuard::try_acquire(ip, Arc::clone(&state.ws_per_ip), max_per_ip)
    else {
        tracing::warn!(%ip, max_per_ip, "Per-IP WS connection limit reached");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    };

    let ws = WebSocketUpgrade::from_request(request, &state)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state, ip_guard))
        .into_response())
}

async fn handle_socket(socket: WebSocket, state: AppState, _ip_guard: IpConnectionGuard) {
    let _guard = ConnectionGuard::new(Arc::clone(&state.ws_connection_count));
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // The first message must be a JoinRoom.
    let first_msg = match ws_receiver.next().await {
        Some(Ok(Message::Binary(data))) => data,
        _ => return,
    };

    let Ok(client_msg) = decode_client_message(&first_msg) else {
        return;
    };
    let ClientMessage::JoinRoom(join) = client_msg else {
        return;
    };

    if join.protocol_version != 0 && join.protocol_version != PROTOCOL_VERSION {
        send_join_error(
            &mut ws_sender,
            &format!(
                "Protocol version mismatch: client={}, server={}",
                join.protocol_version, PROTOCOL_VERSION
            ),
        )
        .await;
        return;
    }

    let result = match attempt_join(&join, &state).await {
        Some(r) => r,
        None => {
            send_join_error(&mut ws_sender, "Invalid player name").await;
            return;
        },
    };

    let (room_code, player_id, rx) = match result {
        JoinResult::Success {
            room_code,
            player_id,
            session_token,
            rx,
        } => {
            let Ok(response) =
                RoomRegistry::make_join_response(player_id, &room_code, &session_token)
            else {
                tracing::warn!("Failed to encode JoinRoomResponse");
                return;
            };
            if ws_sender
                .send(Message::Binary(response.into()))
                .await
                .is_err()
            {
                return;
            }
            (room_code, player_id, rx)
        },
        JoinResult::Error(err) => {
            send_join_error(&mut ws_sender, &err).await;
            return;
        },
    };

    spawn_writer(ws_sender, rx);

    let explicit_leave = read_loop(&mut ws_receiver, &state, &room_code, player_id).await;

    // Socket gone: either a clean leave or a grace-tracked disconnect.
    {
        let mut registry = state.registry.write().await;
        if explicit_leave {
            registry.leave_room(&room_code, player_id);
        } else {
            registry.disconnect(&room_code, player_id);
        }
    }

    tracing::info!(player_id, room_code = %room_code, "Player connection closed");
}

enum JoinResult {
    Success {
        room_code: String,
        player_id: PlayerId,
        session_token: String,
        rx: mpsc::Receiver<Bytes>,
    },
    Error(String),
}

async fn attempt_join(join: &JoinRoomMsg, state: &AppState) -> Option<JoinResult> {
    // Session-based reconnection first.
    if let Some(ref token) = join.session_token {
        let (tx, rx) = mpsc::channel::<Bytes>(state.config.limits.player_message_buffer);
        let mut registry = state.registry.write().await;
        match registry.reconnect(token, tx) {
            Ok((code, pid, new_token)) => {
                drop(registry);
                tracing::info!(player_id = pid, room = %code, "Player reconnected via session");
                return Some(JoinResult::Success {
                    room_code: code,
                    player_id: pid,
                    session_token: new_token,
                    rx,
                });
            },
            Err(e) => {
                drop(registry);
                tracing::debug!(error = %e, "Session reconnect failed, trying normal join");
            },
        }
    }

    let (tx, rx) = mpsc::channel::<Bytes>(state.config.limits.player_message_buffer);

    let name = join.player_name.trim().to_string();
    if name.is_empty() || name.len() > 32 || name.chars().any(|c| c.is_control()) {
        return None; // signals name validation failure
    }

    let mut registry = state.registry.write().await;

    if join.room_code.is_empty() {
        let (code, pid, token) = registry.create_room(name, tx);
        drop(registry);
        Some(JoinResult::Success {
            room_code: code,
            player_id: pid,
            session_token: token,
            rx,
        })
    } else {
        if !is_valid_room_code(&join.room_code) {
            return Some(JoinResult::Error("Invalid room code".to_string()));
        }
        match registry.join_room(&join.room_code, name, tx) {
            Ok((pid, token)) => Some(JoinResult::Success {
                room_code: join.room_code.clone(),
                player_id: pid,
                session_token: token,
                rx,
            }),
            Err(err) => Some(JoinResult::Error(err)),
        }
    }
}

async fn send_join_error(
    ws_sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    error: &str,
) {
    if let Ok(response) = RoomRegistry::make_join_error(error)
        && let Err(e) = ws_sender.send(Message::Binary(response.into())).await
    {
        tracing::warn!(error = %e, "Failed to send join error response");
    }
}

fn spawn_writer(
    mut ws_sender: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Bytes>,
) {
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if ws_sender.send(Message::Binary(data)).await.is_err() {
                break;
            }
        }
    });
}

/// Per-connection rate limiter (token bucket).
struct RateLimiter {
    tokens: f64,
    last_refill: tokio::time::Instant,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
}

impl RateLimiter {
    fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            tokens: max_tokens,
            last_refill: tokio::time::Instant::now(),
            max_tokens,
            refill_rate,
        }
    }

    /// Returns true if the message is allowed; false if rate-limited.
    fn allow(&mut self) -> bool {
        let now = tokio::time::Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Relay incoming messages until the socket closes. Returns true when
/// the client left explicitly (no reconnection grace).
async fn read_loop(
    ws_receiver: &mut futures::stream::SplitStream<WebSocket>,
    state: &AppState,
    room_code: &str,
    player_id: PlayerId,
) -> bool {
    let rate = state.config.limits.ws_rate_limit_per_sec;
    let mut rate_limiter = RateLimiter::new(rate, rate);

    while let Some(Ok(msg)) = ws_receiver.next().await {
        let data = match msg {
            Message::Binary(d) => d,
            Message::Close(_) => break,
            _ => continue,
        };

        if !rate_limiter.allow() {
            tracing::warn!(player_id, room_code, "Rate limited");
            continue;
        }

        if data.is_empty() || data.len() > MAX_MESSAGE_SIZE {
            continue;
        }

        let msg_type = match decode_message_type(&data) {
            Ok(t) => t,
            Err(_) => continue,
        };

        // Server-authoritative: snapshots and join responses never come
        // from clients.
        if matches!(msg_type, MessageType::Snapshot | MessageType::JoinRoomResponse) {
            tracing::warn!(
                player_id,
                room_code,
                ?msg_type,
                "Rejected server-only message from client"
            );
            continue;
        }

        let decoded = match decode_client_message(&data) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(player_id, room_code, error = %e, "Malformed message");
                continue;
            },
        };

        match decoded {
            ClientMessage::JoinRoom(_) => {
                // Already joined on this connection.
            },
            ClientMessage::LeaveRoom(_) => return true,
            ClientMessage::GameAction(msg) => {
                let mut registry = state.registry.write().await;
                registry.handle_action(room_code, player_id, msg.action);
            },
            ClientMessage::StartGame(msg) => {
                let mut registry = state.registry.write().await;
                registry.start_game(room_code, player_id, msg.rules);
            },
            ClientMessage::ForceAdvance(_) => {
                let mut registry = state.registry.write().await;
                registry.force_advance(room_code, player_id);
            },
            ClientMessage::ResetRoom(_) => {
                let mut registry = state.registry.write().await;
                registry.reset_room(room_code, player_id);
            },
        }
    }
    false
}
