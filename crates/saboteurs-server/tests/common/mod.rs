use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use saboteurs_core::action::Action;
use saboteurs_core::net::messages::{
    ClientMessage, GameActionMsg, JoinRoomMsg, JoinRoomResponseMsg, ServerMessage, StartGameMsg,
};
use saboteurs_core::net::protocol::{
    PROTOCOL_VERSION, decode_server_message, encode_client_message,
};
use saboteurs_core::projection::Snapshot;
use saboteurs_core::room::RoomRules;

use saboteurs_server::config::ServerConfig;
use saboteurs_server::{build_app, spawn_sweeper};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    _shutdown: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a test server on an ephemeral port with an isolated stats
    /// file.
    pub async fn new() -> Self {
        let mut config = ServerConfig::default();
        config.game.stats_path = temp_stats_path();
        Self::from_config(config).await
    }

    pub async fn from_config(config: ServerConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, state) = build_app(config).unwrap();
        spawn_sweeper(state);

        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            _shutdown: handle,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

fn temp_stats_path() -> String {
    static NEXT: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);
    let n = NEXT.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("saboteurs-it-{}", std::process::id()));
    let _ = std::fs::create_dir_all(&dir);
    dir.join(format!("{n}.json")).display().to_string()
}

/// Connect a WebSocket client to the given URL.
pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

pub async fn ws_send_client_msg(stream: &mut WsStream, msg: &ClientMessage) {
    let encoded = encode_client_message(msg).unwrap();
    stream.send(Message::Binary(encoded.into())).await.unwrap();
}

/// Read the next binary frame, with a timeout so broken tests fail fast.
pub async fn ws_read_raw(stream: &mut WsStream) -> Vec<u8> {
    let frame = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("timed out waiting for frame")
        .expect("stream closed")
        .expect("websocket error");
    match frame {
        Message::Binary(data) => data.to_vec(),
        other => panic!("Expected binary frame, got: {other:?}"),
    }
}

pub async fn ws_read_server_msg(stream: &mut WsStream) -> ServerMessage {
    let data = ws_read_raw(stream).await;
    decode_server_message(&data).expect("should decode server message")
}

/// Skip frames until a snapshot satisfying `pred` arrives.
pub async fn ws_read_snapshot_where(
    stream: &mut WsStream,
    mut pred: impl FnMut(&Snapshot) -> bool,
) -> Snapshot {
    for _ in 0..50 {
        if let ServerMessage::Snapshot(msg) = ws_read_server_msg(stream).await
            && pred(&msg.snapshot)
        {
            return msg.snapshot;
        }
    }
    panic!("no snapshot matched the predicate");
}

pub async fn ws_read_snapshot(stream: &mut WsStream) -> Snapshot {
    ws_read_snapshot_where(stream, |_| true).await
}

fn join_msg(room_code: &str, name: &str, session_token: Option<String>) -> ClientMessage {
    ClientMessage::JoinRoom(JoinRoomMsg {
        room_code: room_code.to_string(),
        player_name: name.to_string(),
        session_token,
        protocol_version: PROTOCOL_VERSION,
    })
}

/// Send a JoinRoom with empty room_code (create new room).
/// Returns (JoinRoomResponse, room_code).
pub async fn ws_create_room(stream: &mut WsStream, name: &str) -> (JoinRoomResponseMsg, String) {
    ws_send_client_msg(stream, &join_msg("", name, None)).await;
    let msg = ws_read_server_msg(stream).await;
    match msg {
        ServerMessage::JoinRoomResponse(resp) => {
            let code = resp.room_code.clone().expect("create should return a code");
            (resp, code)
        },
        other => panic!("Expected JoinRoomResponse, got: {other:?}"),
    }
}

pub async fn ws_join_room(stream: &mut WsStream, code: &str, name: &str) -> JoinRoomResponseMsg {
    ws_send_client_msg(stream, &join_msg(code, name, None)).await;
    match ws_read_server_msg(stream).await {
        ServerMessage::JoinRoomResponse(resp) => resp,
        other => panic!("Expected JoinRoomResponse, got: {other:?}"),
    }
}

pub async fn ws_reconnect(stream: &mut WsStream, token: &str) -> JoinRoomResponseMsg {
    ws_send_client_msg(stream, &join_msg("", "reconnect", Some(token.to_string()))).await;
    match ws_read_server_msg(stream).await {
        ServerMessage::JoinRoomResponse(resp) => resp,
        other => panic!("Expected JoinRoomResponse, got: {other:?}"),
    }
}

pub async fn ws_start_game(stream: &mut WsStream, rules: RoomRules) {
    ws_send_client_msg(stream, &ClientMessage::StartGame(StartGameMsg { rules })).await;
}

pub async fn ws_send_action(stream: &mut WsStream, action: Action) {
    ws_send_client_msg(stream, &ClientMessage::GameAction(GameActionMsg { action })).await;
}
