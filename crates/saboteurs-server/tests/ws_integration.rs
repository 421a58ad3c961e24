#[allow(dead_code)]
mod common;

use saboteurs_core::action::Action;
use saboteurs_core::phase::Phase;
use saboteurs_core::room::RoomRules;

use common::{
    TestServer, ws_connect, ws_create_room, ws_join_room, ws_read_snapshot,
    ws_read_snapshot_where, ws_reconnect, ws_send_action, ws_start_game,
};

#[tokio::test]
async fn create_room_responds_and_snapshots() {
    let server = TestServer::new().await;
    let mut stream = ws_connect(&server.ws_url()).await;

    let (resp, code) = ws_create_room(&mut stream, "Alice").await;
    assert!(resp.success);
    assert_eq!(resp.player_id, Some(1));
    assert!(resp.session_token.is_some());
    // Room code format: ABCD-1234
    assert_eq!(code.len(), 9);
    assert_eq!(&code[4..5], "-");

    let snapshot = ws_read_snapshot(&mut stream).await;
    assert_eq!(snapshot.room_code, code);
    assert_eq!(snapshot.players.len(), 1);
    assert_eq!(snapshot.players[0].name, "Alice");
    assert!(snapshot.players[0].is_host);
    assert_eq!(snapshot.phase, Phase::Lobby);
}

#[tokio::test]
async fn joining_updates_everyone() {
    let server = TestServer::new().await;

    let mut host = ws_connect(&server.ws_url()).await;
    let (_, code) = ws_create_room(&mut host, "Alice").await;

    let mut client = ws_connect(&server.ws_url()).await;
    let resp = ws_join_room(&mut client, &code, "Bob").await;
    assert!(resp.success);
    assert_eq!(resp.player_id, Some(2));

    let host_view = ws_read_snapshot_where(&mut host, |s| s.players.len() == 2).await;
    assert_eq!(host_view.players[1].name, "Bob");
    let client_view = ws_read_snapshot_where(&mut client, |s| s.players.len() == 2).await;
    assert_eq!(client_view.you.id, 2);
}

#[tokio::test]
async fn join_nonexistent_room_fails() {
    let server = TestServer::new().await;
    let mut stream = ws_connect(&server.ws_url()).await;
    let resp = ws_join_room(&mut stream, "ZZZZ-9999", "Bob").await;
    assert!(!resp.success);
    assert!(resp.error.is_some());
}

#[tokio::test]
async fn start_game_deals_hidden_roles() {
    let server = TestServer::new().await;

    let mut host = ws_connect(&server.ws_url()).await;
    let (_, code) = ws_create_room(&mut host, "Alice").await;

    let mut others = Vec::new();
    for name in ["Bob", "Cleo", "Dana", "Eve", "Finn"] {
        let mut stream = ws_connect(&server.ws_url()).await;
        let resp = ws_join_room(&mut stream, &code, name).await;
        assert!(resp.success);
        others.push(stream);
    }

    ws_start_game(&mut host, RoomRules::default()).await;
    let started = ws_read_snapshot_where(&mut host, |s| s.started).await;
    assert_eq!(started.phase, Phase::RoleReveal);
    assert!(started.you.role.is_some());
    assert_eq!(started.teams.saboteurs, 1);
    assert_eq!(started.teams.crew, 5);

    // Projection secrecy over the wire: nobody sees another crew role.
    for stream in &mut others {
        let view = ws_read_snapshot_where(stream, |s| s.started).await;
        let own_role = view.you.role.expect("everyone holds a role");
        for player in &view.players {
            if player.id != view.you.id
                && player.role.is_some()
            {
                // Only fellow saboteurs may be visible.
                assert_eq!(own_role, saboteurs_core::role::Role::Saboteur);
                assert_eq!(player.role, Some(saboteurs_core::role::Role::Saboteur));
            }
        }
    }
}

#[tokio::test]
async fn acks_advance_the_phase_for_all() {
    let server = TestServer::new().await;

    let mut host = ws_connect(&server.ws_url()).await;
    let (_, code) = ws_create_room(&mut host, "Alice").await;

    let mut others = Vec::new();
    for name in ["Bob", "Cleo", "Dana"] {
        let mut stream = ws_connect(&server.ws_url()).await;
        ws_join_room(&mut stream, &code, name).await;
        others.push(stream);
    }

    ws_start_game(&mut host, RoomRules::default()).await;
    ws_read_snapshot_where(&mut host, |s| s.phase == Phase::RoleReveal).await;

    ws_send_action(&mut host, Action::Ack).await;
    let partial = ws_read_snapshot_where(&mut host, |s| s.ack.done.contains(&1)).await;
    assert_eq!(partial.phase, Phase::RoleReveal);
    assert_eq!(partial.ack.total, 4);

    for stream in &mut others {
        ws_send_action(stream, Action::Ack).await;
    }
    let advanced =
        ws_read_snapshot_where(&mut host, |s| s.phase == Phase::CaptainCandidacy).await;
    assert!(advanced.ack.done.is_empty());
}

#[tokio::test]
async fn session_token_reconnects_mid_game() {
    let server = TestServer::new().await;

    let mut host = ws_connect(&server.ws_url()).await;
    let (_, code) = ws_create_room(&mut host, "Alice").await;

    let mut others = Vec::new();
    let mut bob_token = None;
    for name in ["Bob", "Cleo", "Dana"] {
        let mut stream = ws_connect(&server.ws_url()).await;
        let resp = ws_join_room(&mut stream, &code, name).await;
        if name == "Bob" {
            bob_token = resp.session_token.clone();
        }
        others.push(stream);
    }

    ws_start_game(&mut host, RoomRules::default()).await;
    ws_read_snapshot_where(&mut host, |s| s.started).await;

    // Bob's socket dies mid-game.
    let bob = others.remove(0);
    drop(bob);
    let gone = ws_read_snapshot_where(&mut host, |s| {
        s.players.iter().any(|p| p.id == 2 && !p.connected)
    })
    .await;
    assert_eq!(gone.players.iter().filter(|p| p.connected).count(), 3);

    // The seat comes back through the session token.
    let mut bob2 = ws_connect(&server.ws_url()).await;
    let resp = ws_reconnect(&mut bob2, &bob_token.expect("join returns a token")).await;
    assert!(resp.success, "reconnect failed: {:?}", resp.error);
    assert_eq!(resp.player_id, Some(2));

    let view = ws_read_snapshot_where(&mut bob2, |s| s.you.id == 2).await;
    assert!(view.started);
}

#[tokio::test]
async fn health_endpoint_reports_rooms() {
    let server = TestServer::new().await;
    let mut stream = ws_connect(&server.ws_url()).await;
    let _ = ws_create_room(&mut stream, "Alice").await;

    let body = tokio::task::spawn_blocking({
        let url = format!("{}/health", server.base_url());
        move || http_get(&url)
    })
    .await
    .unwrap();
    assert!(body.contains("\"healthy\""));
    assert!(body.contains("\"active\":1"));
}

/// Minimal blocking HTTP GET over a std TcpStream, keeping dev-deps small.
fn http_get(url: &str) -> String {
    use std::io::{Read, Write};
    let rest = url.strip_prefix("http://").expect("http url");
    let (addr, path) = rest.split_once('/').unwrap_or((rest, ""));
    let mut stream = std::net::TcpStream::connect(addr).expect("connect");
    write!(
        stream,
        "GET /{path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n"
    )
    .expect("write request");
    let mut response = String::new();
    stream.read_to_string(&mut response).expect("read response");
    response
}
