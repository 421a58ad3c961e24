use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use saboteurs_core::action::Action;
use saboteurs_core::engine::PhaseEngine;
use saboteurs_core::net::messages::{JoinRoomResponseMsg, ServerMessage, SnapshotMsg};
use saboteurs_core::net::protocol::encode_server_message;
use saboteurs_core::phase::Phase;
use saboteurs_core::player::{Player, PlayerId};
use saboteurs_core::projection::project;
use saboteurs_core::room::{Room, RoomRules, generate_room_code};

use crate::config::ServerConfig;
use crate::stats::StatsStore;

/// Per-player sender for outbound WebSocket binary messages.
/// Bounded to keep a slow client from exhausting memory.
/// Uses `Bytes` for zero-copy cloning.
pub type PlayerSender = mpsc::Sender<Bytes>;

/// Session record for reconnection. When a player disconnects mid-game,
/// their seat is preserved so they can rejoin within the grace window.
struct DisconnectedSession {
    room_code: String,
    player_id: PlayerId,
    disconnected_at: Instant,
}

struct RoomEntry {
    room: Room,
    connections: HashMap<PlayerId, PlayerSender>,
    /// Maps player_id → session_token for connected players.
    player_sessions: HashMap<PlayerId, String>,
    /// When each currently-disconnected player dropped off.
    disconnected_at: HashMap<PlayerId, Instant>,
    last_activity: Instant,
    stats_recorded: bool,
}

/// Owns every active room and serializes all mutations to them: callers
/// hold the registry's write lock, so events within a room are processed
/// strictly in arrival order and no two actions ever race.
pub struct RoomRegistry {
    rooms: HashMap<String, RoomEntry>,
    next_player_id: PlayerId,
    /// Maps session_token → disconnected session info.
    sessions: HashMap<String, DisconnectedSession>,
    engine: PhaseEngine,
    stats: StatsStore,
    grace_period: Duration,
    idle_timeout: Duration,
}

impl RoomRegistry {
    pub fn new(config: &ServerConfig, stats: StatsStore) -> Self {
        Self {
            rooms: HashMap::new(),
            next_player_id: 1,
            sessions: HashMap::new(),
            engine: PhaseEngine::new(config.engine_rules()),
            stats,
            grace_period: Duration::from_secs(config.rooms.grace_period_secs),
            idle_timeout: Duration::from_secs(config.rooms.idle_timeout_secs),
        }
    }

    fn alloc_player_id(&mut self) -> PlayerId {
        let id = self.next_player_id;
        self.next_player_id += 1;
        id
    }

    fn generate_session_token() -> String {
        Uuid::new_v4().to_string()
    }

    /// Create a new room. Returns (room_code, player_id, session_token)
    /// for the host.
    pub fn create_room(&mut self, player_name: String, sender: PlayerSender) -> (String, PlayerId, String) {
        let mut rng = rand::rng();
        let code = loop {
            let candidate = generate_room_code(&mut rng);
            if !self.rooms.contains_key(&candidate) {
                break candidate;
            }
        };
        let player_id = self.alloc_player_id();
        let session_token = Self::generate_session_token();
        let room = Room::new(code.clone(), Player::new(player_id, player_name));
        let mut connections = HashMap::new();
        connections.insert(player_id, sender);
        let mut player_sessions = HashMap::new();
        player_sessions.insert(player_id, session_token.clone());
        self.rooms.insert(
            code.clone(),
            RoomEntry {
                room,
                connections,
                player_sessions,
                disconnected_at: HashMap::new(),
                last_activity: Instant::now(),
                stats_recorded: false,
            },
        );
        self.broadcast(&code);
        (code, player_id, session_token)
    }

    /// Join an existing room from the lobby. Returns Ok((player_id,
    /// session_token)) or Err(reason).
    pub fn join_room(
        &mut self,
        room_code: &str,
        player_name: String,
        sender: PlayerSender,
    ) -> Result<(PlayerId, String), String> {
        {
            let entry = self
                .rooms
                .get(room_code)
                .ok_or_else(|| "Room not found".to_string())?;
            if entry.room.started {
                return Err("Game already in progress".to_string());
            }
            let taken = entry
                .room
                .players
                .values()
                .any(|p| p.name.eq_ignore_ascii_case(&player_name));
            if taken {
                return Err("Name already taken in this room".to_string());
            }
        }

        let player_id = self.alloc_player_id();
        let session_token = Self::generate_session_token();
        let Some(entry) = self.rooms.get_mut(room_code) else {
            return Err("Room not found".to_string());
        };
        entry
            .room
            .add_player(Player::new(player_id, player_name))?;
        entry.connections.insert(player_id, sender);
        entry
            .player_sessions
            .insert(player_id, session_token.clone());
        entry.last_activity = Instant::now();
        self.broadcast(room_code);
        Ok((player_id, session_token))
    }

    /// Attempt to reconnect with a session token. Returns
    /// Ok((room_code, player_id, new_session_token)) on success.
    pub fn reconnect(
        &mut self,
        session_token: &str,
        sender: PlayerSender,
    ) -> Result<(String, PlayerId, String), String> {
        let session = self
            .sessions
            .remove(session_token)
            .ok_or_else(|| "Invalid or expired session".to_string())?;

        if session.disconnected_at.elapsed() > self.grace_period {
            return Err("Session expired".to_string());
        }

        let entry = self
            .rooms
            .get_mut(&session.room_code)
            .ok_or_else(|| "Room no longer exists".to_string())?;

        let seat_open = entry
            .room
            .player(session.player_id)
            .is_some_and(|p| p.is_active());
        if !seat_open {
            return Err("Player slot no longer available".to_string());
        }

        let new_token = Self::generate_session_token();
        entry.connections.insert(session.player_id, sender);
        entry
            .player_sessions
            .insert(session.player_id, new_token.clone());
        entry.disconnected_at.remove(&session.player_id);
        if let Some(p) = entry.room.player_mut(session.player_id) {
            p.connected = true;
        }
        entry.last_activity = Instant::now();
        let code = session.room_code.clone();
        self.broadcast(&code);
        Ok((session.room_code, session.player_id, new_token))
    }

    /// The WebSocket dropped. Mid-game the seat survives for the grace
    /// window; in the lobby (or a finished game) the player is gone.
    pub fn disconnect(&mut self, room_code: &str, player_id: PlayerId) {
        let Some(entry) = self.rooms.get_mut(room_code) else {
            return;
        };
        entry.connections.remove(&player_id);

        let keep_seat = entry.room.accepting_actions();
        if keep_seat {
            if let Some(p) = entry.room.player_mut(player_id) {
                p.connected = false;
            }
            entry.disconnected_at.insert(player_id, Instant::now());
            if let Some(token) = entry.player_sessions.remove(&player_id) {
                self.sessions.insert(
                    token,
                    DisconnectedSession {
                        room_code: room_code.to_string(),
                        player_id,
                        disconnected_at: Instant::now(),
                    },
                );
            }
            tracing::info!(
                player_id,
                room = room_code,
                "Player disconnected mid-game, seat preserved"
            );
            self.after_mutation(room_code);
            return;
        }

        self.remove_for_good(room_code, player_id);
    }

    /// Explicit leave: no grace, no session.
    pub fn leave_room(&mut self, room_code: &str, player_id: PlayerId) {
        let Some(entry) = self.rooms.get_mut(room_code) else {
            return;
        };
        entry.connections.remove(&player_id);
        entry.player_sessions.remove(&player_id);
        entry.disconnected_at.remove(&player_id);
        self.remove_for_good(room_code, player_id);
    }

    fn remove_for_good(&mut self, room_code: &str, player_id: PlayerId) {
        let Some(entry) = self.rooms.get_mut(room_code) else {
            return;
        };
        entry.player_sessions.remove(&player_id);
        let mut rng = rand::rng();
        self.engine.player_left(&mut entry.room, player_id, &mut rng);

        if entry.room.players.is_empty()
            || (entry.connections.is_empty() && entry.disconnected_at.is_empty())
        {
            // Nobody left to talk to and nobody coming back.
            self.rooms.remove(room_code);
            self.sessions.retain(|_, s| s.room_code != room_code);
            tracing::info!(room = room_code, "Room destroyed");
            return;
        }
        self.after_mutation(room_code);
    }

    /// Route a validated game action into the engine.
    pub fn handle_action(&mut self, room_code: &str, player_id: PlayerId, action: Action) {
        let Some(entry) = self.rooms.get_mut(room_code) else {
            return;
        };
        entry.last_activity = Instant::now();
        let mut rng = rand::rng();
        match self.engine.apply(&mut entry.room, player_id, action, &mut rng) {
            Ok(()) => self.after_mutation(room_code),
            // Invalid actions are silent no-ops by contract.
            Err(rejection) => {
                tracing::debug!(player_id, room = room_code, %rejection, "Action rejected");
            },
        }
    }

    pub fn start_game(&mut self, room_code: &str, player_id: PlayerId, rules: RoomRules) {
        let Some(entry) = self.rooms.get_mut(room_code) else {
            return;
        };
        entry.last_activity = Instant::now();
        entry.stats_recorded = false;
        let mut rng = rand::rng();
        match self
            .engine
            .start_game(&mut entry.room, player_id, rules, &mut rng)
        {
            Ok(()) => {
                tracing::info!(room = room_code, player_id, "Game started");
                self.after_mutation(room_code);
            },
            Err(rejection) => {
                tracing::warn!(player_id, room = room_code, %rejection, "Start refused");
            },
        }
    }

    pub fn force_advance(&mut self, room_code: &str, player_id: PlayerId) {
        let Some(entry) = self.rooms.get_mut(room_code) else {
            return;
        };
        entry.last_activity = Instant::now();
        let mut rng = rand::rng();
        match self
            .engine
            .force_advance(&mut entry.room, player_id, &mut rng)
        {
            Ok(()) => self.after_mutation(room_code),
            Err(rejection) => {
                tracing::debug!(player_id, room = room_code, %rejection, "Force refused");
            },
        }
    }

    pub fn reset_room(&mut self, room_code: &str, player_id: PlayerId) {
        let Some(entry) = self.rooms.get_mut(room_code) else {
            return;
        };
        entry.last_activity = Instant::now();
        match self.engine.reset(&mut entry.room, player_id) {
            Ok(()) => {
                entry.stats_recorded = false;
                // Seats of departed players are gone with the reset.
                let roster: Vec<PlayerId> = entry.room.players.keys().copied().collect();
                entry.connections.retain(|id, _| roster.contains(id));
                entry.player_sessions.retain(|id, _| roster.contains(id));
                tracing::info!(room = room_code, "Room reset");
                self.after_mutation(room_code);
            },
            Err(rejection) => {
                tracing::debug!(player_id, room = room_code, %rejection, "Reset refused");
            },
        }
    }

    /// Post-mutation bookkeeping: one-shot stats recording at game end,
    /// then fresh snapshots for everyone.
    fn after_mutation(&mut self, room_code: &str) {
        if let Some(entry) = self.rooms.get_mut(room_code)
            && entry.room.ended
            && !entry.stats_recorded
        {
            entry.stats_recorded = true;
            self.stats.record_game(&entry.room);
            if let Err(e) = self.stats.save() {
                tracing::warn!(room = room_code, error = %e, "Failed to persist stats");
            }
        }
        self.broadcast(room_code);
    }

    /// Push every connected player their own redacted snapshot.
    pub fn broadcast(&self, room_code: &str) {
        let Some(entry) = self.rooms.get(room_code) else {
            return;
        };
        for (&player_id, sender) in &entry.connections {
            let Some(snapshot) = project(&entry.room, player_id) else {
                continue;
            };
            let msg = ServerMessage::Snapshot(Box::new(SnapshotMsg { snapshot }));
            match encode_server_message(&msg) {
                Ok(data) => {
                    if sender.try_send(Bytes::from(data)).is_err() {
                        tracing::debug!(
                            player_id,
                            room = room_code,
                            "Skipping snapshot to slow client"
                        );
                    }
                },
                Err(e) => tracing::error!(player_id, room = room_code, error = %e, "Encode failed"),
            }
        }
    }

    /// Periodic cleanup: expire sessions, promote over-grace players to
    /// Left, and drop idle rooms.
    pub fn sweep(&mut self) {
        let grace = self.grace_period;
        self.sessions
            .retain(|_, s| s.disconnected_at.elapsed() <= grace);

        let mut overdue: Vec<(String, PlayerId)> = Vec::new();
        for (code, entry) in &self.rooms {
            for (&player_id, &at) in &entry.disconnected_at {
                if at.elapsed() > grace {
                    overdue.push((code.clone(), player_id));
                }
            }
        }
        for (code, player_id) in overdue {
            tracing::info!(player_id, room = %code, "Reconnection grace expired");
            if let Some(entry) = self.rooms.get_mut(&code) {
                entry.disconnected_at.remove(&player_id);
            }
            self.remove_for_good(&code, player_id);
        }

        let idle = self.idle_timeout;
        let before = self.rooms.len();
        self.rooms
            .retain(|_, entry| entry.last_activity.elapsed() < idle);
        let dropped = before - self.rooms.len();
        if dropped > 0 {
            tracing::info!(dropped, "Removed idle rooms");
        }
    }

    /// (active rooms, players across them) for the health endpoint.
    pub fn stats_summary(&self) -> (usize, usize) {
        let players = self
            .rooms
            .values()
            .map(|e| e.room.players.len())
            .sum();
        (self.rooms.len(), players)
    }

    pub fn room_phase(&self, room_code: &str) -> Option<Phase> {
        self.rooms.get(room_code).map(|e| e.room.phase)
    }

    #[cfg(test)]
    pub fn room_exists(&self, room_code: &str) -> bool {
        self.rooms.contains_key(room_code)
    }

    #[cfg(test)]
    pub fn room(&self, room_code: &str) -> Option<&Room> {
        self.rooms.get(room_code).map(|e| &e.room)
    }

    /// Build a JoinRoomResponse success message.
    pub fn make_join_response(
        player_id: PlayerId,
        room_code: &str,
        session_token: &str,
    ) -> Result<Vec<u8>, saboteurs_core::net::protocol::ProtocolError> {
        let msg = ServerMessage::JoinRoomResponse(JoinRoomResponseMsg {
            success: true,
            player_id: Some(player_id),
            room_code: Some(room_code.to_string()),
            error: None,
            session_token: Some(session_token.to_string()),
        });
        encode_server_message(&msg)
    }

    /// Build a JoinRoomResponse error message.
    pub fn make_join_error(
        error: &str,
    ) -> Result<Vec<u8>, saboteurs_core::net::protocol::ProtocolError> {
        let msg = ServerMessage::JoinRoomResponse(JoinRoomResponseMsg {
            success: false,
            player_id: None,
            room_code: None,
            error: Some(error.to_string()),
            session_token: None,
        });
        encode_server_message(&msg)
    }
}
