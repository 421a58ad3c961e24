use serde::{Deserialize, Serialize};

use crate::role::Role;

/// Unique identifier for a player. Stable across reconnections; the
/// transient socket identity lives in the server layer.
pub type PlayerId = u64;

/// Where a player stands in the current game. Transitions are one-way:
/// `Alive → Dead`, or any state `→ Left`. Never back to `Alive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    Alive,
    Dead,
    Left,
}

/// A participant in a room. Left players stay in the roster for history
/// and stats but are excluded from every required-ack and alive count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub status: PlayerStatus,
    pub role: Option<Role>,
    pub is_captain: bool,
    /// Symmetric bond id: `a.linked_to == Some(b)` implies
    /// `b.linked_to == Some(a)` while neither end has left.
    pub linked_to: Option<PlayerId>,
    pub connected: bool,
}

impl Player {
    pub fn new(id: PlayerId, name: String) -> Self {
        Self {
            id,
            name,
            status: PlayerStatus::Alive,
            role: None,
            is_captain: false,
            linked_to: None,
            connected: true,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.status == PlayerStatus::Alive
    }

    /// Active means "still part of the running game": alive or dead, but
    /// not gone. Viability checks count active players.
    pub fn is_active(&self) -> bool {
        self.status != PlayerStatus::Left
    }

    pub fn is_living_saboteur(&self) -> bool {
        self.is_alive() && self.role == Some(Role::Saboteur)
    }
}
