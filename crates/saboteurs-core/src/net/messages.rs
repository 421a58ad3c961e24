use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::player::PlayerId;
use crate::projection::Snapshot;
use crate::room::RoomRules;

/// Network message type discriminator (wire byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    // Client -> Server
    JoinRoom = 0x01,
    LeaveRoom = 0x02,
    GameAction = 0x03,
    StartGame = 0x04,
    ForceAdvance = 0x05,
    ResetRoom = 0x06,

    // Server -> Client
    JoinRoomResponse = 0x10,
    Snapshot = 0x11,
}

impl MessageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::JoinRoom),
            0x02 => Some(Self::LeaveRoom),
            0x03 => Some(Self::GameAction),
            0x04 => Some(Self::StartGame),
            0x05 => Some(Self::ForceAdvance),
            0x06 => Some(Self::ResetRoom),
            0x10 => Some(Self::JoinRoomResponse),
            0x11 => Some(Self::Snapshot),
            _ => None,
        }
    }
}

/// First message on every connection. An empty `room_code` creates a new
/// room; a `session_token` attempts reconnection first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRoomMsg {
    pub room_code: String,
    pub player_name: String,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub protocol_version: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LeaveRoomMsg {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameActionMsg {
    pub action: Action,
}

/// Host starts the game with the lobby's final rule selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StartGameMsg {
    pub rules: RoomRules,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ForceAdvanceMsg {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResetRoomMsg {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRoomResponseMsg {
    pub success: bool,
    pub player_id: Option<PlayerId>,
    pub room_code: Option<String>,
    pub error: Option<String>,
    pub session_token: Option<String>,
}

/// One viewer's redacted state push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMsg {
    pub snapshot: Snapshot,
}

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    JoinRoom(JoinRoomMsg),
    LeaveRoom(LeaveRoomMsg),
    GameAction(GameActionMsg),
    StartGame(StartGameMsg),
    ForceAdvance(ForceAdvanceMsg),
    ResetRoom(ResetRoomMsg),
}

/// Messages the server may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    JoinRoomResponse(JoinRoomResponseMsg),
    Snapshot(Box<SnapshotMsg>),
}
