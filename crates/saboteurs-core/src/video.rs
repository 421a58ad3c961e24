use serde::{Deserialize, Serialize};

use crate::phase::required_set;
use crate::player::{PlayerId, PlayerStatus};
use crate::room::Room;

/// Why a camera/microphone is in its current state. Serialized as a plain
/// string for the conferencing SDK binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VideoReason {
    Open,
    Eliminated,
    Left,
    Asleep,
    NightAction,
}

/// What a player's video-chat client should do with its own camera and
/// microphone. Recomputed on every phase change and shipped in the
/// player's snapshot; the conferencing SDK binding enforces it locally —
/// there is no server-side enforcement beyond this signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoPermission {
    pub video: bool,
    pub audio: bool,
    pub reason: VideoReason,
}

impl VideoPermission {
    fn dark(reason: VideoReason) -> Self {
        Self {
            video: false,
            audio: false,
            reason,
        }
    }

    fn open() -> Self {
        Self {
            video: true,
            audio: true,
            reason: VideoReason::Open,
        }
    }
}

/// Permission tuple for one player given the current room state.
pub fn permission_for(room: &Room, id: PlayerId) -> VideoPermission {
    let Some(player) = room.player(id) else {
        return VideoPermission::dark(VideoReason::Left);
    };
    match player.status {
        PlayerStatus::Left => return VideoPermission::dark(VideoReason::Left),
        PlayerStatus::Dead if !room.phase.is_terminal() => {
            return VideoPermission::dark(VideoReason::Eliminated);
        },
        _ => {},
    }
    if !room.started || room.phase.is_terminal() {
        return VideoPermission::open();
    }
    if room.phase.is_night() {
        // Actors get a distinct reason so the client can prompt them
        // without lighting anyone up.
        if required_set(room).contains(&id) {
            return VideoPermission::dark(VideoReason::NightAction);
        }
        return VideoPermission::dark(VideoReason::Asleep);
    }
    VideoPermission::open()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Phase;
    use crate::player::Player;
    use crate::role::Role;

    fn running_room(phase: Phase) -> Room {
        let mut room = Room::new("TEST-0001".into(), Player::new(1, "P1".into()));
        for i in 2..=5 {
            room.add_player(Player::new(i, format!("P{i}"))).unwrap();
        }
        room.started = true;
        room.phase = phase;
        room
    }

    #[test]
    fn lobby_is_open() {
        let mut room = running_room(Phase::Lobby);
        room.started = false;
        let p = permission_for(&room, 1);
        assert!(p.video && p.audio);
    }

    #[test]
    fn day_is_open_night_is_dark() {
        let room = running_room(Phase::DayVote);
        assert!(permission_for(&room, 1).video);

        let room = running_room(Phase::NightStart);
        let p = permission_for(&room, 1);
        assert!(!p.video && !p.audio);
    }

    #[test]
    fn dead_players_stay_dark_until_game_over() {
        let mut room = running_room(Phase::DayVote);
        room.player_mut(2).unwrap().status = PlayerStatus::Dead;
        assert_eq!(permission_for(&room, 2).reason, VideoReason::Eliminated);

        room.phase = Phase::GameOver;
        room.ended = true;
        assert!(permission_for(&room, 2).video);
    }

    #[test]
    fn night_actor_gets_distinct_reason() {
        let mut room = running_room(Phase::NightSaboteurs);
        room.player_mut(1).unwrap().role = Some(Role::Saboteur);
        for i in 2..=5 {
            room.player_mut(i).unwrap().role = Some(Role::Crewmate);
        }
        assert_eq!(permission_for(&room, 1).reason, VideoReason::NightAction);
        assert_eq!(permission_for(&room, 2).reason, VideoReason::Asleep);
    }

    #[test]
    fn reason_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&VideoReason::NightAction).unwrap(),
            "\"night-action\""
        );
    }
}
