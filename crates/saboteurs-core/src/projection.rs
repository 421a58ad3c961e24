use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::log::LogEntry;
use crate::phase::{Phase, required_set};
use crate::player::{PlayerId, PlayerStatus};
use crate::role::{Faction, Role};
use crate::room::{RadarReading, Room, RoomRules};
use crate::video::{VideoPermission, permission_for};
use crate::win::Winner;

/// The redacted, viewer-specific state sent to one client. Built from
/// scratch on every broadcast; pure function of room + viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub room_code: String,
    pub host: PlayerId,
    pub rules: RoomRules,
    pub phase: Phase,
    pub prev_phase: Phase,
    pub day: u32,
    pub night: u32,
    pub started: bool,
    pub ended: bool,
    pub aborted: bool,
    pub winner: Option<Winner>,
    pub players: Vec<PlayerView>,
    pub you: YouView,
    pub teams: TeamCounts,
    pub phase_data: PhaseView,
    pub logs: Vec<LogEntry>,
    pub ack: AckSummary,
    pub video: VideoPermission,
}

/// One roster row as a given viewer is allowed to see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: PlayerId,
    pub name: String,
    pub status: PlayerStatus,
    pub connected: bool,
    pub is_captain: bool,
    pub is_host: bool,
    /// Hidden unless it is the viewer's own, the game has ended, or both
    /// sides are saboteurs.
    pub role: Option<Role>,
    /// Visible only to the two ends of the bond.
    pub linked_to: Option<PlayerId>,
}

/// The viewer's private corner of the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YouView {
    pub id: PlayerId,
    pub role: Option<Role>,
    pub linked_to: Option<PlayerId>,
    /// This night's inspection, if the viewer performed one.
    pub radar: Option<RadarReading>,
    /// The viewer's own recorded vote or pick for the current phase.
    pub your_vote: Option<PlayerId>,
    pub your_candidacy: Option<bool>,
}

/// Public starting composition of the role pool. Never living counts —
/// those would reveal what the dead were.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamCounts {
    pub saboteurs: usize,
    pub crew: usize,
}

/// Phase-scoped data after per-viewer redaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseView {
    pub candidates: Vec<PlayerId>,
    pub reason: Option<String>,
    /// Live saboteur tally; present only for living saboteurs during
    /// their night vote.
    pub saboteur_votes: Option<BTreeMap<PlayerId, PlayerId>>,
    /// Tonight's pending victim; present only for the doctor while they
    /// decide.
    pub saboteur_target: Option<PlayerId>,
    /// Deaths being shown by a results or revenge phase.
    pub deaths: Vec<PlayerId>,
    /// Remaining manual picks; public while the pick phase runs.
    pub pool_remaining: Option<BTreeMap<Role, usize>>,
}

/// Who is holding up the current phase. Deliberately public: clients show
/// it so the table knows who everyone is waiting on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckSummary {
    pub done: Vec<PlayerId>,
    pub total: usize,
    pub pending: Vec<PlayerId>,
}

/// Builds the snapshot `viewer` is entitled to. Returns `None` when the
/// viewer is not part of the room.
pub fn project(room: &Room, viewer: PlayerId) -> Option<Snapshot> {
    let me = room.player(viewer)?;
    let reveal_all = room.ended || room.aborted;
    let viewer_is_saboteur = me.role == Some(Role::Saboteur);

    let players = room
        .players
        .values()
        .map(|p| {
            let role_visible = p.id == viewer
                || reveal_all
                || (viewer_is_saboteur && p.role == Some(Role::Saboteur));
            let link_visible =
                reveal_all || p.id == viewer || p.linked_to == Some(viewer);
            PlayerView {
                id: p.id,
                name: p.name.clone(),
                status: p.status,
                connected: p.connected,
                is_captain: p.is_captain,
                is_host: p.id == room.host,
                role: if role_visible { p.role } else { None },
                linked_to: if link_visible { p.linked_to } else { None },
            }
        })
        .collect();

    let you = YouView {
        id: viewer,
        role: me.role,
        linked_to: me.linked_to,
        radar: room
            .night_record
            .radar
            .filter(|r| r.inspector == viewer),
        your_vote: room.phase_data.votes.get(&viewer).copied(),
        your_candidacy: room.phase_data.candidacy.get(&viewer).copied(),
    };

    let required = required_set(room);
    let done: Vec<PlayerId> = required
        .iter()
        .copied()
        .filter(|id| room.phase_ack.contains(id))
        .collect();
    let pending: Vec<PlayerId> = required
        .iter()
        .copied()
        .filter(|id| !room.phase_ack.contains(id))
        .collect();
    let ack = AckSummary {
        total: required.len(),
        done,
        pending,
    };

    let saboteur_votes = (room.phase == Phase::NightSaboteurs
        && me.is_living_saboteur())
    .then(|| room.phase_data.votes.clone());
    let saboteur_target = (room.phase == Phase::NightDoctor
        && me.is_alive()
        && me.role == Some(Role::Doctor))
    .then_some(room.night_record.saboteur_target)
    .flatten();
    let deaths = match room.phase {
        Phase::Revenge
        | Phase::NightResults
        | Phase::DayResults
        | Phase::GameOver
        | Phase::GameAborted => room.last_deaths.clone(),
        _ => Vec::new(),
    };

    let phase_data = PhaseView {
        candidates: room.phase_data.candidates.clone(),
        reason: room.phase_data.reason.clone(),
        saboteur_votes,
        saboteur_target,
        deaths,
        pool_remaining: room.pool.as_ref().map(|p| p.counts().clone()),
    };

    Some(Snapshot {
        room_code: room.code.clone(),
        host: room.host,
        rules: room.rules,
        phase: room.phase,
        prev_phase: room.prev_phase,
        day: room.day,
        night: room.night,
        started: room.started,
        ended: room.ended,
        aborted: room.aborted,
        winner: room.winner,
        players,
        you,
        teams: team_counts(room),
        phase_data,
        logs: room.log.to_vec(),
        ack,
        video: permission_for(room, viewer),
    })
}

/// Starting pool composition. Stable across swaps and deaths because
/// roles stay attached to players whatever their status.
fn team_counts(room: &Room) -> TeamCounts {
    let mut counts = TeamCounts::default();
    for p in room.players.values() {
        match p.role.map(Role::faction) {
            Some(Faction::Saboteurs) => counts.saboteurs += 1,
            Some(Faction::Crew) => counts.crew += 1,
            None => {},
        }
    }
    counts
}
