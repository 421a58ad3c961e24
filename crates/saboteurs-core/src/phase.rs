use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::player::PlayerId;
use crate::role::Role;
use crate::room::Room;

/// The room's state machine. Flow is one-directional; the only loops are
/// the captain-vote revote (restricted to the tied subset), the chameleon's
/// forced second role reveal, and the night/day cycle itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Lobby,
    ManualRolePick,
    RoleReveal,
    CaptainCandidacy,
    CaptainVote,
    NightStart,
    NightChameleon,
    NightAiAgent,
    NightAiExchange,
    NightRadar,
    NightSaboteurs,
    NightDoctor,
    Revenge,
    NightResults,
    DayWake,
    DayCaptainTransfer,
    DayVote,
    DayTiebreak,
    DayResults,
    GameOver,
    GameAborted,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::GameOver | Phase::GameAborted)
    }

    /// Private phases: only the acting players may know what happens in
    /// them beyond the phase name itself.
    pub fn is_night_action(self) -> bool {
        matches!(
            self,
            Phase::NightChameleon
                | Phase::NightAiAgent
                | Phase::NightAiExchange
                | Phase::NightRadar
                | Phase::NightSaboteurs
                | Phase::NightDoctor
        )
    }

    /// Phases during which every camera and microphone goes dark.
    pub fn is_night(self) -> bool {
        self.is_night_action()
            || matches!(self, Phase::NightStart | Phase::Revenge | Phase::NightResults)
    }
}

/// The fixed night sub-phase order. Each entry is conditionally skipped
/// when its actor is absent, disabled, or its one-shot already spent.
pub const NIGHT_ORDER: &[Phase] = &[
    Phase::NightChameleon,
    Phase::NightAiAgent,
    Phase::NightAiExchange,
    Phase::NightRadar,
    Phase::NightSaboteurs,
    Phase::NightDoctor,
];

/// The players whose acknowledgment (or action) gates completion of the
/// room's current phase. Pure function of the room state.
pub fn required_set(room: &Room) -> BTreeSet<PlayerId> {
    match room.phase {
        Phase::Lobby | Phase::GameOver | Phase::GameAborted => BTreeSet::new(),
        // Everyone still in the game picks a role before the reveal.
        Phase::ManualRolePick => room.active_ids().collect(),
        Phase::RoleReveal
        | Phase::CaptainCandidacy
        | Phase::CaptainVote
        | Phase::NightStart
        | Phase::NightResults
        | Phase::DayWake
        | Phase::DayVote
        | Phase::DayResults => room.alive_ids().collect(),
        Phase::NightChameleon => holder_of(room, Role::Chameleon),
        Phase::NightAiAgent => holder_of(room, Role::AiAgent),
        Phase::NightAiExchange => room
            .players
            .values()
            .filter(|p| p.is_alive() && p.linked_to.is_some())
            .map(|p| p.id)
            .collect(),
        Phase::NightRadar => holder_of(room, Role::RadarOperator),
        Phase::NightSaboteurs => room
            .players
            .values()
            .filter(|p| p.is_living_saboteur())
            .map(|p| p.id)
            .collect(),
        Phase::NightDoctor => holder_of(room, Role::Doctor),
        // The avenger is already dead; the phase exists for their last act.
        Phase::Revenge => room
            .revenge
            .as_ref()
            .map(|ctx| BTreeSet::from([ctx.chief]))
            .unwrap_or_default(),
        // The chooser is the dead former captain.
        Phase::DayCaptainTransfer => room
            .players
            .values()
            .filter(|p| p.is_captain && !p.is_alive() && p.is_active())
            .map(|p| p.id)
            .collect(),
        Phase::DayTiebreak => room
            .players
            .values()
            .filter(|p| p.is_captain && p.is_alive())
            .map(|p| p.id)
            .collect(),
    }
}

fn holder_of(room: &Room, role: Role) -> BTreeSet<PlayerId> {
    room.players
        .values()
        .filter(|p| p.is_alive() && p.role == Some(role))
        .map(|p| p.id)
        .collect()
}
