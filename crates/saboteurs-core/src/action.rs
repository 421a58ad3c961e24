use serde::{Deserialize, Serialize};

use crate::phase::{Phase, required_set};
use crate::player::PlayerId;
use crate::role::Role;
use crate::room::{RadarReading, Room};

/// Everything a player can submit during a game. One variant per action
/// type; resubmission in the same phase overwrites the earlier record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// "I'm done here" — confirmation for reveal/wake/results phases, and
    /// the explicit pass wherever the rules allow passing.
    Ack,
    Candidacy { standing: bool },
    /// Captain election vote, day vote, or the captain's tiebreak pick,
    /// depending on the current phase.
    Vote { target: PlayerId },
    PickRole { role: Role },
    SaboteurVote { target: PlayerId },
    DoctorSave,
    DoctorKill { target: PlayerId },
    RadarInspect { target: PlayerId },
    ChameleonSwap { target: PlayerId },
    AiLink { target: PlayerId },
    RevengeShot { target: PlayerId },
    TransferCaptain { target: PlayerId },
}

/// Why an action was refused. Rejections never mutate the room; at the
/// transport boundary they are logged and swallowed, so the offending
/// client simply sees no effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    GameNotRunning,
    WrongPhase,
    NotInRoom,
    NotRequired,
    InvalidTarget,
    AbilityConsumed,
    RoleUnavailable,
    NotHost,
    PhaseTooYoung,
    NotEnoughPlayers,
    AlreadyStarted,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GameNotRunning => write!(f, "game is not running"),
            Self::WrongPhase => write!(f, "action does not belong to the current phase"),
            Self::NotInRoom => write!(f, "player is not in the room"),
            Self::NotRequired => write!(f, "player is not part of this phase"),
            Self::InvalidTarget => write!(f, "invalid target"),
            Self::AbilityConsumed => write!(f, "ability already used"),
            Self::RoleUnavailable => write!(f, "no copies of that role remain"),
            Self::NotHost => write!(f, "only the host may do this"),
            Self::PhaseTooYoung => write!(f, "phase has not lasted long enough to force"),
            Self::NotEnoughPlayers => write!(f, "not enough players"),
            Self::AlreadyStarted => write!(f, "game already started"),
        }
    }
}

impl std::error::Error for Rejection {}

/// Validates and records `action` for `actor`. Recording only — phase
/// resolution happens in the engine once the ack gate closes. Every
/// accepted action also acks the phase for its actor.
pub fn resolve(room: &mut Room, actor: PlayerId, action: Action) -> Result<(), Rejection> {
    if !room.accepting_actions() {
        return Err(Rejection::GameNotRunning);
    }
    if !room.players.contains_key(&actor) {
        return Err(Rejection::NotInRoom);
    }
    if !required_set(room).contains(&actor) {
        return Err(Rejection::NotRequired);
    }

    match action {
        Action::Ack => {},

        Action::Candidacy { standing } => {
            if room.phase != Phase::CaptainCandidacy {
                return Err(Rejection::WrongPhase);
            }
            room.phase_data.candidacy.insert(actor, standing);
        },

        Action::Vote { target } => match room.phase {
            Phase::CaptainVote | Phase::DayTiebreak => {
                if !room.phase_data.candidates.contains(&target) {
                    return Err(Rejection::InvalidTarget);
                }
                room.phase_data.votes.insert(actor, target);
            },
            Phase::DayVote => {
                if !room.player(target).is_some_and(|p| p.is_alive()) {
                    return Err(Rejection::InvalidTarget);
                }
                room.phase_data.votes.insert(actor, target);
            },
            _ => return Err(Rejection::WrongPhase),
        },

        Action::PickRole { role } => {
            if room.phase != Phase::ManualRolePick {
                return Err(Rejection::WrongPhase);
            }
            let previous = room.player(actor).and_then(|p| p.role);
            let Some(pool) = room.pool.as_mut() else {
                return Err(Rejection::WrongPhase);
            };
            // A pick change returns the old role to the pool first, so
            // re-picking the same role stays a no-op.
            if let Some(prev) = previous {
                pool.give_back(prev);
            }
            if !pool.take(role) {
                if let Some(prev) = previous {
                    pool.take(prev);
                }
                return Err(Rejection::RoleUnavailable);
            }
            if let Some(p) = room.player_mut(actor) {
                p.role = Some(role);
            }
        },

        Action::SaboteurVote { target } => {
            if room.phase != Phase::NightSaboteurs {
                return Err(Rejection::WrongPhase);
            }
            // No self or teammate targeting.
            let valid = room
                .player(target)
                .is_some_and(|p| p.is_alive() && p.role != Some(Role::Saboteur));
            if !valid {
                return Err(Rejection::InvalidTarget);
            }
            room.phase_data.votes.insert(actor, target);
        },

        Action::DoctorSave => {
            if room.phase != Phase::NightDoctor {
                return Err(Rejection::WrongPhase);
            }
            if room.doctor_life_used {
                return Err(Rejection::AbilityConsumed);
            }
            let Some(victim) = room.night_record.saboteur_target else {
                return Err(Rejection::InvalidTarget);
            };
            room.night_record.protected = Some(victim);
            room.night_record.poisoned = None;
        },

        Action::DoctorKill { target } => {
            if room.phase != Phase::NightDoctor {
                return Err(Rejection::WrongPhase);
            }
            if room.doctor_death_used {
                return Err(Rejection::AbilityConsumed);
            }
            if !room.player(target).is_some_and(|p| p.is_alive()) {
                return Err(Rejection::InvalidTarget);
            }
            room.night_record.poisoned = Some(target);
            room.night_record.protected = None;
        },

        Action::RadarInspect { target } => {
            if room.phase != Phase::NightRadar {
                return Err(Rejection::WrongPhase);
            }
            let Some(role) = room
                .player(target)
                .filter(|p| p.is_alive() && p.id != actor)
                .and_then(|p| p.role)
            else {
                return Err(Rejection::InvalidTarget);
            };
            room.night_record.radar = Some(RadarReading {
                inspector: actor,
                target,
                role,
            });
        },

        Action::ChameleonSwap { target } => {
            if room.phase != Phase::NightChameleon {
                return Err(Rejection::WrongPhase);
            }
            if room.chameleon_used {
                return Err(Rejection::AbilityConsumed);
            }
            if target == actor || !room.player(target).is_some_and(|p| p.is_alive()) {
                return Err(Rejection::InvalidTarget);
            }
            room.phase_data.votes.insert(actor, target);
        },

        Action::AiLink { target } => {
            if room.phase != Phase::NightAiAgent {
                return Err(Rejection::WrongPhase);
            }
            if target == actor || !room.player(target).is_some_and(|p| p.is_alive()) {
                return Err(Rejection::InvalidTarget);
            }
            room.phase_data.votes.insert(actor, target);
        },

        Action::RevengeShot { target } => {
            if room.phase != Phase::Revenge {
                return Err(Rejection::WrongPhase);
            }
            if !room.player(target).is_some_and(|p| p.is_alive()) {
                return Err(Rejection::InvalidTarget);
            }
            room.phase_data.votes.insert(actor, target);
        },

        Action::TransferCaptain { target } => {
            if room.phase != Phase::DayCaptainTransfer {
                return Err(Rejection::WrongPhase);
            }
            if !room.player(target).is_some_and(|p| p.is_alive()) {
                return Err(Rejection::InvalidTarget);
            }
            room.phase_data.votes.insert(actor, target);
        },
    }

    room.phase_ack.insert(actor);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::{Player, PlayerStatus};

    fn running_room(n: usize, phase: Phase) -> Room {
        let mut room = Room::new("TEST-0001".into(), Player::new(1, "P1".into()));
        for i in 2..=n as PlayerId {
            room.add_player(Player::new(i, format!("P{i}"))).unwrap();
        }
        room.started = true;
        room.phase = phase;
        room
    }

    #[test]
    fn rejects_when_game_not_running() {
        let mut room = running_room(4, Phase::DayVote);
        room.started = false;
        assert_eq!(
            resolve(&mut room, 1, Action::Ack),
            Err(Rejection::GameNotRunning)
        );
        room.started = true;
        room.ended = true;
        assert_eq!(
            resolve(&mut room, 1, Action::Ack),
            Err(Rejection::GameNotRunning)
        );
    }

    #[test]
    fn rejects_dead_voter() {
        let mut room = running_room(4, Phase::DayVote);
        room.player_mut(2).unwrap().status = PlayerStatus::Dead;
        assert_eq!(
            resolve(&mut room, 2, Action::Vote { target: 1 }),
            Err(Rejection::NotRequired)
        );
    }

    #[test]
    fn rejects_vote_for_dead_target() {
        let mut room = running_room(4, Phase::DayVote);
        room.player_mut(3).unwrap().status = PlayerStatus::Dead;
        assert_eq!(
            resolve(&mut room, 1, Action::Vote { target: 3 }),
            Err(Rejection::InvalidTarget)
        );
    }

    #[test]
    fn day_vote_resubmission_overwrites() {
        let mut room = running_room(4, Phase::DayVote);
        resolve(&mut room, 1, Action::Vote { target: 2 }).unwrap();
        resolve(&mut room, 1, Action::Vote { target: 3 }).unwrap();
        assert_eq!(room.phase_data.votes.get(&1), Some(&3));
        assert_eq!(room.phase_data.votes.len(), 1);
        assert_eq!(room.phase_ack.len(), 1);
    }

    #[test]
    fn saboteur_cannot_target_teammate() {
        let mut room = running_room(5, Phase::NightSaboteurs);
        room.player_mut(1).unwrap().role = Some(Role::Saboteur);
        room.player_mut(2).unwrap().role = Some(Role::Saboteur);
        for id in 3..=5 {
            room.player_mut(id).unwrap().role = Some(Role::Crewmate);
        }
        assert_eq!(
            resolve(&mut room, 1, Action::SaboteurVote { target: 2 }),
            Err(Rejection::InvalidTarget)
        );
        assert_eq!(
            resolve(&mut room, 1, Action::SaboteurVote { target: 1 }),
            Err(Rejection::InvalidTarget)
        );
        assert!(resolve(&mut room, 1, Action::SaboteurVote { target: 3 }).is_ok());
    }

    #[test]
    fn non_saboteur_cannot_join_night_vote() {
        let mut room = running_room(4, Phase::NightSaboteurs);
        room.player_mut(1).unwrap().role = Some(Role::Saboteur);
        for id in 2..=4 {
            room.player_mut(id).unwrap().role = Some(Role::Crewmate);
        }
        assert_eq!(
            resolve(&mut room, 2, Action::SaboteurVote { target: 3 }),
            Err(Rejection::NotRequired)
        );
    }

    #[test]
    fn doctor_save_requires_a_victim_and_a_potion() {
        let mut room = running_room(4, Phase::NightDoctor);
        room.player_mut(1).unwrap().role = Some(Role::Doctor);
        assert_eq!(
            resolve(&mut room, 1, Action::DoctorSave),
            Err(Rejection::InvalidTarget)
        );

        room.night_record.saboteur_target = Some(3);
        assert!(resolve(&mut room, 1, Action::DoctorSave).is_ok());
        assert_eq!(room.night_record.protected, Some(3));

        room.doctor_life_used = true;
        assert_eq!(
            resolve(&mut room, 1, Action::DoctorSave),
            Err(Rejection::AbilityConsumed)
        );
    }

    #[test]
    fn doctor_actions_are_mutually_exclusive() {
        let mut room = running_room(4, Phase::NightDoctor);
        room.player_mut(1).unwrap().role = Some(Role::Doctor);
        room.night_record.saboteur_target = Some(3);
        resolve(&mut room, 1, Action::DoctorSave).unwrap();
        resolve(&mut room, 1, Action::DoctorKill { target: 2 }).unwrap();
        assert_eq!(room.night_record.protected, None);
        assert_eq!(room.night_record.poisoned, Some(2));
    }

    #[test]
    fn radar_reads_target_role_privately() {
        let mut room = running_room(4, Phase::NightRadar);
        room.player_mut(1).unwrap().role = Some(Role::RadarOperator);
        room.player_mut(2).unwrap().role = Some(Role::Saboteur);
        resolve(&mut room, 1, Action::RadarInspect { target: 2 }).unwrap();
        let reading = room.night_record.radar.unwrap();
        assert_eq!(reading.inspector, 1);
        assert_eq!(reading.role, Role::Saboteur);
    }

    #[test]
    fn chameleon_rejects_self_swap() {
        let mut room = running_room(4, Phase::NightChameleon);
        room.player_mut(1).unwrap().role = Some(Role::Chameleon);
        assert_eq!(
            resolve(&mut room, 1, Action::ChameleonSwap { target: 1 }),
            Err(Rejection::InvalidTarget)
        );
    }

    #[test]
    fn wrong_phase_action_is_refused() {
        let mut room = running_room(4, Phase::DayVote);
        assert_eq!(
            resolve(&mut room, 1, Action::Candidacy { standing: true }),
            Err(Rejection::WrongPhase)
        );
    }
}
