use std::collections::BTreeSet;
use std::time::Duration;

use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

use crate::action::{self, Action, Rejection};
use crate::assign::{RolePool, auto_assign, build_pool};
use crate::log::LogEvent;
use crate::phase::{NIGHT_ORDER, Phase, required_set};
use crate::player::{PlayerId, PlayerStatus};
use crate::role::Role;
use crate::room::{NightRecord, PhaseData, RevengeContext, Room, RoomRules};
use crate::win::{Winner, evaluate};

/// What happens to a tied day vote when no living captain can break it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieFallback {
    #[default]
    Random,
    NoElimination,
}

/// Engine-level tunables. These are deployment policy, not game rules,
/// so they live outside the room's frozen `RoomRules`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineRules {
    /// Below this many active players the game aborts.
    pub min_active_players: usize,
    pub day_tie_fallback: TieFallback,
    /// Minimum phase age before the host may force-advance.
    pub force_advance_min: Duration,
}

impl Default for EngineRules {
    fn default() -> Self {
        Self {
            min_active_players: 4,
            day_tie_fallback: TieFallback::Random,
            force_advance_min: Duration::from_secs(30),
        }
    }
}

/// Drives a room's phase machine. Stateless apart from its rules: every
/// operation takes the room it mutates, so one engine serves all rooms.
#[derive(Debug, Clone, Default)]
pub struct PhaseEngine {
    rules: EngineRules,
}

impl PhaseEngine {
    pub fn new(rules: EngineRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &EngineRules {
        &self.rules
    }

    /// Host starts the game: freezes the rules, deals (or opens the pick
    /// pool), and leaves the lobby.
    pub fn start_game(
        &self,
        room: &mut Room,
        actor: PlayerId,
        rules: RoomRules,
        rng: &mut impl Rng,
    ) -> Result<(), Rejection> {
        if actor != room.host {
            return Err(Rejection::NotHost);
        }
        if room.started || room.phase != Phase::Lobby {
            return Err(Rejection::AlreadyStarted);
        }
        if room.active_count() < self.rules.min_active_players {
            return Err(Rejection::NotEnoughPlayers);
        }

        room.rules = rules;
        room.started = true;
        room.log.push(LogEvent::GameStarted);

        if room.rules.manual_roles {
            let pool = build_pool(room.active_count(), &room.rules);
            room.pool = Some(RolePool::from_roles(&pool));
            self.transition(room, Phase::ManualRolePick);
        } else {
            auto_assign(room, rng);
            room.log.push(LogEvent::RolesDealt);
            self.transition(room, Phase::RoleReveal);
        }
        Ok(())
    }

    /// Validates and records a player action, then advances the machine
    /// if the phase's ack gate closed.
    pub fn apply(
        &self,
        room: &mut Room,
        actor: PlayerId,
        act: Action,
        rng: &mut impl Rng,
    ) -> Result<(), Rejection> {
        action::resolve(room, actor, act)?;
        self.maybe_advance(room, rng);
        Ok(())
    }

    /// Host escape hatch for a stalled phase: missing acks count as
    /// "no action", then the completion runs regardless of the gate.
    pub fn force_advance(
        &self,
        room: &mut Room,
        actor: PlayerId,
        rng: &mut impl Rng,
    ) -> Result<(), Rejection> {
        if actor != room.host {
            return Err(Rejection::NotHost);
        }
        if !room.accepting_actions() || room.phase == Phase::Lobby {
            return Err(Rejection::GameNotRunning);
        }
        if room.phase_started_at.elapsed() < self.rules.force_advance_min {
            return Err(Rejection::PhaseTooYoung);
        }
        tracing::info!(room = %room.code, phase = ?room.phase, "Host forced phase completion");
        self.complete_phase(room, rng);
        self.maybe_advance(room, rng);
        Ok(())
    }

    /// Promotes a player to Left (reconnection grace expired, or an
    /// explicit quit). Lobby departures drop the player entirely.
    pub fn player_left(&self, room: &mut Room, id: PlayerId, rng: &mut impl Rng) {
        if !room.started || room.phase.is_terminal() {
            room.remove_player(id);
            return;
        }
        let Some(p) = room.player_mut(id) else {
            return;
        };
        if p.status == PlayerStatus::Left {
            return;
        }
        p.status = PlayerStatus::Left;
        p.connected = false;
        room.log.push(LogEvent::PlayerLeft { player: id });
        // Their ack is no longer required; the gate may have closed.
        self.maybe_advance(room, rng);
    }

    /// Host resets the room for a new round with the same roster.
    pub fn reset(&self, room: &mut Room, actor: PlayerId) -> Result<(), Rejection> {
        if actor != room.host {
            return Err(Rejection::NotHost);
        }
        room.reset();
        Ok(())
    }

    /// Completes phases for as long as their required sets are covered by
    /// the recorded acks. Bounded: each completion either transitions to a
    /// phase waiting on players or reaches a terminal state.
    fn maybe_advance(&self, room: &mut Room, rng: &mut impl Rng) {
        while room.accepting_actions() && room.phase != Phase::Lobby {
            let required = required_set(room);
            if !required.is_subset(&room.phase_ack) {
                break;
            }
            self.complete_phase(room, rng);
        }
    }

    fn complete_phase(&self, room: &mut Room, rng: &mut impl Rng) {
        match room.phase {
            Phase::Lobby | Phase::GameOver | Phase::GameAborted => {},

            Phase::ManualRolePick => self.finish_role_pick(room, rng),

            Phase::RoleReveal => {
                if room.night == 0 {
                    self.transition(room, Phase::CaptainCandidacy);
                } else {
                    // Re-reveal after a swap: resume the night sequence.
                    self.advance_night(room, Some(Phase::NightChameleon), rng);
                }
            },

            Phase::CaptainCandidacy => self.finish_candidacy(room),

            Phase::CaptainVote => self.finish_captain_vote(room, rng),

            Phase::NightStart => self.advance_night(room, None, rng),

            Phase::NightChameleon => self.finish_chameleon(room, rng),

            Phase::NightAiAgent => self.finish_ai_agent(room, rng),

            Phase::NightAiExchange => self.advance_night(room, Some(Phase::NightAiExchange), rng),

            Phase::NightRadar => self.advance_night(room, Some(Phase::NightRadar), rng),

            Phase::NightSaboteurs => {
                room.night_record.saboteur_target = unanimous_target(room);
                self.advance_night(room, Some(Phase::NightSaboteurs), rng);
            },

            Phase::NightDoctor => self.advance_night(room, Some(Phase::NightDoctor), rng),

            Phase::Revenge => self.finish_revenge(room),

            Phase::NightResults => self.finish_results(room, Phase::DayWake),

            Phase::DayWake => self.finish_day_wake(room, rng),

            Phase::DayCaptainTransfer => self.finish_captain_transfer(room, rng),

            Phase::DayVote => self.finish_day_vote(room, rng),

            Phase::DayTiebreak => self.finish_tiebreak(room, rng),

            Phase::DayResults => self.finish_results(room, Phase::NightStart),
        }
    }

    fn finish_role_pick(&self, room: &mut Room, rng: &mut impl Rng) {
        let unpicked: Vec<PlayerId> = room
            .players
            .values()
            .filter(|p| p.is_active() && p.role.is_none())
            .map(|p| p.id)
            .collect();
        if !unpicked.is_empty()
            && let Some(mut pool) = room.pool.take()
        {
            // Forced close: deal the leftovers.
            pool.drain_to(room, &unpicked, rng);
        }
        room.pool = None;
        room.log.push(LogEvent::RolesDealt);
        self.transition(room, Phase::RoleReveal);
    }

    fn finish_candidacy(&self, room: &mut Room) {
        if room.alive_count() == 0 {
            self.abort(room);
            return;
        }
        let candidates: Vec<PlayerId> = room
            .phase_data
            .candidacy
            .iter()
            .filter(|&(&id, &standing)| standing && room.player(id).is_some_and(|p| p.is_alive()))
            .map(|(&id, _)| id)
            .collect();

        match candidates.as_slice() {
            [] => {
                self.transition(room, Phase::CaptainCandidacy);
                room.phase_data.reason = Some("no candidates, retry election".to_string());
            },
            &[only] => self.elect_captain(room, only),
            _ => {
                self.transition(room, Phase::CaptainVote);
                room.phase_data.candidates = candidates;
            },
        }
    }

    fn finish_captain_vote(&self, room: &mut Room, rng: &mut impl Rng) {
        let candidates = room.phase_data.candidates.clone();
        let top = top_targets(room, &candidates);
        match top.as_slice() {
            [] => {
                // Nobody voted at all: pick among the candidates rather
                // than looping an election nobody participates in.
                if let Some(&winner) = candidates.choose(rng) {
                    self.elect_captain(room, winner);
                } else {
                    self.abort(room);
                }
            },
            &[winner] => self.elect_captain(room, winner),
            tied => {
                let tied = tied.to_vec();
                room.log.push(LogEvent::VoteTied {
                    candidates: tied.clone(),
                });
                self.transition(room, Phase::CaptainVote);
                room.phase_data.candidates = tied;
                room.phase_data.reason = Some("tie, revote among tied candidates".to_string());
            },
        }
    }

    fn elect_captain(&self, room: &mut Room, id: PlayerId) {
        room.set_captain(id);
        room.log.push(LogEvent::CaptainElected { player: id });
        self.transition(room, Phase::NightStart);
    }

    /// Moves to the next eligible night sub-phase after `after`, or
    /// resolves the night when none remain.
    fn advance_night(&self, room: &mut Room, after: Option<Phase>, rng: &mut impl Rng) {
        let start = after
            .and_then(|p| NIGHT_ORDER.iter().position(|&o| o == p).map(|i| i + 1))
            .unwrap_or(0);
        for &candidate in &NIGHT_ORDER[start..] {
            if night_phase_eligible(room, candidate) {
                self.transition(room, candidate);
                return;
            }
        }
        self.resolve_night(room, rng);
    }

    fn finish_chameleon(&self, room: &mut Room, rng: &mut impl Rng) {
        let chameleon = room.living_holder(Role::Chameleon);
        let target = chameleon.and_then(|c| room.phase_data.votes.get(&c).copied());
        if let (Some(c), Some(t)) = (chameleon, target) {
            let taken = room.player(t).and_then(|p| p.role);
            let own = room.player(c).and_then(|p| p.role);
            if let Some(p) = room.player_mut(t) {
                p.role = own;
            }
            if let Some(p) = room.player_mut(c) {
                p.role = taken;
            }
            room.chameleon_used = true;
            room.log.push(LogEvent::RolesExchanged);
            // Factions may have moved; everyone confirms what they are now.
            self.transition(room, Phase::RoleReveal);
        } else {
            self.advance_night(room, Some(Phase::NightChameleon), rng);
        }
    }

    fn finish_ai_agent(&self, room: &mut Room, rng: &mut impl Rng) {
        let agent = room.living_holder(Role::AiAgent);
        let target = agent.and_then(|a| room.phase_data.votes.get(&a).copied());
        if let (Some(a), Some(t)) = (agent, target)
            && room.player(t).is_some_and(|p| p.is_alive())
        {
            if let Some(p) = room.player_mut(a) {
                p.linked_to = Some(t);
            }
            if let Some(p) = room.player_mut(t) {
                p.linked_to = Some(a);
            }
            room.night_record.link_formed = true;
        }
        self.advance_night(room, Some(Phase::NightAiAgent), rng);
    }

    fn resolve_night(&self, room: &mut Room, rng: &mut impl Rng) {
        let NightRecord {
            saboteur_target,
            protected,
            poisoned,
            ..
        } = room.night_record;

        if protected.is_some() {
            room.doctor_life_used = true;
        }
        if poisoned.is_some() {
            room.doctor_death_used = true;
        }

        let mut victims: Vec<PlayerId> = Vec::new();
        if let Some(t) = saboteur_target
            && protected != Some(t)
        {
            victims.push(t);
        }
        if let Some(t) = poisoned
            && !victims.contains(&t)
        {
            victims.push(t);
        }

        self.apply_deaths(room, &victims, Phase::NightResults, false);
    }

    /// The one death pipeline: marks victims, cascades linked fates,
    /// checks viability, and interrupts into Revenge when the security
    /// chief is among the fallen.
    fn apply_deaths(&self, room: &mut Room, victims: &[PlayerId], resume_to: Phase, ejection: bool) {
        let mut newly_dead: Vec<PlayerId> = Vec::new();
        for &id in victims {
            if let Some(p) = room.player_mut(id)
                && p.status == PlayerStatus::Alive
            {
                p.status = PlayerStatus::Dead;
                newly_dead.push(id);
                room.log.push(if ejection {
                    LogEvent::Ejected { player: id }
                } else {
                    LogEvent::Death { player: id }
                });
            }
        }
        newly_dead.extend(cascade_links(room));
        room.last_deaths = newly_dead.clone();

        if self.check_abort(room) {
            return;
        }

        let fallen_chief = newly_dead.iter().copied().find(|&id| {
            room.player(id)
                .is_some_and(|p| p.role == Some(Role::SecurityChief))
        });
        if let Some(chief) = fallen_chief {
            room.revenge = Some(RevengeContext {
                chief,
                resume_to,
            });
            self.transition(room, Phase::Revenge);
        } else {
            self.transition(room, resume_to);
        }
    }

    fn finish_revenge(&self, room: &mut Room) {
        let Some(ctx) = room.revenge.take() else {
            tracing::warn!(room = %room.code, "Revenge phase without context");
            self.abort(room);
            return;
        };
        let shot = room.phase_data.votes.get(&ctx.chief).copied();
        if let Some(target) = shot
            && let Some(p) = room.player_mut(target)
            && p.status == PlayerStatus::Alive
        {
            p.status = PlayerStatus::Dead;
            room.log.push(LogEvent::RevengeTaken { target });
            room.log.push(LogEvent::Death { player: target });
            room.last_deaths.push(target);
            let cascaded = cascade_links(room);
            room.last_deaths.extend(cascaded);
        }
        if self.check_abort(room) {
            return;
        }
        self.transition(room, ctx.resume_to);
    }

    /// Results-phase completion: the deferred win check runs here, after
    /// any revenge resolved.
    fn finish_results(&self, room: &mut Room, next: Phase) {
        match evaluate(room, self.rules.min_active_players) {
            Some(Winner::Aborted) => self.abort(room),
            Some(winner) => {
                room.ended = true;
                room.winner = Some(winner);
                room.log.push(LogEvent::GameEnded { winner });
                self.transition(room, Phase::GameOver);
            },
            None => self.transition(room, next),
        }
    }

    fn finish_day_wake(&self, room: &mut Room, rng: &mut impl Rng) {
        let fallen_captain = room
            .players
            .values()
            .find(|p| p.is_captain && !p.is_alive())
            .map(|p| (p.id, p.is_active() && p.connected));
        match fallen_captain {
            None => self.transition(room, Phase::DayVote),
            Some((_, true)) => self.transition(room, Phase::DayCaptainTransfer),
            Some((old, false)) => {
                // The chooser is gone: hand the captaincy to a random
                // living player and skip the choice.
                self.fallback_captain(room, old, rng);
                self.transition(room, Phase::DayVote);
            },
        }
    }

    fn finish_captain_transfer(&self, room: &mut Room, rng: &mut impl Rng) {
        let chooser = room
            .players
            .values()
            .find(|p| p.is_captain && !p.is_alive())
            .map(|p| p.id);
        let Some(old) = chooser else {
            self.transition(room, Phase::DayVote);
            return;
        };
        let pick = room
            .phase_data
            .votes
            .get(&old)
            .copied()
            .filter(|t| room.player(*t).is_some_and(|p| p.is_alive()));
        match pick {
            Some(target) => {
                room.set_captain(target);
                room.log.push(LogEvent::CaptainTransferred {
                    from: old,
                    to: target,
                });
                self.transition(room, Phase::DayVote);
            },
            None => {
                self.fallback_captain(room, old, rng);
                self.transition(room, Phase::DayVote);
            },
        }
    }

    fn fallback_captain(&self, room: &mut Room, old: PlayerId, rng: &mut impl Rng) {
        let living: Vec<PlayerId> = room.alive_ids().collect();
        if let Some(&target) = living.choose(rng) {
            room.set_captain(target);
            room.log.push(LogEvent::CaptainTransferred {
                from: old,
                to: target,
            });
        }
    }

    fn finish_day_vote(&self, room: &mut Room, rng: &mut impl Rng) {
        let alive: Vec<PlayerId> = room.alive_ids().collect();
        let top = top_targets(room, &alive);
        match top.as_slice() {
            [] => {
                self.transition(room, Phase::DayResults);
                room.phase_data.reason = Some("no votes cast".to_string());
            },
            &[target] => {
                self.apply_deaths(room, &[target], Phase::DayResults, true);
            },
            tied => {
                let tied = tied.to_vec();
                room.log.push(LogEvent::VoteTied {
                    candidates: tied.clone(),
                });
                if room.players.values().any(|p| p.is_captain && p.is_alive()) {
                    self.transition(room, Phase::DayTiebreak);
                    room.phase_data.candidates = tied;
                } else {
                    match self.rules.day_tie_fallback {
                        TieFallback::Random => {
                            if let Some(&target) = tied.choose(rng) {
                                self.apply_deaths(room, &[target], Phase::DayResults, true);
                            }
                        },
                        TieFallback::NoElimination => {
                            self.transition(room, Phase::DayResults);
                            room.phase_data.reason =
                                Some("tie with no captain, nobody ejected".to_string());
                        },
                    }
                }
            },
        }
    }

    fn finish_tiebreak(&self, room: &mut Room, rng: &mut impl Rng) {
        let captain = room
            .players
            .values()
            .find(|p| p.is_captain && p.is_alive())
            .map(|p| p.id);
        let pick = captain.and_then(|c| room.phase_data.votes.get(&c).copied());
        match pick {
            Some(target) => {
                self.apply_deaths(room, &[target], Phase::DayResults, true);
            },
            None => {
                // Forced past a silent captain: the tie stands unresolved.
                self.transition(room, Phase::DayResults);
                room.phase_data.reason = Some("tiebreak skipped, nobody ejected".to_string());
            },
        }
    }

    fn check_abort(&self, room: &mut Room) -> bool {
        if room.active_count() < self.rules.min_active_players {
            self.abort(room);
            return true;
        }
        false
    }

    fn abort(&self, room: &mut Room) {
        room.aborted = true;
        room.ended = false;
        room.winner = Some(Winner::Aborted);
        room.revenge = None;
        room.log.push(LogEvent::GameAborted);
        self.transition(room, Phase::GameAborted);
    }

    /// The single phase-switch point: records the exited phase and wipes
    /// the per-phase scratch state.
    fn transition(&self, room: &mut Room, to: Phase) {
        room.prev_phase = room.phase;
        room.phase = to;
        room.phase_data = PhaseData::default();
        room.phase_ack = BTreeSet::new();
        room.phase_started_at = std::time::Instant::now();
        room.log.push(LogEvent::PhaseChanged {
            from: room.prev_phase,
            to,
        });

        match to {
            Phase::NightStart => {
                room.night += 1;
                room.night_record = NightRecord::default();
                room.last_deaths.clear();
            },
            Phase::DayWake => {
                room.day += 1;
                // Radar readings do not survive the dawn.
                room.night_record.radar = None;
            },
            Phase::DayVote => {
                room.last_deaths.clear();
            },
            _ => {},
        }
    }
}

/// The identical-target rule: a night kill happens only when every living
/// saboteur voted, all for the same non-saboteur target.
fn unanimous_target(room: &Room) -> Option<PlayerId> {
    let saboteurs = room.living_saboteurs();
    if saboteurs.is_empty() {
        return None;
    }
    let mut target = None;
    for id in &saboteurs {
        match (target, room.phase_data.votes.get(id)) {
            (_, None) => return None,
            (None, Some(&t)) => target = Some(t),
            (Some(prev), Some(&t)) if prev != t => return None,
            _ => {},
        }
    }
    target.filter(|&t| {
        room.player(t)
            .is_some_and(|p| p.is_alive() && p.role != Some(Role::Saboteur))
    })
}

/// Plurality winners among the recorded votes onto `eligible` targets.
/// Returns every top-scoring target; one entry means a clean win.
fn top_targets(room: &Room, eligible: &[PlayerId]) -> Vec<PlayerId> {
    let mut counts: Vec<(PlayerId, usize)> = Vec::new();
    for (_, &target) in &room.phase_data.votes {
        if !eligible.contains(&target) {
            continue;
        }
        match counts.iter_mut().find(|(id, _)| *id == target) {
            Some((_, n)) => *n += 1,
            None => counts.push((target, 1)),
        }
    }
    let Some(max) = counts.iter().map(|&(_, n)| n).max() else {
        return Vec::new();
    };
    counts
        .into_iter()
        .filter(|&(_, n)| n == max)
        .map(|(id, _)| id)
        .collect()
}

/// Linked-fate cascade: while any bond has a dead end and a living end,
/// the living end dies too. Chains propagate to a fixed point.
fn cascade_links(room: &mut Room) -> Vec<PlayerId> {
    let mut cascaded = Vec::new();
    loop {
        let next: Vec<PlayerId> = room
            .players
            .values()
            .filter(|p| {
                p.status == PlayerStatus::Alive
                    && p.linked_to.is_some_and(|other| {
                        room.player(other)
                            .is_some_and(|o| o.status == PlayerStatus::Dead)
                    })
            })
            .map(|p| p.id)
            .collect();
        if next.is_empty() {
            return cascaded;
        }
        for id in next {
            if let Some(p) = room.player_mut(id) {
                p.status = PlayerStatus::Dead;
            }
            room.log.push(LogEvent::Death { player: id });
            cascaded.push(id);
        }
    }
}

fn night_phase_eligible(room: &Room, phase: Phase) -> bool {
    match phase {
        Phase::NightChameleon => {
            room.rules.roles.chameleon
                && room.night == 1
                && !room.chameleon_used
                && room.living_holder(Role::Chameleon).is_some()
        },
        Phase::NightAiAgent => {
            room.rules.roles.ai_agent
                && room.night == 1
                && room
                    .living_holder(Role::AiAgent)
                    .and_then(|a| room.player(a))
                    .is_some_and(|p| p.linked_to.is_none())
        },
        Phase::NightAiExchange => room.night_record.link_formed,
        Phase::NightRadar => {
            room.rules.roles.radar && room.living_holder(Role::RadarOperator).is_some()
        },
        Phase::NightSaboteurs => !room.living_saboteurs().is_empty(),
        Phase::NightDoctor => {
            room.rules.roles.doctor
                && room.living_holder(Role::Doctor).is_some()
                && (!room.doctor_life_used || !room.doctor_death_used)
        },
        _ => false,
    }
}
