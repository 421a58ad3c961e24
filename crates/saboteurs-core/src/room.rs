use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::assign::RolePool;
use crate::log::{DEFAULT_LOG_CAP, LogEvent, MatchLog};
use crate::phase::Phase;
use crate::player::{Player, PlayerId, PlayerStatus};
use crate::role::Role;
use crate::win::Winner;

/// Which optional roles are dealt into the pool. Frozen once the game
/// starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleToggles {
    pub doctor: bool,
    pub security: bool,
    pub radar: bool,
    pub ai_agent: bool,
    pub engineer: bool,
    pub chameleon: bool,
}

impl Default for RoleToggles {
    fn default() -> Self {
        Self {
            doctor: true,
            security: true,
            radar: true,
            ai_agent: true,
            engineer: true,
            chameleon: true,
        }
    }
}

impl RoleToggles {
    pub fn enabled(&self, role: Role) -> bool {
        match role {
            Role::Doctor => self.doctor,
            Role::SecurityChief => self.security,
            Role::RadarOperator => self.radar,
            Role::AiAgent => self.ai_agent,
            Role::Engineer => self.engineer,
            Role::Chameleon => self.chameleon,
            Role::Saboteur | Role::Crewmate => true,
        }
    }
}

/// Lobby-configurable rules for one game.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomRules {
    pub roles: RoleToggles,
    /// When set, players pick their own role from the pool instead of
    /// being dealt one.
    pub manual_roles: bool,
}

/// Phase-scoped transient data. Reset to empty on every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseData {
    /// Election or tiebreak candidates; also the restricted subset after a
    /// tied vote.
    pub candidates: Vec<PlayerId>,
    /// Captain candidacy declarations.
    pub candidacy: BTreeMap<PlayerId, bool>,
    /// Recorded votes for the current phase (captain vote, day vote,
    /// tiebreak pick, saboteur night vote). Overwritten on resubmission.
    pub votes: BTreeMap<PlayerId, PlayerId>,
    /// Human-readable reason attached to a forced or looped transition.
    pub reason: Option<String>,
}

/// A radar operator's inspection result. Private to the inspector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadarReading {
    pub inspector: PlayerId,
    pub target: PlayerId,
    pub role: Role,
}

/// Accumulated outcomes of the current night, kept across its sub-phases
/// and cleared when the next night begins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NightRecord {
    /// Unanimous saboteur target, resolved when their vote phase completes.
    pub saboteur_target: Option<PlayerId>,
    /// Target protected by the doctor's life potion tonight.
    pub protected: Option<PlayerId>,
    /// Target of the doctor's death potion tonight.
    pub poisoned: Option<PlayerId>,
    /// Tonight's radar inspection, visible to the inspector until dawn.
    pub radar: Option<RadarReading>,
    /// Set when a link was formed tonight; gates the exchange phase.
    pub link_formed: bool,
}

/// Remembers the flow interrupted by a security chief's death so the
/// engine can resume into the right results phase after the last shot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevengeContext {
    pub chief: PlayerId,
    pub resume_to: Phase,
}

/// One game instance: the only mutable shared state in the system. All
/// mutation goes through the engine; the registry serializes delivery.
#[derive(Debug)]
pub struct Room {
    pub code: String,
    pub host: PlayerId,
    pub rules: RoomRules,
    pub phase: Phase,
    pub prev_phase: Phase,
    pub phase_data: PhaseData,
    pub phase_ack: BTreeSet<PlayerId>,
    /// When the current phase was entered; gates host force-advance.
    pub phase_started_at: Instant,
    pub day: u32,
    pub night: u32,
    pub players: BTreeMap<PlayerId, Player>,
    pub log: MatchLog,
    pub night_record: NightRecord,
    /// Deaths shown by the next results phase.
    pub last_deaths: Vec<PlayerId>,
    pub revenge: Option<RevengeContext>,
    /// Remaining picks in manual-role mode.
    pub pool: Option<RolePool>,
    pub doctor_life_used: bool,
    pub doctor_death_used: bool,
    pub chameleon_used: bool,
    pub started: bool,
    pub ended: bool,
    pub aborted: bool,
    pub winner: Option<Winner>,
}

impl Room {
    pub fn new(code: String, host: Player) -> Self {
        let host_id = host.id;
        let mut players = BTreeMap::new();
        players.insert(host_id, host);
        Self {
            code,
            host: host_id,
            rules: RoomRules::default(),
            phase: Phase::Lobby,
            prev_phase: Phase::Lobby,
            phase_data: PhaseData::default(),
            phase_ack: BTreeSet::new(),
            phase_started_at: Instant::now(),
            day: 0,
            night: 0,
            players,
            log: MatchLog::new(DEFAULT_LOG_CAP),
            night_record: NightRecord::default(),
            last_deaths: Vec::new(),
            revenge: None,
            pool: None,
            doctor_life_used: false,
            doctor_death_used: false,
            chameleon_used: false,
            started: false,
            ended: false,
            aborted: false,
            winner: None,
        }
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn player_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.get_mut(&id)
    }

    pub fn alive_ids(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.players
            .values()
            .filter(|p| p.is_alive())
            .map(|p| p.id)
    }

    pub fn active_ids(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.players
            .values()
            .filter(|p| p.is_active())
            .map(|p| p.id)
    }

    pub fn alive_count(&self) -> usize {
        self.alive_ids().count()
    }

    pub fn active_count(&self) -> usize {
        self.active_ids().count()
    }

    pub fn living_saboteurs(&self) -> Vec<PlayerId> {
        self.players
            .values()
            .filter(|p| p.is_living_saboteur())
            .map(|p| p.id)
            .collect()
    }

    pub fn living_holder(&self, role: Role) -> Option<PlayerId> {
        self.players
            .values()
            .find(|p| p.is_alive() && p.role == Some(role))
            .map(|p| p.id)
    }

    pub fn captain(&self) -> Option<&Player> {
        self.players.values().find(|p| p.is_captain)
    }

    /// Moves the captaincy, preserving the at-most-one invariant.
    pub fn set_captain(&mut self, id: PlayerId) {
        for p in self.players.values_mut() {
            p.is_captain = p.id == id;
        }
    }

    /// Whether the room still accepts gameplay actions.
    pub fn accepting_actions(&self) -> bool {
        self.started && !self.ended && !self.aborted
    }

    /// Adds a lobby joiner. Fails once the game has started.
    pub fn add_player(&mut self, player: Player) -> Result<(), String> {
        if self.started {
            return Err("Game already in progress".to_string());
        }
        let id = player.id;
        self.players.insert(id, player);
        self.log.push(LogEvent::PlayerJoined { player: id });
        Ok(())
    }

    /// Drops a lobby player entirely (pre-game departure keeps no record).
    pub fn remove_player(&mut self, id: PlayerId) {
        self.players.remove(&id);
        if self.host == id
            && let Some(next) = self.players.values().next()
        {
            self.host = next.id;
        }
    }

    /// Clears game state for a new round, keeping the roster. Left players
    /// are dropped; everyone else comes back alive and unassigned.
    pub fn reset(&mut self) {
        self.players.retain(|_, p| p.status != PlayerStatus::Left);
        for p in self.players.values_mut() {
            p.status = PlayerStatus::Alive;
            p.role = None;
            p.is_captain = false;
            p.linked_to = None;
        }
        if !self.players.contains_key(&self.host)
            && let Some(next) = self.players.values().next()
        {
            self.host = next.id;
        }
        self.phase = Phase::Lobby;
        self.prev_phase = Phase::Lobby;
        self.phase_data = PhaseData::default();
        self.phase_ack.clear();
        self.phase_started_at = Instant::now();
        self.day = 0;
        self.night = 0;
        self.night_record = NightRecord::default();
        self.last_deaths.clear();
        self.revenge = None;
        self.pool = None;
        self.doctor_life_used = false;
        self.doctor_death_used = false;
        self.chameleon_used = false;
        self.started = false;
        self.ended = false;
        self.aborted = false;
        self.winner = None;
        self.log.push(LogEvent::RoomReset);
    }
}

/// Room code alphabet: uppercase letters minus easily-confused glyphs.
const CODE_LETTERS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Generates a room code in `ABCD-1234` format.
pub fn generate_room_code(rng: &mut impl rand::Rng) -> String {
    let mut code = String::with_capacity(9);
    for _ in 0..4 {
        let idx = rng.random_range(0..CODE_LETTERS.len());
        code.push(CODE_LETTERS[idx] as char);
    }
    code.push('-');
    for _ in 0..4 {
        code.push(char::from_digit(rng.random_range(0..10), 10).unwrap_or('0'));
    }
    code
}

/// Validates the `ABCD-1234` room code shape.
pub fn is_valid_room_code(code: &str) -> bool {
    let bytes = code.as_bytes();
    bytes.len() == 9
        && bytes[..4].iter().all(|b| CODE_LETTERS.contains(b))
        && bytes[4] == b'-'
        && bytes[5..].iter().all(u8::is_ascii_digit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn room_with(n: usize) -> Room {
        let mut room = Room::new("TEST-0001".into(), Player::new(1, "P1".into()));
        for i in 2..=n as PlayerId {
            room.add_player(Player::new(i, format!("P{i}"))).unwrap();
        }
        room
    }

    #[test]
    fn room_code_format() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let code = generate_room_code(&mut rng);
            assert!(is_valid_room_code(&code), "invalid room code: {code}");
        }
    }

    #[test]
    fn room_code_rejects_bad_shapes() {
        assert!(!is_valid_room_code(""));
        assert!(!is_valid_room_code("ABCD1234"));
        assert!(!is_valid_room_code("abcd-1234"));
        assert!(!is_valid_room_code("ABCD-12345"));
        assert!(!is_valid_room_code("ABIO-1234")); // excluded letters
    }

    #[test]
    fn set_captain_is_exclusive() {
        let mut room = room_with(4);
        room.set_captain(2);
        room.set_captain(3);
        let captains: Vec<_> = room.players.values().filter(|p| p.is_captain).collect();
        assert_eq!(captains.len(), 1);
        assert_eq!(captains[0].id, 3);
    }

    #[test]
    fn join_rejected_after_start() {
        let mut room = room_with(4);
        room.started = true;
        let err = room.add_player(Player::new(9, "Late".into()));
        assert!(err.is_err());
    }

    #[test]
    fn reset_drops_left_and_revives_rest() {
        let mut room = room_with(5);
        room.started = true;
        room.day = 3;
        room.player_mut(2).unwrap().status = PlayerStatus::Dead;
        room.player_mut(3).unwrap().status = PlayerStatus::Left;
        room.player_mut(4).unwrap().role = Some(Role::Saboteur);
        room.doctor_life_used = true;
        room.aborted = true;

        room.reset();

        assert_eq!(room.players.len(), 4);
        assert!(room.players.values().all(|p| p.is_alive()));
        assert!(room.players.values().all(|p| p.role.is_none()));
        assert_eq!(room.phase, Phase::Lobby);
        assert_eq!(room.day, 0);
        assert!(!room.started && !room.ended && !room.aborted);
        assert!(!room.doctor_life_used);
    }

    #[test]
    fn reset_migrates_host_when_host_left() {
        let mut room = room_with(4);
        room.player_mut(1).unwrap().status = PlayerStatus::Left;
        room.reset();
        assert_ne!(room.host, 1);
        assert!(room.players.contains_key(&room.host));
    }

    #[test]
    fn alive_and_active_counts() {
        let mut room = room_with(5);
        room.player_mut(2).unwrap().status = PlayerStatus::Dead;
        room.player_mut(3).unwrap().status = PlayerStatus::Left;
        assert_eq!(room.alive_count(), 3);
        assert_eq!(room.active_count(), 4);
    }
}
