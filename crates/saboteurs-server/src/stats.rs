use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use saboteurs_core::log::timestamp_now;
use saboteurs_core::role::{Faction, Role};
use saboteurs_core::room::Room;
use saboteurs_core::win::Winner;

/// Lifetime statistics for one display name. Names are the store key;
/// collisions between players sharing a name are a known limitation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerStats {
    pub games_played: u32,
    pub wins: u32,
    pub losses: u32,
    /// Games played per role key.
    pub roles: BTreeMap<String, u32>,
    pub history: VecDeque<MatchRecord>,
}

/// One finished game from a player's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub ts: u64,
    pub role: String,
    pub won: bool,
}

#[derive(Debug)]
pub enum StatsError {
    Io(std::io::Error),
    /// The persisted file exists but cannot be parsed. Surfaced as a
    /// hard failure rather than silently wiping player history.
    Corrupt(String),
}

impl std::fmt::Display for StatsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "stats io error: {e}"),
            Self::Corrupt(e) => write!(f, "stats file corrupt: {e}"),
        }
    }
}

impl std::error::Error for StatsError {}

impl From<std::io::Error> for StatsError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// JSON key-value store for lifetime stats, keyed by display name.
#[derive(Debug)]
pub struct StatsStore {
    path: PathBuf,
    players: HashMap<String, PlayerStats>,
    history_cap: usize,
}

impl StatsStore {
    /// Open the store. A missing file starts empty; a corrupt one fails.
    pub fn open(path: impl AsRef<Path>, history_cap: usize) -> Result<Self, StatsError> {
        let path = path.as_ref().to_path_buf();
        let players = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| StatsError::Corrupt(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            players,
            history_cap,
        })
    }

    pub fn get(&self, name: &str) -> Option<&PlayerStats> {
        self.players.get(name)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Write-then-rename so a crash mid-save never corrupts the store.
    pub fn save(&self) -> Result<(), StatsError> {
        let tmp = self.path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(&self.players)
            .map_err(|e| StatsError::Corrupt(e.to_string()))?;
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Apply one finished game to every non-Left participant. Aborted
    /// games touch nothing.
    pub fn record_game(&mut self, room: &Room) {
        let Some(winner) = room.winner else {
            return;
        };
        if winner == Winner::Aborted {
            return;
        }
        let ts = timestamp_now();
        for player in room.players.values() {
            if !player.is_active() {
                continue;
            }
            let Some(role) = player.role else {
                continue;
            };
            let won = player_won(winner, player.role, player.is_alive(), player.linked_to.is_some());
            let stats = self.players.entry(player.name.clone()).or_default();
            stats.games_played += 1;
            if won {
                stats.wins += 1;
            } else {
                stats.losses += 1;
            }
            *stats.roles.entry(role.key().to_string()).or_insert(0) += 1;
            while stats.history.len() >= self.history_cap {
                stats.history.pop_front();
            }
            stats.history.push_back(MatchRecord {
                ts,
                role: role.key().to_string(),
                won,
            });
        }
    }
}

fn player_won(winner: Winner, role: Option<Role>, alive: bool, linked: bool) -> bool {
    match winner {
        Winner::Crew => role.map(Role::faction) == Some(Faction::Crew),
        Winner::Saboteurs => role.map(Role::faction) == Some(Faction::Saboteurs),
        // The surviving bonded pair wins alone.
        Winner::Lovers => alive && linked,
        Winner::Aborted => false,
    }
}
