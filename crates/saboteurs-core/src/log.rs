use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::phase::Phase;
use crate::player::PlayerId;
use crate::win::Winner;

/// Events recorded into a room's match log. Everything here is broadcast
/// to every viewer, so entries never carry secret information: no saboteur
/// votes, no radar readings, no swap identities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEvent {
    PhaseChanged { from: Phase, to: Phase },
    PlayerJoined { player: PlayerId },
    PlayerLeft { player: PlayerId },
    RolesDealt,
    RolesExchanged,
    CaptainElected { player: PlayerId },
    CaptainTransferred { from: PlayerId, to: PlayerId },
    Death { player: PlayerId },
    Ejected { player: PlayerId },
    VoteTied { candidates: Vec<PlayerId> },
    RevengeTaken { target: PlayerId },
    GameStarted,
    GameEnded { winner: Winner },
    GameAborted,
    RoomReset,
}

/// One timestamped log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Seconds since the Unix epoch.
    pub ts: u64,
    #[serde(flatten)]
    pub event: LogEvent,
}

/// Append-only, capacity-bounded event history. The oldest entries are
/// evicted once the cap is reached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchLog {
    entries: VecDeque<LogEntry>,
    cap: usize,
}

/// Default retention for a room's match log.
pub const DEFAULT_LOG_CAP: usize = 200;

impl MatchLog {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(cap.min(64)),
            cap,
        }
    }

    pub fn push(&mut self, event: LogEvent) {
        if self.cap == 0 {
            return;
        }
        while self.entries.len() >= self.cap {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            ts: timestamp_now(),
            event,
        });
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn to_vec(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }
}

/// Current wall-clock time as seconds since the Unix epoch.
pub fn timestamp_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
