use serde::{Deserialize, Serialize};

/// The two sides of the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Faction {
    Crew,
    Saboteurs,
}

/// Role identities. `Crewmate` is the plain filler role; the rest compete
/// for the special slots in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Saboteur,
    Crewmate,
    Doctor,
    SecurityChief,
    RadarOperator,
    AiAgent,
    Engineer,
    Chameleon,
}

impl Role {
    /// All special crew roles, in pool-fill priority order.
    pub const SPECIALS: &[Role] = &[
        Role::Doctor,
        Role::SecurityChief,
        Role::RadarOperator,
        Role::AiAgent,
        Role::Engineer,
        Role::Chameleon,
    ];

    pub fn faction(self) -> Faction {
        match self {
            Role::Saboteur => Faction::Saboteurs,
            _ => Faction::Crew,
        }
    }

    pub fn is_special(self) -> bool {
        Role::SPECIALS.contains(&self)
    }

    /// Stable string key used for lifetime statistics.
    pub fn key(self) -> &'static str {
        match self {
            Role::Saboteur => "saboteur",
            Role::Crewmate => "crewmate",
            Role::Doctor => "doctor",
            Role::SecurityChief => "security_chief",
            Role::RadarOperator => "radar_operator",
            Role::AiAgent => "ai_agent",
            Role::Engineer => "engineer",
            Role::Chameleon => "chameleon",
        }
    }
}

/// Number of saboteurs dealt for a party of `n` players.
pub fn saboteur_count(n: usize) -> usize {
    match n {
        0..=6 => 1,
        7..=11 => 2,
        _ => 3,
    }
}
