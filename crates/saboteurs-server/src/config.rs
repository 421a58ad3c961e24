use std::time::Duration;

use serde::Deserialize;

use saboteurs_core::engine::{EngineRules, TieFallback};

/// Top-level server configuration, loaded from `saboteurs.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub web_root: String,
    pub limits: LimitsConfig,
    pub rooms: RoomsConfig,
    pub game: GameConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            web_root: "web".to_string(),
            limits: LimitsConfig::default(),
            rooms: RoomsConfig::default(),
            game: GameConfig::default(),
        }
    }
}

/// Infrastructure limits (connection caps, buffer sizes, rate limits).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    pub ws_rate_limit_per_sec: f64,
    pub player_message_buffer: usize,
    /// Maximum concurrent WebSocket connections per IP address.
    pub max_ws_per_ip: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 200,
            ws_rate_limit_per_sec: 20.0,
            player_message_buffer: 256,
            max_ws_per_ip: 10,
        }
    }
}

/// Room lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    /// How long a disconnected player keeps their seat before being
    /// promoted to Left.
    pub grace_period_secs: u64,
    /// Minimum phase age before the host may force-advance.
    pub force_advance_min_secs: u64,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 3600,
            sweep_interval_secs: 10,
            grace_period_secs: 60,
            force_advance_min_secs: 30,
        }
    }
}

/// Game-rule policy knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub min_players: usize,
    pub day_tie_fallback: TieFallback,
    pub stats_path: String,
    /// Per-player match history retention in the stats store.
    pub history_cap: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            min_players: 4,
            day_tie_fallback: TieFallback::Random,
            stats_path: "stats.json".to_string(),
            history_cap: 50,
        }
    }
}

impl ServerConfig {
    /// Load from a TOML file, falling back to defaults when the file is
    /// missing. A present-but-invalid file is fatal.
    pub fn load(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path, "Loaded configuration");
                    config
                },
                Err(e) => {
                    tracing::error!(path, error = %e, "Invalid configuration file");
                    std::process::exit(1);
                },
            },
            Err(_) => {
                tracing::info!(path, "No config file, using defaults");
                Self::default()
            },
        }
    }

    /// Validate configuration, exiting on fatal issues.
    pub fn validate(&self) {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            tracing::error!(
                addr = %self.listen_addr,
                "listen_addr is not a valid socket address"
            );
            std::process::exit(1);
        }
        if self.game.min_players < 4 {
            tracing::warn!(
                min_players = self.game.min_players,
                "min_players below 4 makes the role pool degenerate"
            );
        }
    }

    /// The engine policy derived from this config.
    pub fn engine_rules(&self) -> EngineRules {
        EngineRules {
            min_active_players: self.game.min_players,
            day_tie_fallback: self.game.day_tie_fallback,
            force_advance_min: Duration::from_secs(self.rooms.force_advance_min_secs),
        }
    }
}
