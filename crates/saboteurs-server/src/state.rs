use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;

use crate::config::ServerConfig;
use crate::registry::RoomRegistry;
use crate::stats::{StatsError, StatsStore};

pub type SharedRegistry = Arc<RwLock<RoomRegistry>>;

#[derive(Clone)]
pub struct AppState {
    pub registry: SharedRegistry,
    pub config: Arc<ServerConfig>,
    pub ws_connection_count: Arc<AtomicUsize>,
    pub ws_per_ip: Arc<Mutex<HashMap<IpAddr, usize>>>,
}

impl AppState {
    /// Fails only when the stats file exists but cannot be parsed.
    pub fn new(config: ServerConfig) -> Result<Self, StatsError> {
        let stats = StatsStore::open(&config.game.stats_path, config.game.history_cap)?;
        let registry = RoomRegistry::new(&config, stats);
        Ok(Self {
            registry: Arc::new(RwLock::new(registry)),
            config: Arc::new(config),
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
            ws_per_ip: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

/// RAII tally of open WebSocket connections.
pub struct ConnectionGuard {
    count: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    pub fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::Relaxed);
        Self { count }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }
}

/// RAII per-IP connection slot. `try_acquire` refuses once an address
/// holds `max` concurrent connections.
pub struct IpConnectionGuard {
    ip: IpAddr,
    map: Arc<Mutex<HashMap<IpAddr, usize>>>,
}

impl IpConnectionGuard {
    pub fn try_acquire(
        ip: IpAddr,
        map: Arc<Mutex<HashMap<IpAddr, usize>>>,
        max: usize,
    ) -> Option<Self> {
        {
            let mut counts = map.lock().unwrap_or_else(|e| e.into_inner());
            let count = counts.entry(ip).or_insert(0);
            if *count >= max {
                return None;
            }
            *count += 1;
        }
        Some(Self { ip, map })
    }
}

impl Drop for IpConnectionGuard {
    fn drop(&mut self) {
        let mut counts = self.map.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = counts.get_mut(&self.ip) {
            *count -= 1;
            if *count == 0 {
                counts.remove(&self.ip);
            }
        }
    }
}
