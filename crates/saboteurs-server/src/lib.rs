pub mod config;
pub mod health;
pub mod registry;
pub mod state;
pub mod stats;
pub mod ws;

use std::time::Duration;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use config::ServerConfig;
use state::AppState;
use stats::StatsError;

/// Build the Axum router and application state from a config.
pub fn build_app(config: ServerConfig) -> Result<(Router<()>, AppState), StatsError> {
    let web_root = config.web_root.clone();
    let state = AppState::new(config)?;

    let app = Router::new()
        .route("/ws", axum::routing::get(ws::ws_handler))
        .route("/health", axum::routing::get(health::health_check))
        .fallback_service(ServeDir::new(&web_root))
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    Ok((app, state))
}

/// Background task driving registry cleanup: reconnection-grace expiry,
/// stale session eviction, idle room removal.
pub fn spawn_sweeper(state: AppState) {
    let interval = Duration::from_secs(state.config.rooms.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let mut registry = state.registry.write().await;
            registry.sweep();
        }
    });
}
