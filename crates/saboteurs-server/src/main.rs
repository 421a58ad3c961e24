use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use saboteurs_server::config::ServerConfig;
use saboteurs_server::{build_app, spawn_sweeper};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "saboteurs.toml".to_string());
    let config = ServerConfig::load(&config_path);
    config.validate();
    let listen_addr = config.listen_addr.clone();

    let (app, state) = match build_app(config) {
        Ok(built) => built,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize state");
            std::process::exit(1);
        },
    };
    spawn_sweeper(state);

    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %listen_addr, error = %e, "Failed to bind");
            std::process::exit(1);
        },
    };
    tracing::info!(addr = %listen_addr, "Saboteurs server listening");

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        tracing::error!(error = %e, "Server exited with error");
    }
}
