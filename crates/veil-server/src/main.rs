use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use veil_server::config::ServerConfig;
use veil_server::{AppState, build_router, spawn_maintenance};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::load();
    config.validate();
    let listen_addr = config.listen_addr.clone();

    let state = AppState::new(config);
    spawn_maintenance(&state);

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {listen_addr}: {e}"));

    tracing::info!("Veil server listening on {listen_addr}");

    axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}
