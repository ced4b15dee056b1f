pub mod cache;
pub mod config;
pub mod error;
pub mod matchmaker;
pub mod rate_limit;
pub mod room_manager;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::HeaderValue;
use axum::response::IntoResponse;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};

pub use state::AppState;

pub fn build_router(state: AppState) -> Router {
    let cors = if state.config.allowed_origins.is_empty() {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/healthz", get(healthz))
        .layer(cors)
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "activeGames": state.scheduler.active_games(),
    }))
}

/// Spawn the background sweepers: session expiry, room deactivation,
/// game lifecycle, cache TTLs, and rate-limit bucket cleanup.
pub fn spawn_maintenance(state: &AppState) {
    let s = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(
            s.config.sessions.sweep_interval_secs,
        ));
        loop {
            interval.tick().await;
            s.sessions.write().await.sweep();
        }
    });

    let s = state.clone();
    tokio::spawn(async move {
        let empty_grace = Duration::from_secs(s.config.rooms.empty_grace_secs);
        let retention = Duration::from_secs(s.config.rooms.inactive_retention_secs);
        let mut interval =
            tokio::time::interval(Duration::from_secs(s.config.rooms.sweep_interval_secs));
        loop {
            interval.tick().await;
            let deactivated = s.rooms.write().await.sweep(empty_grace, retention);
            for code in deactivated {
                s.cache.delete_room_snapshot(&code).await;
                s.scheduler.force_end_room(&code, "room deactivated");
            }
        }
    });

    let _ = state.scheduler.spawn_sweeper(Arc::clone(&state.config));

    // Expired cache entries, including per-window rate buckets, are
    // dropped here.
    let s = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            s.cache.sweep().await;
        }
    });
}
