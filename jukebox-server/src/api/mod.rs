//! HTTP API
//!
//! All routes live under `/api/v1`. Handlers are thin: they extract and
//! validate the envelope, then call the gateway, arbiter or playlist
//! service on [`AppContext`].

pub mod handlers;
pub mod sse;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::state::AppContext;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the router with all routes attached to `ctx`
pub fn build_router(ctx: AppContext) -> Router {
    let api = Router::new()
        // Queue
        .route("/queue", post(handlers::queue_command))
        .route("/players/:id/queue", get(handlers::get_queue))

        // Playlists
        .route("/playlists", post(handlers::playlist_command))
        .route("/playlists/:id", get(handlers::get_playlist))

        // Sessions
        .route("/sessions", post(handlers::session_command))
        .route("/heartbeat", post(handlers::heartbeat))

        // Players
        .route("/players", get(handlers::list_players).post(handlers::create_player))
        .route(
            "/players/:id/status",
            get(handlers::get_status).post(handlers::report_status),
        )
        .route("/players/:id/command", post(handlers::player_command))
        .route(
            "/players/:id/settings",
            get(handlers::get_settings).post(handlers::update_settings),
        )

        // Media catalogue
        .route("/media", post(handlers::register_media))

        // SSE event stream
        .route("/events", get(sse::event_stream))

        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api/v1", api)
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        // Admin console and kiosk are served from other origins
        .layer(CorsLayer::permissive())
}

/// Bind and serve until `shutdown` resolves
pub async fn serve(
    config: &Config,
    ctx: AppContext,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = build_router(ctx);

    let addr = format!("{}:{}", config.bind_address, config.port);
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Http(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Http(format!("Server error: {}", e)))?;

    Ok(())
}
