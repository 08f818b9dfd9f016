//! HTTP request handlers
//!
//! Request bodies are extracted as `Result<Json<T>, JsonRejection>` so a
//! malformed body answers with the usual `{"error": ...}` 400 instead of
//! axum's plain-text rejection.

use crate::db::{media, players, settings, status};
use crate::error::{Error, Result};
use crate::fanout;
use crate::gateway::{self, QueueOutcome};
use crate::playlist::{self, PlaylistDetail, PlaylistOutcome};
use crate::state::AppContext;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use jukebox_common::api::{
    CommandRequest, CreatePlayerRequest, HeartbeatRequest, HeartbeatResponse,
    MediaRegisteredResponse, PlayerCreatedResponse, PlaylistRequest, QueueRequest,
    RegisterMediaRequest, RegistrationResponse, SessionRequest, SettingsUpdate, StatusReport,
    SuccessResponse,
};
use jukebox_common::events::{JukeboxEvent, PlayerCommandKind};
use jukebox_common::models::{Player, PlayerStatus, QueueSnapshot};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;
use uuid::Uuid;

fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| Error::InvalidInput(rejection.body_text()))
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(Error::InvalidInput(format!("missing field: {}", field))),
    }
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub git_hash: String,
    pub build_profile: String,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "jukebox_server".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_profile: env!("BUILD_PROFILE").to_string(),
    })
}

// ============================================================================
// Queue
// ============================================================================

/// POST /queue
pub async fn queue_command(
    State(ctx): State<AppContext>,
    payload: std::result::Result<Json<QueueRequest>, JsonRejection>,
) -> Result<Json<QueueOutcome>> {
    let (player_id, command) = gateway::parse_request(body(payload)?)?;
    let outcome = ctx.gateway().execute(&player_id, command).await?;
    Ok(Json(outcome))
}

/// GET /players/:id/queue
pub async fn get_queue(
    State(ctx): State<AppContext>,
    Path(player_id): Path<String>,
) -> Result<Json<QueueSnapshot>> {
    let mut conn = ctx.db.acquire().await?;
    players::require_player(&mut *conn, &player_id).await?;
    Ok(Json(fanout::queue_snapshot(&mut conn, &player_id).await?))
}

// ============================================================================
// Playlists
// ============================================================================

/// POST /playlists
pub async fn playlist_command(
    State(ctx): State<AppContext>,
    payload: std::result::Result<Json<PlaylistRequest>, JsonRejection>,
) -> Result<Json<PlaylistOutcome>> {
    let command = playlist::parse_request(body(payload)?)?;
    Ok(Json(ctx.playlists().execute(command).await?))
}

/// GET /playlists/:id
pub async fn get_playlist(
    State(ctx): State<AppContext>,
    Path(playlist_id): Path<String>,
) -> Result<Json<PlaylistDetail>> {
    Ok(Json(ctx.playlists().get(&playlist_id).await?))
}

// ============================================================================
// Sessions
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SessionOutcome {
    Registered(RegistrationResponse),
    Success(SuccessResponse),
}

/// POST /sessions
pub async fn session_command(
    State(ctx): State<AppContext>,
    payload: std::result::Result<Json<SessionRequest>, JsonRejection>,
) -> Result<Json<SessionOutcome>> {
    let request = body(payload)?;
    let player_id = required(request.player_id, "player_id")?;
    let action = required(request.action, "action")?;

    let outcome = match action.as_str() {
        "register_session" => {
            let session_id = required(request.session_id, "session_id")?;
            SessionOutcome::Registered(
                ctx.arbiter()
                    .register_session(
                        &player_id,
                        &session_id,
                        request.stored_session_id.as_deref(),
                    )
                    .await?,
            )
        }
        "reset_priority" => {
            ctx.arbiter().reset_priority(&player_id).await?;
            SessionOutcome::Success(SuccessResponse::ok())
        }
        other => return Err(Error::InvalidInput(format!("unknown action: {}", other))),
    };

    Ok(Json(outcome))
}

/// POST /heartbeat
pub async fn heartbeat(
    State(ctx): State<AppContext>,
    payload: std::result::Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Result<Json<HeartbeatResponse>> {
    let request = body(payload)?;
    Ok(Json(ctx.arbiter().heartbeat(&request).await?))
}

// ============================================================================
// Players
// ============================================================================

/// GET /players
pub async fn list_players(State(ctx): State<AppContext>) -> Result<Json<Vec<Player>>> {
    Ok(Json(players::list_players(&ctx.db).await?))
}

/// POST /players
pub async fn create_player(
    State(ctx): State<AppContext>,
    payload: std::result::Result<Json<CreatePlayerRequest>, JsonRejection>,
) -> Result<Json<PlayerCreatedResponse>> {
    let request = body(payload)?;
    let name = required(request.name, "name")?;
    let player_id = match request.id {
        Some(id) if !id.trim().is_empty() => id,
        _ => Uuid::new_v4().to_string(),
    };

    let mut tx = ctx.db.begin().await?;
    if players::get_player(&mut *tx, &player_id).await?.is_some() {
        return Err(Error::InvalidInput(format!("player already exists: {}", player_id)));
    }
    players::create_player(&mut tx, &player_id, &name).await?;
    tx.commit().await?;

    info!(player_id = %player_id, name = %name, "Created player");
    Ok(Json(PlayerCreatedResponse { player_id }))
}

/// GET /players/:id/status
pub async fn get_status(
    State(ctx): State<AppContext>,
    Path(player_id): Path<String>,
) -> Result<Json<PlayerStatus>> {
    players::require_player(&ctx.db, &player_id).await?;
    Ok(Json(status::get_status(&ctx.db, &player_id).await?))
}

/// POST /players/:id/status
pub async fn report_status(
    State(ctx): State<AppContext>,
    Path(player_id): Path<String>,
    payload: std::result::Result<Json<StatusReport>, JsonRejection>,
) -> Result<Json<PlayerStatus>> {
    let report = body(payload)?;
    Ok(Json(ctx.arbiter().report_status(&player_id, &report).await?))
}

/// POST /players/:id/command
///
/// Relayed to the priority renderer over the event stream.
pub async fn player_command(
    State(ctx): State<AppContext>,
    Path(player_id): Path<String>,
    payload: std::result::Result<Json<CommandRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>> {
    let request = body(payload)?;
    let command: PlayerCommandKind = required(request.command, "command")?.parse()?;

    ctx.gateway().ensure_online(&player_id).await?;
    ctx.fanout
        .publish(JukeboxEvent::player_command(&player_id, command));

    info!(player_id = %player_id, %command, "Player command relayed");
    Ok(Json(SuccessResponse::ok()))
}

/// GET /players/:id/settings
pub async fn get_settings(
    State(ctx): State<AppContext>,
    Path(player_id): Path<String>,
) -> Result<Json<BTreeMap<String, String>>> {
    players::require_player(&ctx.db, &player_id).await?;
    Ok(Json(settings::get_player_settings(&ctx.db, &player_id).await?))
}

/// POST /players/:id/settings
pub async fn update_settings(
    State(ctx): State<AppContext>,
    Path(player_id): Path<String>,
    payload: std::result::Result<Json<SettingsUpdate>, JsonRejection>,
) -> Result<Json<BTreeMap<String, String>>> {
    let update = body(payload)?;
    if update.settings.keys().any(|key| key.trim().is_empty()) {
        return Err(Error::InvalidInput("setting keys must not be empty".to_string()));
    }

    let mut tx = ctx.db.begin().await?;
    players::require_player(&mut *tx, &player_id).await?;
    for (key, value) in &update.settings {
        settings::set_setting(&mut *tx, &player_id, key, value).await?;
    }
    let event = fanout::stage_settings(&mut tx, &player_id).await?;
    tx.commit().await?;

    let current = match &event {
        JukeboxEvent::SettingsSnapshot { settings, .. } => settings.clone(),
        _ => BTreeMap::new(),
    };
    ctx.fanout.publish(event);

    info!(player_id = %player_id, updated = update.settings.len(), "Settings updated");
    Ok(Json(current))
}

// ============================================================================
// Media catalogue
// ============================================================================

/// POST /media
pub async fn register_media(
    State(ctx): State<AppContext>,
    payload: std::result::Result<Json<RegisterMediaRequest>, JsonRejection>,
) -> Result<Json<MediaRegisteredResponse>> {
    let request = body(payload)?;
    let source_id = required(request.source_id, "source_id")?;
    let title = required(request.title, "title")?;

    let item = media::upsert_media(&ctx.db, &source_id, &title, request.duration_seconds).await?;
    Ok(Json(MediaRegisteredResponse {
        media_item_id: item.id,
    }))
}
