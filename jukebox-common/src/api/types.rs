//! Wire envelopes for the jukebox HTTP surface
//!
//! Command envelopes keep every field optional so the server can answer a
//! missing or unknown field with a 400 validation error instead of a
//! deserialization rejection.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{PlayerState, QueueItem};

// ============================================================================
// Queue command surface
// ============================================================================

/// `POST /api/v1/queue` request envelope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueRequest {
    pub player_id: Option<String>,
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_ids: Option<Vec<String>>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub queue_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
}

impl QueueRequest {
    pub fn action(player_id: &str, action: &str) -> Self {
        Self {
            player_id: Some(player_id.to_string()),
            action: Some(action.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddResponse {
    pub queue_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextResponse {
    pub next_item: Option<QueueItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Session / heartbeat surface
// ============================================================================

/// `POST /api/v1/sessions` request envelope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionRequest {
    pub player_id: Option<String>,
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stored_session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub is_priority: bool,
    pub restored: bool,
}

/// `POST /api/v1/heartbeat` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub player_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub state: PlayerState,
    pub progress: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub is_priority: bool,
}

/// `POST /api/v1/players/:id/status` request, accepted only from the priority session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub session_id: String,
    pub state: PlayerState,
    #[serde(default)]
    pub current_media_id: Option<String>,
    #[serde(default)]
    pub current_queue_id: Option<String>,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub queue_exhausted: bool,
}

/// `POST /api/v1/players/:id/command` request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: Option<String>,
}

// ============================================================================
// Playlist command surface
// ============================================================================

/// Externally scraped media descriptor ingested by the `scrape` action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedMedia {
    pub source_id: String,
    pub title: String,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
}

/// `POST /api/v1/playlists` request envelope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaylistRequest {
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<Vec<ScrapedMedia>>,
}

impl PlaylistRequest {
    pub fn action(action: &str) -> Self {
        Self {
            action: Some(action.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadPlaylistResponse {
    pub loaded_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistCreatedResponse {
    pub playlist_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistItemResponse {
    pub item_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeResponse {
    pub imported_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedResponse {
    pub removed_count: usize,
}

// ============================================================================
// Players, media, settings
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatePlayerRequest {
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerCreatedResponse {
    pub player_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterMediaRequest {
    pub source_id: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRegisteredResponse {
    pub media_item_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub settings: BTreeMap<String, String>,
}
