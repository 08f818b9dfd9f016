//! Data models shared by the server and its clients
//!
//! Rows map 1:1 onto the SQLite tables created by `db::init`. Ids are UUID v4
//! strings; timestamps are UTC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Queue partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
pub enum QueueType {
    /// Background, playlist-sourced items
    Normal,
    /// Requested items that play before normal items
    Priority,
}

impl QueueType {
    pub const ALL: [QueueType; 2] = [QueueType::Priority, QueueType::Normal];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueType::Normal => "normal",
            QueueType::Priority => "priority",
        }
    }
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(QueueType::Normal),
            "priority" => Ok(QueueType::Priority),
            other => Err(Error::InvalidInput(format!("unknown queue type: {}", other))),
        }
    }
}

/// Player playback state as stored in `player_status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
pub enum PlayerState {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    Error,
}

impl PlayerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerState::Idle => "idle",
            PlayerState::Loading => "loading",
            PlayerState::Playing => "playing",
            PlayerState::Paused => "paused",
            PlayerState::Error => "error",
        }
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlayerState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(PlayerState::Idle),
            "loading" => Ok(PlayerState::Loading),
            "playing" => Ok(PlayerState::Playing),
            "paused" => Ok(PlayerState::Paused),
            "error" => Ok(PlayerState::Error),
            other => Err(Error::InvalidInput(format!("unknown player state: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Player {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct MediaItem {
    pub id: String,
    /// External identifier (video id, file path, URL)
    pub source_id: String,
    pub title: String,
    pub duration_seconds: Option<f64>,
}

/// One queue row, with display fields joined from `media_items`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct QueueItem {
    pub id: String,
    pub player_id: String,
    pub media_item_id: String,
    #[serde(rename = "type")]
    pub queue_type: QueueType,
    pub position: i64,
    pub requested_by: Option<String>,
    pub played_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    #[cfg_attr(feature = "sqlx", sqlx(default))]
    pub source_id: Option<String>,
    #[serde(default)]
    #[cfg_attr(feature = "sqlx", sqlx(default))]
    pub title: Option<String>,
    #[serde(default)]
    #[cfg_attr(feature = "sqlx", sqlx(default))]
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PlayerStatus {
    pub player_id: String,
    pub state: PlayerState,
    pub current_media_id: Option<String>,
    /// Queue row currently being played; `next()` marks exactly this row
    pub current_queue_id: Option<String>,
    /// Seconds into the current item
    pub progress: f64,
    /// Index into the active playlist of the current normal item
    pub now_playing_index: i64,
    /// Set when the renderer gave up after too many consecutive failures
    pub queue_exhausted: bool,
    pub updated_at: DateTime<Utc>,
}

impl PlayerStatus {
    /// Initial status for a player with no status row yet
    pub fn idle(player_id: &str) -> Self {
        Self {
            player_id: player_id.to_string(),
            state: PlayerState::Idle,
            current_media_id: None,
            current_queue_id: None,
            progress: 0.0,
            now_playing_index: 0,
            queue_exhausted: false,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PlayerSession {
    pub session_id: String,
    pub player_id: String,
    pub is_priority: bool,
    pub last_heartbeat: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Playlist {
    pub id: String,
    pub player_id: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PlaylistItem {
    pub id: String,
    pub playlist_id: String,
    pub media_item_id: String,
    pub position: i64,
}

/// Full authoritative queue contents for one player
///
/// Items are unplayed rows, priority partition first, each partition
/// ordered by position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub player_id: String,
    pub revision: i64,
    pub items: Vec<QueueItem>,
}

impl QueueSnapshot {
    pub fn empty(player_id: &str) -> Self {
        Self {
            player_id: player_id.to_string(),
            revision: 0,
            items: Vec::new(),
        }
    }

    /// Next item to play: head of priority partition, else head of normal
    pub fn head(&self) -> Option<&QueueItem> {
        self.partition(QueueType::Priority)
            .next()
            .or_else(|| self.partition(QueueType::Normal).next())
    }

    pub fn partition(&self, queue_type: QueueType) -> impl Iterator<Item = &QueueItem> {
        self.items
            .iter()
            .filter(move |item| item.queue_type == queue_type)
    }

    pub fn contains(&self, queue_id: &str) -> bool {
        self.items.iter().any(|item| item.id == queue_id)
    }
}
