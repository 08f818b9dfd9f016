//! Event types for the jukebox realtime fanout
//!
//! Provides the shared event definitions and the in-process EventBus.
//!
//! Every store commit is announced as a *full snapshot* of the changed
//! entity, never a diff. Snapshots carry the per-entity revision read inside
//! the committing transaction so subscribers can discard anything older than
//! what they already hold (last-snapshot-wins).

mod command_types;

pub use command_types::PlayerCommandKind;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{PlayerStatus, Playlist, QueueItem, QueueSnapshot};

/// Jukebox event types
///
/// Shared by the server (publisher) and every client (admin console, kiosk,
/// renderer). Serialized with an internal `type` tag for SSE transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JukeboxEvent {
    /// Queue contents changed
    ///
    /// Triggers:
    /// - Admin/kiosk: replace displayed queue
    /// - Renderer: start playback when idle, advance when current row vanished
    QueueSnapshot {
        player_id: String,
        /// Per-player queue revision
        revision: i64,
        /// Unplayed items, priority partition first
        items: Vec<QueueItem>,
        timestamp: DateTime<Utc>,
    },

    /// Player status changed (state, current item, progress)
    StatusSnapshot {
        player_id: String,
        revision: i64,
        status: PlayerStatus,
        timestamp: DateTime<Utc>,
    },

    /// Per-player settings changed
    SettingsSnapshot {
        player_id: String,
        revision: i64,
        settings: BTreeMap<String, String>,
        timestamp: DateTime<Utc>,
    },

    /// Priority session assignment changed
    SessionSnapshot {
        player_id: String,
        revision: i64,
        /// Session currently holding playback authority (None after reset)
        priority_session_id: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Playlists (names, active flag) changed
    PlaylistSnapshot {
        player_id: String,
        revision: i64,
        playlists: Vec<Playlist>,
        timestamp: DateTime<Utc>,
    },

    /// Administrative playback command for the priority renderer
    ///
    /// Transient: not versioned, not replayed to late subscribers.
    PlayerCommand {
        player_id: String,
        command: PlayerCommandKind,
        request_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Subscriber fell behind and missed events; refetch snapshots
    Resync {
        player_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl JukeboxEvent {
    pub fn queue_snapshot(snapshot: QueueSnapshot) -> Self {
        JukeboxEvent::QueueSnapshot {
            player_id: snapshot.player_id,
            revision: snapshot.revision,
            items: snapshot.items,
            timestamp: Utc::now(),
        }
    }

    pub fn status_snapshot(revision: i64, status: PlayerStatus) -> Self {
        JukeboxEvent::StatusSnapshot {
            player_id: status.player_id.clone(),
            revision,
            status,
            timestamp: Utc::now(),
        }
    }

    pub fn player_command(player_id: &str, command: PlayerCommandKind) -> Self {
        JukeboxEvent::PlayerCommand {
            player_id: player_id.to_string(),
            command,
            request_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        }
    }

    /// Player this event concerns (None for broadcast resyncs)
    pub fn player_id(&self) -> Option<&str> {
        match self {
            JukeboxEvent::QueueSnapshot { player_id, .. }
            | JukeboxEvent::StatusSnapshot { player_id, .. }
            | JukeboxEvent::SettingsSnapshot { player_id, .. }
            | JukeboxEvent::SessionSnapshot { player_id, .. }
            | JukeboxEvent::PlaylistSnapshot { player_id, .. }
            | JukeboxEvent::PlayerCommand { player_id, .. } => Some(player_id),
            JukeboxEvent::Resync { player_id, .. } => player_id.as_deref(),
        }
    }

    /// Versioned entity key and revision, for snapshot events only
    ///
    /// Keys match the `revisions` table (`queue:<player>`, `status:<player>`, ...).
    pub fn entity_revision(&self) -> Option<(String, i64)> {
        match self {
            JukeboxEvent::QueueSnapshot { player_id, revision, .. } => {
                Some((entity_key("queue", player_id), *revision))
            }
            JukeboxEvent::StatusSnapshot { player_id, revision, .. } => {
                Some((entity_key("status", player_id), *revision))
            }
            JukeboxEvent::SettingsSnapshot { player_id, revision, .. } => {
                Some((entity_key("settings", player_id), *revision))
            }
            JukeboxEvent::SessionSnapshot { player_id, revision, .. } => {
                Some((entity_key("sessions", player_id), *revision))
            }
            JukeboxEvent::PlaylistSnapshot { player_id, revision, .. } => {
                Some((entity_key("playlists", player_id), *revision))
            }
            JukeboxEvent::PlayerCommand { .. } | JukeboxEvent::Resync { .. } => None,
        }
    }

    /// SSE `event:` field value
    pub fn event_type(&self) -> &'static str {
        match self {
            JukeboxEvent::QueueSnapshot { .. } => "QueueSnapshot",
            JukeboxEvent::StatusSnapshot { .. } => "StatusSnapshot",
            JukeboxEvent::SettingsSnapshot { .. } => "SettingsSnapshot",
            JukeboxEvent::SessionSnapshot { .. } => "SessionSnapshot",
            JukeboxEvent::PlaylistSnapshot { .. } => "PlaylistSnapshot",
            JukeboxEvent::PlayerCommand { .. } => "PlayerCommand",
            JukeboxEvent::Resync { .. } => "Resync",
        }
    }
}

/// Revision key for an entity kind and player
pub fn entity_key(kind: &str, player_id: &str) -> String {
    format!("{}:{}", kind, player_id)
}

/// Central event distribution bus
///
/// Wraps a `tokio::broadcast` channel. Slow subscribers lag (and are told to
/// resync) rather than blocking publishers.
pub struct EventBus {
    tx: broadcast::Sender<JukeboxEvent>,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use jukebox_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(1000);
    /// let _rx = event_bus.subscribe();
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<JukeboxEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: JukeboxEvent) {
        let _ = self.tx.send(event);
    }
}
