//! Realtime Fanout
//!
//! Mutations stage full snapshot events while their transaction is still
//! open (so the revision and contents match what commits), then hand them
//! to [`Fanout::publish`] after commit. The fanout keeps the last revision
//! published per entity and drops anything not strictly newer, so
//! subscribers observe each entity in commit order even when two handlers
//! finish their commits and publish in the opposite order.

use crate::db::{playlists, queue, revision, sessions, settings, status};
use crate::error::Result;
use chrono::Utc;
use jukebox_common::events::{entity_key, EventBus, JukeboxEvent};
use jukebox_common::models::QueueSnapshot;
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, trace};

pub struct Fanout {
    bus: Arc<EventBus>,
    last_published: Mutex<HashMap<String, i64>>,
}

impl Fanout {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            last_published: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JukeboxEvent> {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Publish one event; returns false if it was dropped as stale
    pub fn publish(&self, event: JukeboxEvent) -> bool {
        let Some((key, revision)) = event.entity_revision() else {
            trace!(event_type = event.event_type(), "Publishing transient event");
            self.bus.emit_lossy(event);
            return true;
        };

        // Check and emit under one lock so two publishers cannot interleave
        let mut last = match self.last_published.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(&published) = last.get(&key) {
            if revision <= published {
                debug!(entity = %key, revision, published, "Dropping stale snapshot");
                return false;
            }
        }

        last.insert(key, revision);
        self.bus.emit_lossy(event);
        true
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = JukeboxEvent>) {
        for event in events {
            self.publish(event);
        }
    }
}

// ============================================================================
// Snapshot staging (call inside the mutating transaction)
// ============================================================================

/// Bump the queue revision and build the resulting snapshot
pub async fn stage_queue(conn: &mut SqliteConnection, player_id: &str) -> Result<JukeboxEvent> {
    revision::bump(&mut *conn, &entity_key("queue", player_id)).await?;
    queue_event(conn, player_id).await
}

pub async fn stage_status(conn: &mut SqliteConnection, player_id: &str) -> Result<JukeboxEvent> {
    revision::bump(&mut *conn, &entity_key("status", player_id)).await?;
    status_event(conn, player_id).await
}

pub async fn stage_sessions(conn: &mut SqliteConnection, player_id: &str) -> Result<JukeboxEvent> {
    revision::bump(&mut *conn, &entity_key("sessions", player_id)).await?;
    sessions_event(conn, player_id).await
}

pub async fn stage_playlists(conn: &mut SqliteConnection, player_id: &str) -> Result<JukeboxEvent> {
    revision::bump(&mut *conn, &entity_key("playlists", player_id)).await?;
    playlists_event(conn, player_id).await
}

pub async fn stage_settings(conn: &mut SqliteConnection, player_id: &str) -> Result<JukeboxEvent> {
    revision::bump(&mut *conn, &entity_key("settings", player_id)).await?;
    settings_event(conn, player_id).await
}

// ============================================================================
// Current snapshots (no revision bump)
// ============================================================================

pub async fn queue_snapshot(conn: &mut SqliteConnection, player_id: &str) -> Result<QueueSnapshot> {
    let revision = revision::current(&mut *conn, &entity_key("queue", player_id)).await?;
    let items = queue::list_unplayed(conn, player_id).await?;

    Ok(QueueSnapshot {
        player_id: player_id.to_string(),
        revision,
        items,
    })
}

pub async fn queue_event(conn: &mut SqliteConnection, player_id: &str) -> Result<JukeboxEvent> {
    Ok(JukeboxEvent::queue_snapshot(
        queue_snapshot(conn, player_id).await?,
    ))
}

pub async fn status_event(conn: &mut SqliteConnection, player_id: &str) -> Result<JukeboxEvent> {
    let revision = revision::current(&mut *conn, &entity_key("status", player_id)).await?;
    let status = status::get_status(&mut *conn, player_id).await?;
    Ok(JukeboxEvent::status_snapshot(revision, status))
}

pub async fn sessions_event(conn: &mut SqliteConnection, player_id: &str) -> Result<JukeboxEvent> {
    let revision = revision::current(&mut *conn, &entity_key("sessions", player_id)).await?;
    let priority = sessions::current_priority(&mut *conn, player_id).await?;

    Ok(JukeboxEvent::SessionSnapshot {
        player_id: player_id.to_string(),
        revision,
        priority_session_id: priority.map(|s| s.session_id),
        timestamp: Utc::now(),
    })
}

pub async fn playlists_event(conn: &mut SqliteConnection, player_id: &str) -> Result<JukeboxEvent> {
    let revision = revision::current(&mut *conn, &entity_key("playlists", player_id)).await?;
    let playlists = playlists::list_playlists(&mut *conn, player_id).await?;

    Ok(JukeboxEvent::PlaylistSnapshot {
        player_id: player_id.to_string(),
        revision,
        playlists,
        timestamp: Utc::now(),
    })
}

pub async fn settings_event(conn: &mut SqliteConnection, player_id: &str) -> Result<JukeboxEvent> {
    let revision = revision::current(&mut *conn, &entity_key("settings", player_id)).await?;
    let settings = settings::get_player_settings(&mut *conn, player_id).await?;

    Ok(JukeboxEvent::SettingsSnapshot {
        player_id: player_id.to_string(),
        revision,
        settings,
        timestamp: Utc::now(),
    })
}

/// Every current snapshot for a player, sent to a new subscriber first
pub async fn current_snapshots(conn: &mut SqliteConnection, player_id: &str) -> Result<Vec<JukeboxEvent>> {
    Ok(vec![
        sessions_event(&mut *conn, player_id).await?,
        status_event(&mut *conn, player_id).await?,
        queue_event(&mut *conn, player_id).await?,
        playlists_event(&mut *conn, player_id).await?,
        settings_event(&mut *conn, player_id).await?,
    ])
}
