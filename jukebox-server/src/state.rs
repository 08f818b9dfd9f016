//! Shared application context passed to all handlers

use crate::arbiter::SessionArbiter;
use crate::config::RuntimeSettings;
use crate::fanout::Fanout;
use crate::gateway::QueueGateway;
use crate::playlist::PlaylistService;
use jukebox_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Axum state; cheap to clone
#[derive(Clone)]
pub struct AppContext {
    pub db: SqlitePool,
    pub fanout: Arc<Fanout>,
    pub settings: Arc<RuntimeSettings>,
}

impl AppContext {
    pub fn new(db: SqlitePool, settings: RuntimeSettings) -> Self {
        let bus = Arc::new(EventBus::new(settings.event_bus_capacity));
        Self {
            db,
            fanout: Arc::new(Fanout::new(bus)),
            settings: Arc::new(settings),
        }
    }

    pub fn gateway(&self) -> QueueGateway<'_> {
        QueueGateway::new(self)
    }

    pub fn arbiter(&self) -> SessionArbiter<'_> {
        SessionArbiter::new(self)
    }

    pub fn playlists(&self) -> PlaylistService<'_> {
        PlaylistService::new(self)
    }
}
