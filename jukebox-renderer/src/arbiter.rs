//! Player Session Arbiter, renderer side
//!
//! Each renderer instance registers under a fresh random session id. The
//! id of a session that held priority is persisted so a restarted instance
//! can reclaim the role at once. While priority, the instance heartbeats;
//! while slave, it keeps re-registering so it can take over once the
//! priority session goes silent.
//!
//! The current [`Role`] is published on a `watch` channel for the
//! synchronizer.

use crate::client::PlayerApi;
use crate::config::Timing;
use crate::error::Result;
use crate::session_store::SessionStore;
use crate::synchronizer::PlaybackReport;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Playback authority of this instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Drives progression and writes status
    Priority,
    /// Mirrors status snapshots, never writes
    Slave,
}

pub struct ArbiterClient {
    api: Arc<dyn PlayerApi>,
    store: SessionStore,
    session_id: String,
    timing: Timing,
    role: watch::Sender<Role>,
}

impl ArbiterClient {
    pub fn new(
        api: Arc<dyn PlayerApi>,
        store: SessionStore,
        timing: Timing,
    ) -> (Self, watch::Receiver<Role>) {
        let (role, role_rx) = watch::channel(Role::Slave);
        let client = Self {
            api,
            store,
            session_id: Uuid::new_v4().to_string(),
            timing,
            role,
        };
        (client, role_rx)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn role(&self) -> Role {
        *self.role.borrow()
    }

    /// Register with the server, presenting any stored priority session id
    pub async fn register(&self) -> Result<Role> {
        let stored = match self.store.load().await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(path = %self.store.path().display(), error = %e, "Failed to read stored session id");
                None
            }
        };

        let response = self
            .api
            .register_session(&self.session_id, stored.as_deref())
            .await?;

        let role = if response.is_priority {
            Role::Priority
        } else {
            Role::Slave
        };

        if response.restored {
            info!(player_id = self.api.player_id(), "Restored priority from stored session");
        }
        self.set_role(role).await;
        Ok(role)
    }

    /// Send one heartbeat; a rejected heartbeat demotes this instance
    pub async fn heartbeat(&self, report: &PlaybackReport) -> Result<Role> {
        let response = self
            .api
            .heartbeat(&self.session_id, report.state, report.progress)
            .await?;

        if !response.is_priority {
            warn!(
                player_id = self.api.player_id(),
                session_id = %self.session_id,
                "Heartbeat rejected; priority lost"
            );
            self.set_role(Role::Slave).await;
            return Ok(Role::Slave);
        }
        Ok(Role::Priority)
    }

    /// Persist our id while priority, forget it otherwise, then publish
    async fn set_role(&self, role: Role) {
        let persisted = match role {
            Role::Priority => self.store.save(&self.session_id).await,
            Role::Slave => self.store.clear().await,
        };
        if let Err(e) = persisted {
            warn!(path = %self.store.path().display(), error = %e, "Failed to update stored session id");
        }

        let changed = self.role.send_if_modified(|current| {
            if *current == role {
                false
            } else {
                *current = role;
                true
            }
        });
        if changed {
            info!(
                player_id = self.api.player_id(),
                session_id = %self.session_id,
                ?role,
                "Session role changed"
            );
        }
    }

    /// Register, then heartbeat or re-register until cancelled
    pub async fn run(self, report: watch::Receiver<PlaybackReport>, cancel: CancellationToken) {
        if let Err(e) = self.register().await {
            warn!(error = %e, "Initial registration failed");
        }

        loop {
            let wait = match self.role() {
                Role::Priority => self.timing.heartbeat_interval,
                Role::Slave => self.timing.registration_retry,
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            let result = match self.role() {
                Role::Priority => {
                    let current = report.borrow().clone();
                    self.heartbeat(&current).await
                }
                Role::Slave => self.register().await,
            };

            // Transport failures keep the current role; the server's
            // liveness window decides when a silent holder is replaced
            if let Err(e) = result {
                warn!(role = ?self.role(), error = %e, "Session keep-alive failed");
            }
        }

        debug!(session_id = %self.session_id, "Arbiter task stopped");
    }

    pub fn spawn(
        self,
        report: watch::Receiver<PlaybackReport>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(report, cancel))
    }
}
