//! Player Session Arbiter (server side)
//!
//! Elects exactly one live renderer session per player as *priority*. The
//! single-writer invariant lives in the database (`idx_sessions_single_priority`),
//! so two registrations racing through separate transactions cannot both
//! win: the loser hits a unique violation or a busy snapshot, retries, re-reads
//! the now-live winner and ends up a slave.

use crate::db::{players, sessions, status};
use crate::error::{Error, Result};
use crate::fanout;
use crate::state::AppContext;
use chrono::{DateTime, Utc};
use jukebox_common::api::{HeartbeatRequest, HeartbeatResponse, RegistrationResponse, StatusReport};
use jukebox_common::events::JukeboxEvent;
use jukebox_common::models::{PlayerSession, PlayerStatus};
use jukebox_common::retry_on_conflict;
use sqlx::SqliteConnection;
use std::time::Duration;
use tracing::{debug, info, warn};

/// True while the session's last heartbeat is within `window` of `now`
pub fn is_live(session: &PlayerSession, window: Duration, now: DateTime<Utc>) -> bool {
    match (now - session.last_heartbeat).to_std() {
        Ok(silence) => silence <= window,
        // Heartbeat stamped after `now` (clock read earlier in this request)
        Err(_) => true,
    }
}

/// Fail unless the player exists and has a live priority session
pub async fn ensure_online(conn: &mut SqliteConnection, player_id: &str, window: Duration) -> Result<()> {
    players::require_player(&mut *conn, player_id).await?;

    match sessions::current_priority(&mut *conn, player_id).await? {
        Some(session) if is_live(&session, window, Utc::now()) => Ok(()),
        _ => Err(Error::PlayerOffline(player_id.to_string())),
    }
}

pub struct SessionArbiter<'a> {
    ctx: &'a AppContext,
}

impl<'a> SessionArbiter<'a> {
    pub fn new(ctx: &'a AppContext) -> Self {
        Self { ctx }
    }

    /// Register a renderer session and decide its role
    ///
    /// Priority is granted when no live priority session exists, when the
    /// caller already holds it, or when `stored_session_id` names the current
    /// priority session (the same instance reclaiming its role after reload;
    /// `restored = true`). Otherwise the session is recorded as a slave.
    pub async fn register_session(
        &self,
        player_id: &str,
        session_id: &str,
        stored_session_id: Option<&str>,
    ) -> Result<RegistrationResponse> {
        if session_id.trim().is_empty() {
            return Err(Error::InvalidInput("session_id must not be empty".to_string()));
        }
        players::require_player(&self.ctx.db, player_id).await?;

        let (response, events) =
            retry_on_conflict("session registration", &self.ctx.settings.retry, move || {
                self.try_register(player_id, session_id, stored_session_id)
            })
            .await?;

        self.ctx.fanout.publish_all(events);

        info!(
            player_id,
            session_id,
            is_priority = response.is_priority,
            restored = response.restored,
            "Session registered"
        );

        Ok(response)
    }

    async fn try_register(
        &self,
        player_id: &str,
        session_id: &str,
        stored_session_id: Option<&str>,
    ) -> Result<(RegistrationResponse, Vec<JukeboxEvent>)> {
        let now = Utc::now();
        let mut tx = self.ctx.db.begin().await?;

        let current = sessions::current_priority(&mut *tx, player_id).await?;

        let restored = matches!(
            (&current, stored_session_id),
            (Some(c), Some(stored)) if c.session_id == stored
        );

        let grant = match &current {
            None => true,
            Some(c) if c.session_id == session_id => true,
            Some(_) if restored => true,
            Some(c) => !is_live(c, self.ctx.settings.liveness_window, now),
        };

        let mut events = Vec::new();

        if grant {
            let holder_changes = current
                .as_ref()
                .map(|c| c.session_id != session_id)
                .unwrap_or(true);

            if holder_changes {
                if let Some(previous) = &current {
                    debug!(
                        player_id,
                        previous = %previous.session_id,
                        session_id,
                        "Superseding priority session"
                    );
                }
                sessions::demote_all(&mut *tx, player_id).await?;
            }

            sessions::upsert_session(&mut *tx, session_id, player_id, true, now).await?;

            if holder_changes {
                events.push(fanout::stage_sessions(&mut tx, player_id).await?);
            }
        } else {
            sessions::upsert_session(&mut *tx, session_id, player_id, false, now).await?;
        }

        tx.commit().await?;

        Ok((
            RegistrationResponse {
                is_priority: grant,
                restored: grant && restored,
            },
            events,
        ))
    }

    /// Refresh liveness and playback state for the priority session
    ///
    /// A heartbeat that does not name the current priority session (or
    /// names no session at all) is answered with `is_priority = false` and
    /// changes nothing, so the sender demotes itself.
    pub async fn heartbeat(&self, request: &HeartbeatRequest) -> Result<HeartbeatResponse> {
        validate_progress(request.progress)?;
        players::require_player(&self.ctx.db, &request.player_id).await?;

        let player_id = request.player_id.as_str();
        let now = Utc::now();
        let mut tx = self.ctx.db.begin().await?;

        let current = sessions::current_priority(&mut *tx, player_id).await?;
        let holder = match (current, request.session_id.as_deref()) {
            (Some(current), Some(sender)) if current.session_id == sender => current,
            (current, sender) => {
                debug!(
                    player_id,
                    sender = sender.unwrap_or("<none>"),
                    priority = current.as_ref().map(|c| c.session_id.as_str()).unwrap_or("<none>"),
                    "Heartbeat from non-priority session rejected"
                );
                return Ok(HeartbeatResponse { is_priority: false });
            }
        };

        sessions::touch_heartbeat(&mut *tx, &holder.session_id, now).await?;

        let mut status = status::get_status(&mut *tx, player_id).await?;
        status.state = request.state;
        status.progress = request.progress;
        status::write_status(&mut *tx, &status).await?;

        let event = fanout::stage_status(&mut tx, player_id).await?;
        tx.commit().await?;

        self.ctx.fanout.publish(event);

        Ok(HeartbeatResponse { is_priority: true })
    }

    /// Status write from the renderer; only the priority session may write
    pub async fn report_status(&self, player_id: &str, report: &StatusReport) -> Result<PlayerStatus> {
        validate_progress(report.progress)?;
        players::require_player(&self.ctx.db, player_id).await?;

        let now = Utc::now();
        let mut tx = self.ctx.db.begin().await?;

        match sessions::current_priority(&mut *tx, player_id).await? {
            Some(current) if current.session_id == report.session_id => {}
            _ => {
                warn!(player_id, session_id = %report.session_id, "Status write from non-priority session");
                return Err(Error::NotPriority(report.session_id.clone()));
            }
        }

        sessions::touch_heartbeat(&mut *tx, &report.session_id, now).await?;

        let mut status = status::get_status(&mut *tx, player_id).await?;
        status.state = report.state;
        status.current_media_id = report.current_media_id.clone();
        status.current_queue_id = report.current_queue_id.clone();
        status.progress = report.progress;
        status.queue_exhausted = report.queue_exhausted;
        status::write_status(&mut *tx, &status).await?;

        let event = fanout::stage_status(&mut tx, player_id).await?;
        tx.commit().await?;

        self.ctx.fanout.publish(event);

        Ok(status)
    }

    /// Clear every priority flag for the player immediately
    pub async fn reset_priority(&self, player_id: &str) -> Result<u64> {
        players::require_player(&self.ctx.db, player_id).await?;

        let mut tx = self.ctx.db.begin().await?;
        let demoted = sessions::demote_all(&mut *tx, player_id).await?;
        let event = fanout::stage_sessions(&mut tx, player_id).await?;
        tx.commit().await?;

        self.ctx.fanout.publish(event);

        info!(player_id, demoted, "Priority reset");
        Ok(demoted)
    }
}

fn validate_progress(progress: f64) -> Result<()> {
    if !progress.is_finite() || progress < 0.0 {
        return Err(Error::InvalidInput(format!("invalid progress: {}", progress)));
    }
    Ok(())
}
