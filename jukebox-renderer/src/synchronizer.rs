//! Playback State Synchronizer
//!
//! Keeps the media engine, the local playback state and the server's queue
//! and status in step for one renderer instance.
//!
//! ```text
//! Idle -> Loading -> Playing <-> Paused
//!            ^          |
//!            |        Ended / Error
//!            +---- advance (next) ----+
//! ```
//!
//! Inputs are engine signals, fanout events (queue/status snapshots and
//! admin commands), role changes from the arbiter client, fade completions
//! and the stuck-loading watchdog. They are handled one at a time on a
//! single task; only skip fades run beside it.
//!
//! Advancement goes through [`AdvanceGuard`]: one advance at a time, and
//! duplicate-prone triggers (natural end, skip) are dropped during a short
//! cooldown after the previous advance completed.
//!
//! Only the priority instance touches the engine or writes to the server.
//! A slave mirrors status snapshots.

use crate::arbiter::Role;
use crate::client::PlayerApi;
use crate::config::Timing;
use crate::engine::{EngineSignal, MediaEngine, MediaFailure};
use crate::fade::{fade_out, FADE_STEPS};
use crate::Result;
use jukebox_common::api::StatusReport;
use jukebox_common::events::{JukeboxEvent, PlayerCommandKind};
use jukebox_common::models::{PlayerState, PlayerStatus, QueueItem, QueueSnapshot};
use jukebox_common::reconcile::OptimisticView;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Local playback state published to the arbiter client (heartbeats) and
/// to observers
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackReport {
    pub state: PlayerState,
    pub progress: f64,
    pub current_queue_id: Option<String>,
    pub queue_exhausted: bool,
    pub role: Role,
}

impl Default for PlaybackReport {
    fn default() -> Self {
        Self {
            state: PlayerState::Idle,
            progress: 0.0,
            current_queue_id: None,
            queue_exhausted: false,
            role: Role::Slave,
        }
    }
}

/// What asked for the queue to advance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceReason {
    /// Engine reported end of track
    Ended,
    /// Administrative skip
    Skip,
    /// Loading took too long
    Watchdog,
    /// Media failed to load or play
    Failure,
    /// Idle and the queue gained items
    QueueStart,
    /// Current row vanished from the queue
    CurrentRemoved,
    /// Promotion or admin play with nothing loaded
    Resume,
    /// Previous `next` request failed without the server advancing
    Retry,
}

impl AdvanceReason {
    /// Natural ends and skips arrive in bursts; the cooldown absorbs them
    fn respects_cooldown(&self) -> bool {
        matches!(self, AdvanceReason::Ended | AdvanceReason::Skip)
    }
}

/// Single-flight advance guard with post-completion cooldown
#[derive(Debug)]
pub struct AdvanceGuard {
    in_flight: bool,
    cooldown: Duration,
    cooldown_until: Option<Instant>,
}

impl AdvanceGuard {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            in_flight: false,
            cooldown,
            cooldown_until: None,
        }
    }

    /// Claim the guard; false means the request must be dropped
    pub fn try_begin(&mut self, now: Instant, respect_cooldown: bool) -> bool {
        if self.in_flight {
            return false;
        }
        if respect_cooldown {
            if let Some(until) = self.cooldown_until {
                if now < until {
                    return false;
                }
            }
        }
        self.in_flight = true;
        true
    }

    pub fn finish(&mut self, now: Instant) {
        self.in_flight = false;
        self.cooldown_until = Some(now + self.cooldown);
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }
}

pub struct Synchronizer {
    api: Arc<dyn PlayerApi>,
    engine: Arc<dyn MediaEngine>,
    session_id: String,
    timing: Timing,

    authoritative: bool,
    state: PlayerState,
    current: Option<QueueItem>,
    progress: f64,
    loading_deadline: Option<Instant>,
    retry_deadline: Option<Instant>,

    guard: AdvanceGuard,
    consecutive_failures: u32,
    breaker_open: bool,

    queue: OptimisticView<QueueSnapshot>,
    mirror: OptimisticView<PlayerStatus>,

    report: watch::Sender<PlaybackReport>,
    fade_done_tx: mpsc::Sender<()>,
    fade_done_rx: Option<mpsc::Receiver<()>>,
}

impl Synchronizer {
    pub fn new(
        api: Arc<dyn PlayerApi>,
        engine: Arc<dyn MediaEngine>,
        session_id: &str,
        timing: Timing,
    ) -> (Self, watch::Receiver<PlaybackReport>) {
        let player_id = api.player_id().to_string();
        let (report, report_rx) = watch::channel(PlaybackReport::default());
        let (fade_done_tx, fade_done_rx) = mpsc::channel(1);

        let synchronizer = Self {
            api,
            engine,
            session_id: session_id.to_string(),
            timing,
            authoritative: false,
            state: PlayerState::Idle,
            current: None,
            progress: 0.0,
            loading_deadline: None,
            retry_deadline: None,
            guard: AdvanceGuard::new(timing.advance_cooldown),
            consecutive_failures: 0,
            breaker_open: false,
            queue: OptimisticView::new(QueueSnapshot::empty(&player_id)),
            mirror: OptimisticView::new(PlayerStatus::idle(&player_id)),
            report,
            fade_done_tx,
            fade_done_rx: Some(fade_done_rx),
        };
        (synchronizer, report_rx)
    }

    /// Process inputs until cancelled or the event stream closes
    pub async fn run(
        mut self,
        mut signals: mpsc::Receiver<EngineSignal>,
        mut events: mpsc::Receiver<JukeboxEvent>,
        mut role: watch::Receiver<Role>,
        cancel: CancellationToken,
    ) {
        let Some(mut fade_done) = self.fade_done_rx.take() else {
            error!("Synchronizer started twice");
            return;
        };

        let initial = *role.borrow_and_update();
        self.apply_role(initial).await;
        let mut role_open = true;

        loop {
            let deadline = self.loading_deadline;
            let retry_at = self.retry_deadline;

            tokio::select! {
                _ = cancel.cancelled() => break,

                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        info!("Event channel closed; synchronizer stopping");
                        break;
                    }
                },

                Some(signal) = signals.recv() => self.handle_signal(signal).await,

                changed = role.changed(), if role_open => match changed {
                    Ok(()) => {
                        let next = *role.borrow_and_update();
                        self.apply_role(next).await;
                    }
                    Err(_) => role_open = false,
                },

                Some(()) = fade_done.recv() => self.advance().await,

                _ = sleep_until(deadline) => self.on_loading_timeout().await,

                _ = sleep_until(retry_at) => self.on_advance_retry().await,
            }
        }

        if self.authoritative {
            if let Err(e) = self.engine.stop().await {
                warn!(error = %e, "Failed to stop engine on shutdown");
            }
        }
        debug!("Synchronizer stopped");
    }

    // ------------------------------------------------------------------
    // Role
    // ------------------------------------------------------------------

    async fn apply_role(&mut self, role: Role) {
        match (role, self.authoritative) {
            (Role::Priority, false) => self.on_promoted().await,
            (Role::Slave, true) => self.on_demoted().await,
            _ => {}
        }
    }

    /// Resume the server's current item, or start the queue head
    async fn on_promoted(&mut self) {
        info!(player_id = self.api.player_id(), "Priority gained; taking over playback");
        self.authoritative = true;
        self.consecutive_failures = 0;
        self.breaker_open = false;

        let queue = match self.api.get_queue().await {
            Ok(queue) => queue,
            Err(e) => {
                warn!(error = %e, "Failed to fetch queue on promotion");
                self.set_idle();
                return;
            }
        };
        self.queue.apply_snapshot(queue.revision, queue.clone());

        let current_id = match self.api.get_status().await {
            Ok(status) => status.current_queue_id,
            Err(e) => {
                warn!(error = %e, "Failed to fetch status on promotion");
                None
            }
        };

        let resumable = current_id
            .and_then(|id| queue.items.iter().find(|item| item.id == id).cloned());

        match resumable {
            Some(item) => {
                info!(queue_id = %item.id, "Resuming current item");
                self.start_loading(item).await;
            }
            None if queue.head().is_some() => self.request_advance(AdvanceReason::Resume).await,
            None => self.set_idle(),
        }
    }

    async fn on_demoted(&mut self) {
        info!(player_id = self.api.player_id(), "Priority lost; mirroring status");
        self.authoritative = false;
        self.loading_deadline = None;
        self.retry_deadline = None;
        if let Err(e) = self.engine.stop().await {
            warn!(error = %e, "Failed to stop engine on demotion");
        }

        let mirrored = self.mirror.current();
        self.state = mirrored.state;
        self.progress = mirrored.progress;
        self.current = None;
        self.publish();
    }

    // ------------------------------------------------------------------
    // Fanout events
    // ------------------------------------------------------------------

    async fn handle_event(&mut self, event: JukeboxEvent) {
        if let Some(player_id) = event.player_id() {
            if player_id != self.api.player_id() {
                return;
            }
        }

        match event {
            JukeboxEvent::QueueSnapshot {
                player_id,
                revision,
                items,
                ..
            } => {
                self.on_queue_snapshot(QueueSnapshot {
                    player_id,
                    revision,
                    items,
                })
                .await
            }
            JukeboxEvent::StatusSnapshot { revision, status, .. } => {
                self.on_status_snapshot(revision, status)
            }
            JukeboxEvent::PlayerCommand { command, .. } => self.on_command(command).await,
            JukeboxEvent::Resync { .. } => self.resync().await,
            _ => {}
        }
    }

    async fn on_queue_snapshot(&mut self, snapshot: QueueSnapshot) {
        let revision = snapshot.revision;
        let speculative = self.queue.pending_count();
        if !self.queue.apply_snapshot(revision, snapshot) {
            debug!(revision, "Stale queue snapshot ignored");
            return;
        }
        if speculative > 0 {
            debug!(revision, discarded = speculative, "Speculative queue state replaced");
        }
        if !self.authoritative {
            return;
        }

        if self.breaker_open {
            info!(revision, "Queue changed; closing failure breaker");
            self.reset_breaker().await;
        }

        let has_head = self.queue.authoritative().head().is_some();
        let current_gone = self
            .current
            .as_ref()
            .map(|item| !self.queue.authoritative().contains(&item.id))
            .unwrap_or(false);

        match self.state {
            PlayerState::Idle if has_head => self.request_advance(AdvanceReason::QueueStart).await,
            PlayerState::Loading | PlayerState::Playing | PlayerState::Paused if current_gone => {
                self.on_current_removed().await
            }
            _ => {}
        }
    }

    /// The playing row left the queue. If another client already moved the
    /// server's pointer to a queued row, load that row; calling `next` here
    /// would mark it played unheard.
    async fn on_current_removed(&mut self) {
        if self.guard.in_flight() {
            debug!("Current row removed while an advance is in flight");
            return;
        }

        match self.server_current().await {
            Ok(Some(item)) => {
                if !self.guard.try_begin(Instant::now(), false) {
                    return;
                }
                info!(queue_id = %item.id, "Server already advanced; following its pointer");
                if let Err(e) = self.engine.stop().await {
                    warn!(error = %e, "Failed to stop engine");
                }
                self.start_loading(item).await;
                self.guard.finish(Instant::now());
            }
            Ok(None) => {
                info!("Current queue row removed; advancing");
                self.request_advance(AdvanceReason::CurrentRemoved).await
            }
            Err(e) => {
                warn!(error = %e, "Failed to read server pointer; advancing");
                self.request_advance(AdvanceReason::CurrentRemoved).await
            }
        }
    }

    /// Queued row named by the server's `current_queue_id`, if any
    async fn server_current(&mut self) -> Result<Option<QueueItem>> {
        let status = self.api.get_status().await?;
        let Some(current_id) = status.current_queue_id else {
            return Ok(None);
        };
        if let Some(item) = self.queued(&current_id) {
            return Ok(Some(item));
        }

        // Our snapshot may predate the pointer
        let queue = self.api.get_queue().await?;
        self.queue.apply_snapshot(queue.revision, queue);
        Ok(self.queued(&current_id))
    }

    fn queued(&self, queue_id: &str) -> Option<QueueItem> {
        self.queue
            .authoritative()
            .items
            .iter()
            .find(|item| item.id == queue_id)
            .cloned()
    }

    fn on_status_snapshot(&mut self, revision: i64, status: PlayerStatus) {
        if !self.mirror.apply_snapshot(revision, status) || self.authoritative {
            return;
        }

        let mirrored = self.mirror.authoritative();
        self.state = mirrored.state;
        self.progress = mirrored.progress;
        self.publish_with(mirrored.current_queue_id.clone(), mirrored.queue_exhausted);
    }

    async fn on_command(&mut self, command: PlayerCommandKind) {
        if !self.authoritative {
            return;
        }
        debug!(%command, state = ?self.state, "Admin command");

        match command {
            PlayerCommandKind::Skip => match self.state {
                PlayerState::Playing | PlayerState::Paused => {
                    self.request_advance(AdvanceReason::Skip).await
                }
                _ => debug!(state = ?self.state, "Skip ignored"),
            },
            PlayerCommandKind::Pause => {
                if self.state == PlayerState::Playing {
                    if let Err(e) = self.engine.pause().await {
                        warn!(error = %e, "Pause failed");
                    }
                }
            }
            PlayerCommandKind::Play => {
                if self.breaker_open {
                    info!("Admin play; closing failure breaker");
                    self.reset_breaker().await;
                    self.request_advance(AdvanceReason::Resume).await;
                    return;
                }
                match self.state {
                    PlayerState::Paused => {
                        if let Err(e) = self.engine.play().await {
                            warn!(error = %e, "Play failed");
                        }
                    }
                    PlayerState::Idle if self.queue.authoritative().head().is_some() => {
                        self.request_advance(AdvanceReason::Resume).await
                    }
                    _ => {}
                }
            }
        }
    }

    /// Refetch snapshots after missed events
    async fn resync(&mut self) {
        debug!("Resyncing snapshots");
        match self.api.get_queue().await {
            Ok(queue) => self.on_queue_snapshot(queue).await,
            Err(e) => warn!(error = %e, "Queue resync failed"),
        }

        if !self.authoritative {
            match self.api.get_status().await {
                Ok(status) => {
                    // Fetched status carries no revision; restart the mirror from it
                    self.mirror = OptimisticView::new(status.clone());
                    self.state = status.state;
                    self.progress = status.progress;
                    self.publish_with(status.current_queue_id, status.queue_exhausted);
                }
                Err(e) => warn!(error = %e, "Status resync failed"),
            }
        }
    }

    // ------------------------------------------------------------------
    // Engine signals
    // ------------------------------------------------------------------

    async fn handle_signal(&mut self, signal: EngineSignal) {
        if !self.authoritative {
            return;
        }

        match signal {
            EngineSignal::Ready => {
                if self.state == PlayerState::Loading {
                    if let Err(e) = self.engine.play().await {
                        warn!(error = %e, "Failed to start loaded item");
                    }
                }
            }
            EngineSignal::Playing => {
                self.loading_deadline = None;
                self.consecutive_failures = 0;
                self.state = PlayerState::Playing;
                self.report_status().await;
            }
            EngineSignal::Paused => {
                if self.state == PlayerState::Playing {
                    self.state = PlayerState::Paused;
                    self.report_status().await;
                }
            }
            EngineSignal::Progress(position) => {
                self.progress = position;
                self.publish();
            }
            EngineSignal::Ended => match self.state {
                PlayerState::Playing | PlayerState::Paused => {
                    self.request_advance(AdvanceReason::Ended).await
                }
                _ => debug!(state = ?self.state, "Ended ignored"),
            },
            EngineSignal::Error(failure) => match self.state {
                PlayerState::Loading | PlayerState::Playing | PlayerState::Paused => {
                    self.on_media_failure(failure).await
                }
                _ => debug!(?failure, state = ?self.state, "Engine error ignored"),
            },
        }
    }

    async fn on_media_failure(&mut self, failure: MediaFailure) {
        if self.guard.in_flight() {
            debug!(?failure, "Engine error during advance ignored");
            return;
        }

        let media_item_id = self.current.as_ref().map(|item| item.media_item_id.clone());
        warn!(?failure, media_item_id = ?media_item_id, "Media failed");

        if failure.is_unrecoverable() {
            if let Some(media_item_id) = media_item_id {
                match self.api.remove_media_globally(&media_item_id).await {
                    Ok(removed) => info!(media_item_id = %media_item_id, removed, "Removed unplayable media from playlists"),
                    Err(e) => warn!(media_item_id = %media_item_id, error = %e, "Failed to remove unplayable media"),
                }
            }
        }

        if self.record_failure().await {
            return;
        }
        self.request_advance(AdvanceReason::Failure).await;
    }

    async fn on_loading_timeout(&mut self) {
        self.loading_deadline = None;
        if !self.authoritative || self.state != PlayerState::Loading {
            return;
        }

        warn!(
            timeout = ?self.timing.loading_timeout,
            queue_id = ?self.current.as_ref().map(|item| item.id.as_str()),
            "Loading stalled; forcing advance"
        );
        if self.record_failure().await {
            return;
        }
        self.request_advance(AdvanceReason::Watchdog).await;
    }

    // ------------------------------------------------------------------
    // Failure breaker
    // ------------------------------------------------------------------

    /// Count a failure; true when the breaker tripped and playback stopped
    async fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        if self.consecutive_failures < self.timing.max_consecutive_failures {
            return false;
        }

        error!(
            failures = self.consecutive_failures,
            "Too many consecutive media failures; stopping playback"
        );
        self.breaker_open = true;
        self.loading_deadline = None;
        self.retry_deadline = None;
        if let Err(e) = self.engine.stop().await {
            warn!(error = %e, "Failed to stop engine");
        }

        // Absorb the queue revision our own advances produced so only a
        // later change closes the breaker
        match self.api.get_queue().await {
            Ok(queue) => {
                self.queue.apply_snapshot(queue.revision, queue);
            }
            Err(e) => warn!(error = %e, "Failed to fetch queue after breaker trip"),
        }

        self.state = PlayerState::Error;
        self.current = None;
        self.progress = 0.0;
        self.report_status().await;
        true
    }

    async fn reset_breaker(&mut self) {
        self.breaker_open = false;
        self.consecutive_failures = 0;
        self.state = PlayerState::Idle;
        self.report_status().await;
    }

    // ------------------------------------------------------------------
    // Advancement
    // ------------------------------------------------------------------

    async fn request_advance(&mut self, reason: AdvanceReason) {
        if !self
            .guard
            .try_begin(Instant::now(), reason.respects_cooldown())
        {
            debug!(?reason, "Advance request dropped");
            return;
        }

        if reason == AdvanceReason::Skip && !self.timing.fade_duration.is_zero() {
            self.spawn_fade();
            return;
        }
        self.advance().await;
    }

    /// Fade runs beside the event loop; the guard stays claimed until the
    /// advance that follows it completes
    fn spawn_fade(&self) {
        let engine = Arc::clone(&self.engine);
        let curve = self.timing.fade_curve;
        let duration = self.timing.fade_duration;
        let done = self.fade_done_tx.clone();

        tokio::spawn(async move {
            if let Err(e) = fade_out(engine.as_ref(), curve, duration, FADE_STEPS).await {
                warn!(error = %e, "Fade-out failed");
            }
            let _ = done.send(()).await;
        });
    }

    /// Request `next()` and load the result; caller holds the guard
    async fn advance(&mut self) {
        self.loading_deadline = None;
        self.retry_deadline = None;
        let previous = self.current.as_ref().map(|item| item.id.clone());
        if let Err(e) = self.engine.stop().await {
            warn!(error = %e, "Failed to stop engine before advance");
        }

        let finished = previous.clone();
        let speculation = self.queue.apply_speculative(move |queue: &mut QueueSnapshot| {
            if let Some(id) = &finished {
                queue.items.retain(|item| &item.id != id);
            }
        });

        match self.api.next().await {
            Ok(Some(item)) => {
                info!(queue_id = %item.id, media_item_id = %item.media_item_id, "Advanced");
                self.start_loading(item).await;
            }
            Ok(None) => {
                info!("Queue exhausted");
                self.set_idle();
            }
            Err(e) => {
                self.queue.discard(speculation);
                warn!(error = %e, "Advance failed; re-reading server state");
                self.recover_failed_advance(previous.as_deref()).await;
            }
        }

        self.guard.finish(Instant::now());
    }

    /// A failed `next` may still have committed. Load the server's current
    /// row if it moved past `previous`, otherwise ask again later.
    async fn recover_failed_advance(&mut self, previous: Option<&str>) {
        let fetched = match self.api.get_queue().await {
            Ok(queue) => self.api.get_status().await.map(|status| (queue, status)),
            Err(e) => Err(e),
        };
        let (queue, status) = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(error = %e, "Failed to re-read server state");
                self.set_idle();
                self.schedule_advance_retry();
                return;
            }
        };
        self.queue.apply_snapshot(queue.revision, queue.clone());

        let committed = status
            .current_queue_id
            .as_deref()
            .filter(|id| Some(*id) != previous)
            .and_then(|id| queue.items.iter().find(|item| item.id == id).cloned());

        match committed {
            Some(item) => {
                info!(queue_id = %item.id, "Server committed the advance; loading its current row");
                self.start_loading(item).await;
            }
            None => {
                self.set_idle();
                if queue.head().is_some() {
                    self.schedule_advance_retry();
                }
            }
        }
    }

    fn schedule_advance_retry(&mut self) {
        let delay = self.timing.advance_retry;
        debug!(?delay, "Advance retry scheduled");
        self.retry_deadline = Some(Instant::now() + delay);
    }

    async fn on_advance_retry(&mut self) {
        self.retry_deadline = None;
        if !self.authoritative || self.breaker_open || self.state != PlayerState::Idle {
            return;
        }
        self.request_advance(AdvanceReason::Retry).await;
    }

    async fn start_loading(&mut self, item: QueueItem) {
        self.state = PlayerState::Loading;
        self.progress = 0.0;
        self.loading_deadline = Some(Instant::now() + self.timing.loading_timeout);
        self.retry_deadline = None;
        self.current = Some(item.clone());
        self.publish();

        if let Err(e) = self.engine.set_fade_level(1.0).await {
            warn!(error = %e, "Failed to restore output level");
        }
        if let Err(e) = self.engine.load(&item).await {
            warn!(queue_id = %item.id, error = %e, "Load request failed");
        }
    }

    fn set_idle(&mut self) {
        self.state = PlayerState::Idle;
        self.current = None;
        self.progress = 0.0;
        self.publish();
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    fn publish(&self) {
        let current_queue_id = self.current.as_ref().map(|item| item.id.clone());
        self.publish_with(current_queue_id, self.breaker_open);
    }

    fn publish_with(&self, current_queue_id: Option<String>, queue_exhausted: bool) {
        self.report.send_replace(PlaybackReport {
            state: self.state,
            progress: self.progress,
            current_queue_id,
            queue_exhausted,
            role: if self.authoritative {
                Role::Priority
            } else {
                Role::Slave
            },
        });
    }

    /// Write status to the server; a 403 means priority was lost
    async fn report_status(&mut self) {
        self.publish();
        if !self.authoritative {
            return;
        }

        let report = StatusReport {
            session_id: self.session_id.clone(),
            state: self.state,
            current_media_id: self.current.as_ref().map(|item| item.media_item_id.clone()),
            current_queue_id: self.current.as_ref().map(|item| item.id.clone()),
            progress: self.progress,
            queue_exhausted: self.breaker_open,
        };

        match self.api.report_status(&report).await {
            Ok(_) => {}
            Err(e) if e.is_not_priority() => {
                warn!("Status write rejected; no longer priority");
                self.on_demoted().await;
            }
            Err(e) => warn!(error = %e, "Status write failed"),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
