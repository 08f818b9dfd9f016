//! Shared fixtures for renderer tests: a scripted server API, a recording
//! media engine, and a harness running the synchronizer under paused time.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use jukebox_common::api::{HeartbeatResponse, RegistrationResponse, StatusReport};
use jukebox_common::events::{JukeboxEvent, PlayerCommandKind};
use jukebox_common::models::{PlayerState, PlayerStatus, QueueItem, QueueSnapshot, QueueType};
use jukebox_common::FadeCurve;
use jukebox_renderer::arbiter::Role;
use jukebox_renderer::client::PlayerApi;
use jukebox_renderer::config::Timing;
use jukebox_renderer::engine::{EngineSignal, MediaEngine, MediaFailure};
use jukebox_renderer::synchronizer::{PlaybackReport, Synchronizer};
use jukebox_renderer::{Error, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const PLAYER: &str = "bar";

pub fn item(id: &str) -> QueueItem {
    QueueItem {
        id: id.to_string(),
        player_id: PLAYER.to_string(),
        media_item_id: format!("media-{}", id),
        queue_type: QueueType::Normal,
        position: 0,
        requested_by: None,
        played_at: None,
        created_at: Utc::now(),
        source_id: Some(format!("yt:{}", id)),
        title: Some(id.to_uppercase()),
        duration_seconds: Some(200.0),
    }
}

pub fn items(ids: &[&str]) -> Vec<QueueItem> {
    ids.iter().map(|id| item(id)).collect()
}

pub fn test_timing() -> Timing {
    Timing {
        heartbeat_interval: Duration::from_secs(3),
        registration_retry: Duration::from_secs(5),
        fade_duration: Duration::from_secs(2),
        fade_curve: FadeCurve::Linear,
        loading_timeout: Duration::from_secs(4),
        advance_cooldown: Duration::from_secs(1),
        advance_retry: Duration::from_secs(2),
        max_consecutive_failures: 5,
        reconnect_delay: Duration::from_secs(1),
    }
}

// ============================================================================
// Scripted server
// ============================================================================

#[derive(Debug)]
pub struct ApiState {
    /// Unplayed rows; `next()` marks the head current and drops the old current
    pub queue: VecDeque<QueueItem>,
    pub current: Option<QueueItem>,
    pub revision: i64,
    pub status: PlayerStatus,
    pub next_calls: Vec<Instant>,
    pub reports: Vec<StatusReport>,
    pub removed_media: Vec<String>,
    pub reject_status: bool,
    pub grant_priority: bool,
    pub heartbeat_priority: bool,
    pub registrations: Vec<(String, Option<String>)>,
    pub heartbeats: Vec<(PlayerState, f64)>,
    pub offline: bool,
    /// Upcoming `next()` calls that fail before touching the queue
    pub fail_next: u32,
    /// Upcoming `next()` calls that commit but answer with an error
    pub fail_next_after_commit: u32,
}

pub struct MockApi {
    player_id: String,
    pub state: Mutex<ApiState>,
}

impl MockApi {
    pub fn new(queue: Vec<QueueItem>) -> Arc<Self> {
        Arc::new(Self {
            player_id: PLAYER.to_string(),
            state: Mutex::new(ApiState {
                queue: queue.into(),
                current: None,
                revision: 1,
                status: PlayerStatus::idle(PLAYER),
                next_calls: Vec::new(),
                reports: Vec::new(),
                removed_media: Vec::new(),
                reject_status: false,
                grant_priority: true,
                heartbeat_priority: true,
                registrations: Vec::new(),
                heartbeats: Vec::new(),
                offline: false,
                fail_next: 0,
                fail_next_after_commit: 0,
            }),
        })
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut ApiState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn next_count(&self) -> usize {
        self.with(|s| s.next_calls.len())
    }

    /// Current snapshot as the server would publish it
    pub fn snapshot(&self) -> QueueSnapshot {
        self.with(|s| snapshot_of(s))
    }
}

fn snapshot_of(state: &ApiState) -> QueueSnapshot {
    let mut items: Vec<QueueItem> = state.current.iter().cloned().collect();
    items.extend(state.queue.iter().cloned());
    QueueSnapshot {
        player_id: PLAYER.to_string(),
        revision: state.revision,
        items,
    }
}

/// Server-side `next`: drop the current row and promote the head
pub fn advance_queue(state: &mut ApiState) -> Option<QueueItem> {
    state.current = state.queue.pop_front();
    state.revision += 1;
    state.status.current_queue_id = state.current.as_ref().map(|i| i.id.clone());
    state.status.current_media_id = state.current.as_ref().map(|i| i.media_item_id.clone());
    state.current.clone()
}

fn conflict_error() -> Error {
    Error::Api {
        status: 500,
        message: "Conflict retries exhausted: queue next".to_string(),
    }
}

fn unreachable_error() -> Error {
    Error::Api {
        status: 503,
        message: "server unreachable".to_string(),
    }
}

#[async_trait]
impl PlayerApi for MockApi {
    fn player_id(&self) -> &str {
        &self.player_id
    }

    async fn register_session(
        &self,
        session_id: &str,
        stored_session_id: Option<&str>,
    ) -> Result<RegistrationResponse> {
        self.with(|s| {
            if s.offline {
                return Err(unreachable_error());
            }
            s.registrations
                .push((session_id.to_string(), stored_session_id.map(str::to_string)));
            Ok(RegistrationResponse {
                is_priority: s.grant_priority,
                restored: s.grant_priority && stored_session_id.is_some(),
            })
        })
    }

    async fn heartbeat(
        &self,
        _session_id: &str,
        state: PlayerState,
        progress: f64,
    ) -> Result<HeartbeatResponse> {
        self.with(|s| {
            if s.offline {
                return Err(unreachable_error());
            }
            s.heartbeats.push((state, progress));
            Ok(HeartbeatResponse {
                is_priority: s.heartbeat_priority,
            })
        })
    }

    async fn report_status(&self, report: &StatusReport) -> Result<PlayerStatus> {
        self.with(|s| {
            if s.reject_status {
                return Err(Error::Api {
                    status: 403,
                    message: format!("Session is not priority: {}", report.session_id),
                });
            }
            s.reports.push(report.clone());
            s.status.state = report.state;
            s.status.current_queue_id = report.current_queue_id.clone();
            s.status.current_media_id = report.current_media_id.clone();
            s.status.queue_exhausted = report.queue_exhausted;
            Ok(s.status.clone())
        })
    }

    async fn next(&self) -> Result<Option<QueueItem>> {
        self.with(|s| {
            s.next_calls.push(Instant::now());
            if s.fail_next > 0 {
                s.fail_next -= 1;
                return Err(conflict_error());
            }
            advance_queue(s);
            if s.fail_next_after_commit > 0 {
                s.fail_next_after_commit -= 1;
                return Err(conflict_error());
            }
            Ok(s.current.clone())
        })
    }

    async fn remove_media_globally(&self, media_item_id: &str) -> Result<usize> {
        self.with(|s| {
            s.removed_media.push(media_item_id.to_string());
            Ok(1)
        })
    }

    async fn get_queue(&self) -> Result<QueueSnapshot> {
        Ok(self.snapshot())
    }

    async fn get_status(&self) -> Result<PlayerStatus> {
        Ok(self.with(|s| s.status.clone()))
    }
}

// ============================================================================
// Recording engine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineBehavior {
    /// Ready on load, Playing on play
    Normal,
    /// Load never completes
    Stall,
    /// Every load fails
    Fail(MediaFailure),
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Load(String),
    Play,
    Pause,
    Stop,
    Level(f32),
}

pub struct MockEngine {
    signals: mpsc::Sender<EngineSignal>,
    behavior: Mutex<EngineBehavior>,
    pub calls: Mutex<Vec<(Instant, EngineCall)>>,
}

impl MockEngine {
    pub fn new(signals: mpsc::Sender<EngineSignal>, behavior: EngineBehavior) -> Arc<Self> {
        Arc::new(Self {
            signals,
            behavior: Mutex::new(behavior),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn set_behavior(&self, behavior: EngineBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> Vec<(Instant, EngineCall)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn loads(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|(_, call)| match call {
                EngineCall::Load(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Levels below full, i.e. fade steps
    pub fn fade_levels(&self) -> Vec<(Instant, f32)> {
        self.calls()
            .into_iter()
            .filter_map(|(at, call)| match call {
                EngineCall::Level(level) if level < 1.0 => Some((at, level)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().unwrap().push((Instant::now(), call));
    }

    async fn send(&self, signal: EngineSignal) -> Result<()> {
        self.signals
            .send(signal)
            .await
            .map_err(|_| Error::Media("receiver dropped".to_string()))
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    async fn load(&self, item: &QueueItem) -> Result<()> {
        self.record(EngineCall::Load(item.id.clone()));
        let behavior = *self.behavior.lock().unwrap();
        match behavior {
            EngineBehavior::Normal => self.send(EngineSignal::Ready).await,
            EngineBehavior::Stall => Ok(()),
            EngineBehavior::Fail(failure) => self.send(EngineSignal::Error(failure)).await,
        }
    }

    async fn play(&self) -> Result<()> {
        self.record(EngineCall::Play);
        self.send(EngineSignal::Playing).await
    }

    async fn pause(&self) -> Result<()> {
        self.record(EngineCall::Pause);
        self.send(EngineSignal::Paused).await
    }

    async fn stop(&self) -> Result<()> {
        self.record(EngineCall::Stop);
        Ok(())
    }

    async fn set_fade_level(&self, level: f32) -> Result<()> {
        self.record(EngineCall::Level(level));
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub api: Arc<MockApi>,
    pub engine: Arc<MockEngine>,
    pub signals: mpsc::Sender<EngineSignal>,
    pub events: mpsc::Sender<JukeboxEvent>,
    pub role: watch::Sender<Role>,
    pub report: watch::Receiver<PlaybackReport>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
}

impl Harness {
    pub fn start(api: Arc<MockApi>, behavior: EngineBehavior, timing: Timing, role: Role) -> Self {
        let (signal_tx, signal_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);
        let (role_tx, role_rx) = watch::channel(role);
        let engine = MockEngine::new(signal_tx.clone(), behavior);

        let (synchronizer, report) = Synchronizer::new(
            api.clone(),
            engine.clone(),
            "session-under-test",
            timing,
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(synchronizer.run(signal_rx, event_rx, role_rx, cancel.clone()));

        Self {
            api,
            engine,
            signals: signal_tx,
            events: event_tx,
            role: role_tx,
            report,
            cancel,
            task,
        }
    }

    /// Wait (in virtual time) until the published report satisfies `pred`
    pub async fn wait_for(&mut self, pred: impl FnMut(&PlaybackReport) -> bool) -> PlaybackReport {
        tokio::time::timeout(Duration::from_secs(60), self.report.wait_for(pred))
            .await
            .expect("timed out waiting for playback report")
            .expect("synchronizer stopped")
            .clone()
    }

    pub async fn wait_playing(&mut self, queue_id: &str) -> PlaybackReport {
        let queue_id = queue_id.to_string();
        self.wait_for(move |r| {
            r.state == PlayerState::Playing && r.current_queue_id.as_deref() == Some(queue_id.as_str())
        })
        .await
    }

    pub async fn signal(&self, signal: EngineSignal) {
        self.signals.send(signal).await.unwrap();
    }

    pub async fn command(&self, command: PlayerCommandKind) {
        self.events
            .send(JukeboxEvent::player_command(PLAYER, command))
            .await
            .unwrap();
    }

    pub async fn publish_queue(&self) {
        self.events
            .send(JukeboxEvent::queue_snapshot(self.api.snapshot()))
            .await
            .unwrap();
    }

    /// Let every ready task run and a little virtual time pass
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.task.await.unwrap();
    }
}
