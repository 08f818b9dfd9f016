//! Media engine seam
//!
//! The synchronizer drives playback through [`MediaEngine`] and learns what
//! the engine did from [`EngineSignal`]s on an mpsc channel. The engine
//! owns the sending half of that channel.
//!
//! [`HeadlessEngine`] plays nothing: it advances a virtual position once
//! per tick and reports progress and end of track. It backs the binary
//! when no output device is attached and keeps the state machine runnable
//! against a real server.

use crate::error::{Error, Result};
use async_trait::async_trait;
use jukebox_common::models::QueueItem;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Why the engine could not play a media item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFailure {
    /// Source no longer exists upstream
    NotFound,
    /// Source refuses to play embedded
    EmbeddingDisallowed,
    /// Source exists but cannot be decoded
    Decode,
    /// Transient or unknown
    Other,
}

impl MediaFailure {
    /// Unrecoverable failures remove the media item from every playlist
    pub fn is_unrecoverable(&self) -> bool {
        !matches!(self, MediaFailure::Other)
    }
}

/// Engine notifications consumed by the synchronizer
#[derive(Debug, Clone, PartialEq)]
pub enum EngineSignal {
    /// Loaded item is ready to start
    Ready,
    Playing,
    Paused,
    /// Current item played to its end
    Ended,
    /// Playback position in seconds
    Progress(f64),
    Error(MediaFailure),
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Begin loading `item`; answers with `Ready` or `Error`
    async fn load(&self, item: &QueueItem) -> Result<()>;

    async fn play(&self) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    /// Unload whatever is current
    async fn stop(&self) -> Result<()>;

    /// Output level applied to audio volume and visual opacity (0.0 to 1.0)
    async fn set_fade_level(&self, level: f32) -> Result<()>;
}

const DEFAULT_DURATION_SECS: f64 = 180.0;

#[derive(Debug, Default)]
struct Track {
    duration: f64,
    position: f64,
    loaded: bool,
    level: f32,
    ticker: Option<CancellationToken>,
}

/// Timer-driven engine with no audio or video output
#[derive(Clone)]
pub struct HeadlessEngine {
    signals: mpsc::Sender<EngineSignal>,
    track: Arc<Mutex<Track>>,
    tick: Duration,
}

impl HeadlessEngine {
    /// `tick` is both the progress reporting period and the virtual
    /// playback step (one tick advances one second of media)
    pub fn new(signals: mpsc::Sender<EngineSignal>, tick: Duration) -> Self {
        Self {
            signals,
            track: Arc::new(Mutex::new(Track {
                level: 1.0,
                ..Track::default()
            })),
            tick,
        }
    }

    /// Current output level
    pub async fn level(&self) -> f32 {
        self.track.lock().await.level
    }

    async fn send(&self, signal: EngineSignal) -> Result<()> {
        self.signals
            .send(signal)
            .await
            .map_err(|_| Error::Media("signal receiver dropped".to_string()))
    }

    fn spawn_ticker(&self, token: CancellationToken) {
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(engine.tick) => {}
                }

                let (position, ended) = {
                    let mut track = engine.track.lock().await;
                    track.position = (track.position + 1.0).min(track.duration);
                    let ended = track.position >= track.duration;
                    if ended {
                        track.ticker = None;
                    }
                    (track.position, ended)
                };

                if engine.send(EngineSignal::Progress(position)).await.is_err() {
                    break;
                }
                if ended {
                    let _ = engine.send(EngineSignal::Ended).await;
                    break;
                }
            }
        });
    }
}

#[async_trait]
impl MediaEngine for HeadlessEngine {
    async fn load(&self, item: &QueueItem) -> Result<()> {
        {
            let mut track = self.track.lock().await;
            if let Some(ticker) = track.ticker.take() {
                ticker.cancel();
            }

            if item.source_id.as_deref().map_or(true, |s| s.trim().is_empty()) {
                track.loaded = false;
                drop(track);
                warn!(media_item_id = %item.media_item_id, "Media item has no source");
                return self.send(EngineSignal::Error(MediaFailure::NotFound)).await;
            }

            track.duration = item
                .duration_seconds
                .filter(|d| *d > 0.0)
                .unwrap_or(DEFAULT_DURATION_SECS);
            track.position = 0.0;
            track.loaded = true;
            track.level = 1.0;
        }

        debug!(media_item_id = %item.media_item_id, "Headless engine loaded item");
        self.send(EngineSignal::Ready).await
    }

    async fn play(&self) -> Result<()> {
        let token = {
            let mut track = self.track.lock().await;
            if !track.loaded {
                return Err(Error::Media("nothing loaded".to_string()));
            }
            if track.ticker.is_some() {
                return Ok(());
            }
            let token = CancellationToken::new();
            track.ticker = Some(token.clone());
            token
        };

        self.spawn_ticker(token);
        self.send(EngineSignal::Playing).await
    }

    async fn pause(&self) -> Result<()> {
        let was_playing = {
            let mut track = self.track.lock().await;
            match track.ticker.take() {
                Some(ticker) => {
                    ticker.cancel();
                    true
                }
                None => false,
            }
        };

        if was_playing {
            self.send(EngineSignal::Paused).await?;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut track = self.track.lock().await;
        if let Some(ticker) = track.ticker.take() {
            ticker.cancel();
        }
        track.loaded = false;
        track.position = 0.0;
        Ok(())
    }

    async fn set_fade_level(&self, level: f32) -> Result<()> {
        self.track.lock().await.level = level.clamp(0.0, 1.0);
        Ok(())
    }
}
