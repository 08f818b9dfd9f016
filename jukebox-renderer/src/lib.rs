//! # Jukebox Renderer (jukebox-renderer)
//!
//! Playback instance for one player. Any number may run per player; the
//! server elects one of them as priority. The priority instance drives the
//! media engine and advances the shared queue. The others mirror its
//! status.
//!
//! Task layout:
//! - arbiter client: registration and heartbeats ([`arbiter`])
//! - event stream: SSE consumer feeding the synchronizer ([`sse_client`])
//! - synchronizer: playback state machine ([`synchronizer`])
//!
//! All three stop when the shared `CancellationToken` is cancelled.

pub mod arbiter;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod fade;
pub mod session_store;
pub mod sse_client;
pub mod synchronizer;

pub use error::{Error, Result};

use arbiter::ArbiterClient;
use client::{HttpPlayerApi, PlayerApi};
use config::Config;
use engine::{EngineSignal, MediaEngine};
use session_store::SessionStore;
use std::sync::Arc;
use synchronizer::Synchronizer;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const EVENT_BUFFER: usize = 256;

/// Run one renderer instance until `cancel` fires
///
/// `engine` must send its signals into the channel whose receiver is
/// `signals`.
pub async fn run(
    config: Config,
    engine: Arc<dyn MediaEngine>,
    signals: mpsc::Receiver<EngineSignal>,
    cancel: CancellationToken,
) -> Result<()> {
    let http = HttpPlayerApi::new(&config.server_url, &config.player_id)?;
    let events_url = http.url(&format!("/events?player_id={}", config.player_id));
    let api: Arc<dyn PlayerApi> = Arc::new(http);

    let (arbiter, role) = ArbiterClient::new(
        Arc::clone(&api),
        SessionStore::new(&config.state_file),
        config.timing,
    );
    info!(
        player_id = %config.player_id,
        session_id = arbiter.session_id(),
        server = %config.server_url,
        "Starting renderer"
    );

    let (synchronizer, report) =
        Synchronizer::new(Arc::clone(&api), engine, arbiter.session_id(), config.timing);

    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    let stream_task = tokio::spawn(sse_client::run_event_stream(
        events_url,
        event_tx,
        config.timing.reconnect_delay,
        cancel.clone(),
    ));
    let arbiter_task = arbiter.spawn(report, cancel.clone());

    synchronizer
        .run(signals, event_rx, role, cancel.clone())
        .await;

    // The synchronizer also stops when the event stream ends
    cancel.cancel();
    for (name, task) in [("event stream", stream_task), ("arbiter", arbiter_task)] {
        if let Err(e) = task.await {
            warn!(task = name, error = %e, "Task ended abnormally");
        }
    }

    info!("Renderer stopped");
    Ok(())
}
