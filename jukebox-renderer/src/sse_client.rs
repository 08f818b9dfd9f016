//! Server-Sent Events consumer
//!
//! Reads `GET /api/v1/events?player_id=...` as a byte stream, frames it
//! into SSE messages and forwards decoded [`JukeboxEvent`]s to the
//! synchronizer. A dropped connection is retried after a delay; every
//! reconnect is announced downstream as a `Resync` so state missed while
//! disconnected is refetched.

use crate::error::{Error, Result};
use chrono::Utc;
use futures::StreamExt;
use jukebox_common::events::JukeboxEvent;
use rand::Rng;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Incremental SSE framer
///
/// Chunks may split lines, messages and UTF-8 sequences at arbitrary
/// points; `feed` buffers partial input and returns every message
/// completed by the new chunk.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event_name: Option<String>,
    data: Vec<String>,
}

/// One framed message: the `event:` name and joined `data:` lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    pub event: Option<String>,
    pub data: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseMessage> {
        self.buffer.extend_from_slice(chunk);
        let mut messages = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(message) = self.dispatch() {
                    messages.push(message);
                }
                continue;
            }

            // Comment lines carry keep-alives
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };

            match field {
                "event" => self.event_name = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        messages
    }

    fn dispatch(&mut self) -> Option<SseMessage> {
        let event = self.event_name.take();
        if self.data.is_empty() {
            return None;
        }
        let data = self.data.join("\n");
        self.data.clear();
        Some(SseMessage { event, data })
    }
}

/// Decode a framed message into an event
pub fn decode_event(message: &SseMessage) -> Result<JukeboxEvent> {
    Ok(serde_json::from_str(&message.data)?)
}

/// Consume the event stream until cancelled, reconnecting on failure
pub async fn run_event_stream(
    url: String,
    events: mpsc::Sender<JukeboxEvent>,
    reconnect_delay: Duration,
    cancel: CancellationToken,
) {
    // No overall timeout: the response body is long-lived
    let http_client = match reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "Failed to build event stream client");
            return;
        }
    };
    let mut connected_before = false;

    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = stream_once(&http_client, &url, &events, &mut connected_before) => result,
        };

        match result {
            Ok(()) => info!(url = %url, "Event stream closed by server"),
            Err(e) => warn!(url = %url, error = %e, "Event stream failed"),
        }

        if events.is_closed() {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(with_jitter(reconnect_delay)) => {}
        }
    }

    debug!("Event stream task stopped");
}

/// Spread reconnects of many renderers after a server restart
fn with_jitter(delay: Duration) -> Duration {
    let jitter_ms = (delay.as_millis() as u64) / 2;
    if jitter_ms == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
}

async fn stream_once(
    http_client: &reqwest::Client,
    url: &str,
    events: &mpsc::Sender<JukeboxEvent>,
    connected_before: &mut bool,
) -> Result<()> {
    let response = http_client
        .get(url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(Error::Stream(format!(
            "event stream returned HTTP {}",
            response.status()
        )));
    }

    info!(url = %url, "Event stream connected");
    if *connected_before {
        let resync = JukeboxEvent::Resync {
            player_id: None,
            timestamp: Utc::now(),
        };
        if events.send(resync).await.is_err() {
            return Ok(());
        }
    }
    *connected_before = true;

    let mut parser = SseParser::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;

        for message in parser.feed(&chunk) {
            match decode_event(&message) {
                Ok(event) => {
                    if events.send(event).await.is_err() {
                        return Ok(());
                    }
                }
                Err(e) => warn!(event = ?message.event, error = %e, "Undecodable event skipped"),
            }
        }
    }

    Ok(())
}
