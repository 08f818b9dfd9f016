//! Server-Sent Events stream
//!
//! A subscriber filtered to one player first receives every current
//! snapshot for that player, then live events. Subscribing happens before
//! the initial snapshots are read, so nothing committed in between is lost;
//! a duplicate is harmless because clients keep the highest revision.

use crate::fanout;
use crate::state::AppContext;
use async_stream::stream;
use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use chrono::Utc;
use futures::stream::{Stream, StreamExt};
use jukebox_common::events::JukeboxEvent;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, warn};

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub player_id: Option<String>,
}

/// GET /events
pub async fn event_stream(
    State(ctx): State<AppContext>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(player_id = ?query.player_id, "New SSE client connected");

    let mut events = BroadcastStream::new(ctx.fanout.subscribe());
    let player_id = query.player_id;

    let stream = stream! {
        if let Some(player_id) = player_id.as_deref() {
            match initial_snapshots(&ctx, player_id).await {
                Ok(snapshots) => {
                    for event in snapshots {
                        if let Some(sse) = to_sse(&event) {
                            yield Ok(sse);
                        }
                    }
                }
                Err(e) => warn!(player_id, error = %e, "Failed to read initial snapshots"),
            }
        }

        while let Some(received) = events.next().await {
            match received {
                Ok(event) => {
                    if !matches_player(&event, player_id.as_deref()) {
                        continue;
                    }
                    if let Some(sse) = to_sse(&event) {
                        yield Ok(sse);
                    }
                }
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    warn!(missed, player_id = ?player_id, "SSE subscriber lagged; requesting resync");
                    let resync = JukeboxEvent::Resync {
                        player_id: player_id.clone(),
                        timestamp: Utc::now(),
                    };
                    if let Some(sse) = to_sse(&resync) {
                        yield Ok(sse);
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

async fn initial_snapshots(ctx: &AppContext, player_id: &str) -> crate::error::Result<Vec<JukeboxEvent>> {
    let mut conn = ctx.db.acquire().await?;
    fanout::current_snapshots(&mut conn, player_id).await
}

/// Events for other players are dropped; broadcast resyncs always pass
fn matches_player(event: &JukeboxEvent, player_id: Option<&str>) -> bool {
    match (player_id, event.player_id()) {
        (None, _) | (_, None) => true,
        (Some(wanted), Some(actual)) => wanted == actual,
    }
}

fn to_sse(event: &JukeboxEvent) -> Option<Event> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Event::default().event(event.event_type()).data(json)),
        Err(e) => {
            warn!("Failed to serialize event: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jukebox_common::events::PlayerCommandKind;

    #[test]
    fn test_player_filter() {
        let event = JukeboxEvent::player_command("p1", PlayerCommandKind::Skip);
        assert!(matches_player(&event, Some("p1")));
        assert!(!matches_player(&event, Some("p2")));
        assert!(matches_player(&event, None));

        let resync = JukeboxEvent::Resync {
            player_id: None,
            timestamp: Utc::now(),
        };
        assert!(matches_player(&resync, Some("p2")));
    }
}
