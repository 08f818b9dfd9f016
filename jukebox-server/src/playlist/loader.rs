//! Playlist Loader
//!
//! `load_playlist` is the only way new integrations switch what a player is
//! playing from. Activation, clearing the normal queue, importing the
//! playlist and resetting the playback pointer happen in one transaction,
//! so observers see either the old state or the new one, never a mix.

use crate::db::{playlists, players, queue, settings, status};
use crate::error::{Error, Result};
use crate::fanout;
use crate::state::AppContext;
use jukebox_common::events::JukeboxEvent;
use jukebox_common::models::{PlayerState, QueueType};
use jukebox_common::retry_on_conflict;
use rand::seq::SliceRandom;
use tracing::info;

/// Load `playlist_id` into the player's normal queue starting at `start_index`
///
/// Returns the number of queue entries created.
pub async fn load_playlist(
    ctx: &AppContext,
    player_id: &str,
    playlist_id: &str,
    start_index: i64,
) -> Result<usize> {
    let (loaded, events) = retry_on_conflict("playlist load", &ctx.settings.retry, move || {
        try_load(ctx, player_id, playlist_id, start_index)
    })
    .await?;

    ctx.fanout.publish_all(events);

    info!(player_id, playlist_id, start_index, loaded, "Playlist loaded");
    Ok(loaded)
}

async fn try_load(
    ctx: &AppContext,
    player_id: &str,
    playlist_id: &str,
    start_index: i64,
) -> Result<(usize, Vec<JukeboxEvent>)> {
    let mut tx = ctx.db.begin().await?;

    players::require_player(&mut *tx, player_id).await?;
    let playlist = playlists::require_playlist(&mut *tx, playlist_id).await?;
    if playlist.player_id != player_id {
        return Err(Error::NotFound(format!(
            "playlist {} does not belong to player {}",
            playlist_id, player_id
        )));
    }

    let media_ids: Vec<String> = playlists::list_items(&mut *tx, playlist_id)
        .await?
        .into_iter()
        .map(|item| item.media_item_id)
        .collect();

    let start = validate_start_index(start_index, media_ids.len())?;
    let shuffle = settings::get_bool(&mut *tx, player_id, settings::SHUFFLE).await?;
    let order = import_order(media_ids, start, shuffle);

    playlists::set_active(&mut tx, player_id, playlist_id).await?;
    queue::clear(&mut tx, player_id, Some(QueueType::Normal)).await?;
    queue::insert_sequence(&mut tx, player_id, QueueType::Normal, &order).await?;

    let mut player_status = status::get_status(&mut *tx, player_id).await?;
    player_status.now_playing_index = start_index;
    player_status.queue_exhausted = false;
    if let Some(current_id) = player_status.current_queue_id.clone() {
        if queue::get_item(&mut tx, &current_id).await?.is_none() {
            player_status.current_queue_id = None;
            player_status.current_media_id = None;
            player_status.state = PlayerState::Idle;
            player_status.progress = 0.0;
        }
    }
    status::write_status(&mut *tx, &player_status).await?;

    let events = vec![
        fanout::stage_playlists(&mut tx, player_id).await?,
        fanout::stage_queue(&mut tx, player_id).await?,
        fanout::stage_status(&mut tx, player_id).await?,
    ];

    tx.commit().await?;

    Ok((order.len(), events))
}

/// `start_index` must address an item; an empty playlist only accepts 0
fn validate_start_index(start_index: i64, len: usize) -> Result<usize> {
    let in_range = if len == 0 {
        start_index == 0
    } else {
        start_index >= 0 && (start_index as u64) < len as u64
    };

    if !in_range {
        return Err(Error::InvalidInput(format!(
            "start_index {} out of range for playlist of {} items",
            start_index, len
        )));
    }

    Ok(start_index as usize)
}

/// Rotate so `start` comes first; with shuffle, permute everything after it
fn import_order(mut media_ids: Vec<String>, start: usize, shuffle: bool) -> Vec<String> {
    if media_ids.is_empty() {
        return media_ids;
    }
    media_ids.rotate_left(start);
    if shuffle {
        media_ids[1..].shuffle(&mut rand::thread_rng());
    }
    media_ids
}
