//! Playlist command surface
//!
//! Same envelope style as the queue surface: `{action, ...fields}`. The
//! separable `set_active` / `clear_queue` / `import_queue` steps are only
//! available when the `legacy_playlist_actions` runtime setting is on; new
//! integrations use `load_playlist`.

pub mod loader;

use crate::db::{media, players, playlists, queue};
use crate::error::{Error, Result};
use crate::fanout;
use crate::gateway::{merge_order, validate_order};
use crate::state::AppContext;
use jukebox_common::api::{
    LoadPlaylistResponse, PlaylistCreatedResponse, PlaylistItemResponse, PlaylistRequest,
    RemovedResponse, ScrapeResponse, ScrapedMedia, SuccessResponse,
};
use jukebox_common::events::JukeboxEvent;
use jukebox_common::models::{Playlist, PlaylistItem, QueueType};
use jukebox_common::retry_on_conflict;
use serde::Serialize;
use tracing::{info, warn};

/// Validated playlist command
#[derive(Debug, Clone, PartialEq)]
pub enum PlaylistCommand {
    Create { player_id: String, name: String },
    Update { playlist_id: String, name: String },
    Delete { playlist_id: String },
    AddItem { playlist_id: String, media_item_id: String },
    RemoveItem { item_id: String },
    Reorder { playlist_id: String, item_ids: Vec<String> },
    Scrape { playlist_id: String, media: Vec<ScrapedMedia> },
    LoadPlaylist { player_id: String, playlist_id: String, start_index: i64 },
    RemoveMediaGlobally { media_item_id: String },
    SetActive { player_id: String, playlist_id: String },
    ClearQueue { player_id: String },
    ImportQueue { player_id: String, playlist_id: String },
}

impl PlaylistCommand {
    fn is_legacy(&self) -> bool {
        matches!(
            self,
            PlaylistCommand::SetActive { .. }
                | PlaylistCommand::ClearQueue { .. }
                | PlaylistCommand::ImportQueue { .. }
        )
    }
}

pub fn parse_request(request: PlaylistRequest) -> Result<PlaylistCommand> {
    let action = required(request.action, "action")?;

    let command = match action.as_str() {
        "create" => PlaylistCommand::Create {
            player_id: required(request.player_id, "player_id")?,
            name: required(request.name, "name")?,
        },
        "update" => PlaylistCommand::Update {
            playlist_id: required(request.playlist_id, "playlist_id")?,
            name: required(request.name, "name")?,
        },
        "delete" => PlaylistCommand::Delete {
            playlist_id: required(request.playlist_id, "playlist_id")?,
        },
        "add_item" => PlaylistCommand::AddItem {
            playlist_id: required(request.playlist_id, "playlist_id")?,
            media_item_id: required(request.media_item_id, "media_item_id")?,
        },
        "remove_item" => PlaylistCommand::RemoveItem {
            item_id: required(request.item_id, "item_id")?,
        },
        "reorder" => {
            let item_ids = request
                .item_ids
                .ok_or_else(|| Error::InvalidInput("missing field: item_ids".to_string()))?;
            validate_order(&item_ids)?;
            PlaylistCommand::Reorder {
                playlist_id: required(request.playlist_id, "playlist_id")?,
                item_ids,
            }
        }
        "scrape" => {
            let media = request
                .media
                .ok_or_else(|| Error::InvalidInput("missing field: media".to_string()))?;
            if let Some(bad) = media
                .iter()
                .find(|m| m.source_id.trim().is_empty() || m.title.trim().is_empty())
            {
                return Err(Error::InvalidInput(format!(
                    "scraped media needs source_id and title: {:?}",
                    bad.source_id
                )));
            }
            PlaylistCommand::Scrape {
                playlist_id: required(request.playlist_id, "playlist_id")?,
                media,
            }
        }
        "load_playlist" => PlaylistCommand::LoadPlaylist {
            player_id: required(request.player_id, "player_id")?,
            playlist_id: required(request.playlist_id, "playlist_id")?,
            start_index: request.start_index.unwrap_or(0),
        },
        "remove_media_globally" => PlaylistCommand::RemoveMediaGlobally {
            media_item_id: required(request.media_item_id, "media_item_id")?,
        },
        "set_active" => PlaylistCommand::SetActive {
            player_id: required(request.player_id, "player_id")?,
            playlist_id: required(request.playlist_id, "playlist_id")?,
        },
        "clear_queue" => PlaylistCommand::ClearQueue {
            player_id: required(request.player_id, "player_id")?,
        },
        "import_queue" => PlaylistCommand::ImportQueue {
            player_id: required(request.player_id, "player_id")?,
            playlist_id: required(request.playlist_id, "playlist_id")?,
        },
        other => return Err(Error::InvalidInput(format!("unknown action: {}", other))),
    };

    Ok(command)
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(Error::InvalidInput(format!("missing field: {}", field))),
    }
}

/// Response body for a playlist command
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PlaylistOutcome {
    Created(PlaylistCreatedResponse),
    ItemAdded(PlaylistItemResponse),
    Scraped(ScrapeResponse),
    Loaded(LoadPlaylistResponse),
    Removed(RemovedResponse),
    Success(SuccessResponse),
}

/// Playlist with its ordered items
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaylistDetail {
    #[serde(flatten)]
    pub playlist: Playlist,
    pub items: Vec<PlaylistItem>,
}

pub struct PlaylistService<'a> {
    ctx: &'a AppContext,
}

impl<'a> PlaylistService<'a> {
    pub fn new(ctx: &'a AppContext) -> Self {
        Self { ctx }
    }

    pub async fn execute(&self, command: PlaylistCommand) -> Result<PlaylistOutcome> {
        if command.is_legacy() && !self.ctx.settings.legacy_playlist_actions {
            warn!(?command, "Rejected legacy playlist action");
            return Err(Error::InvalidInput(
                "set_active, clear_queue and import_queue are disabled; use load_playlist"
                    .to_string(),
            ));
        }

        let outcome = match command {
            PlaylistCommand::Create { player_id, name } => {
                PlaylistOutcome::Created(PlaylistCreatedResponse {
                    playlist_id: self.create(&player_id, &name).await?,
                })
            }
            PlaylistCommand::Update { playlist_id, name } => {
                self.rename(&playlist_id, &name).await?;
                PlaylistOutcome::Success(SuccessResponse::ok())
            }
            PlaylistCommand::Delete { playlist_id } => {
                self.delete(&playlist_id).await?;
                PlaylistOutcome::Success(SuccessResponse::ok())
            }
            PlaylistCommand::AddItem {
                playlist_id,
                media_item_id,
            } => PlaylistOutcome::ItemAdded(PlaylistItemResponse {
                item_id: self.add_item(&playlist_id, &media_item_id).await?,
            }),
            PlaylistCommand::RemoveItem { item_id } => {
                self.remove_item(&item_id).await?;
                PlaylistOutcome::Success(SuccessResponse::ok())
            }
            PlaylistCommand::Reorder {
                playlist_id,
                item_ids,
            } => {
                self.reorder(&playlist_id, &item_ids).await?;
                PlaylistOutcome::Success(SuccessResponse::ok())
            }
            PlaylistCommand::Scrape { playlist_id, media } => {
                PlaylistOutcome::Scraped(ScrapeResponse {
                    imported_count: self.scrape(&playlist_id, &media).await?,
                })
            }
            PlaylistCommand::LoadPlaylist {
                player_id,
                playlist_id,
                start_index,
            } => PlaylistOutcome::Loaded(LoadPlaylistResponse {
                loaded_count: loader::load_playlist(self.ctx, &player_id, &playlist_id, start_index)
                    .await?,
            }),
            PlaylistCommand::RemoveMediaGlobally { media_item_id } => {
                PlaylistOutcome::Removed(RemovedResponse {
                    removed_count: self.remove_media_globally(&media_item_id).await?,
                })
            }
            PlaylistCommand::SetActive {
                player_id,
                playlist_id,
            } => {
                self.legacy_set_active(&player_id, &playlist_id).await?;
                PlaylistOutcome::Success(SuccessResponse::ok())
            }
            PlaylistCommand::ClearQueue { player_id } => {
                self.legacy_clear_queue(&player_id).await?;
                PlaylistOutcome::Success(SuccessResponse::ok())
            }
            PlaylistCommand::ImportQueue {
                player_id,
                playlist_id,
            } => PlaylistOutcome::Loaded(LoadPlaylistResponse {
                loaded_count: self.legacy_import_queue(&player_id, &playlist_id).await?,
            }),
        };

        Ok(outcome)
    }

    pub async fn create(&self, player_id: &str, name: &str) -> Result<String> {
        let mut tx = self.ctx.db.begin().await?;
        players::require_player(&mut *tx, player_id).await?;
        let playlist = playlists::create_playlist(&mut *tx, player_id, name).await?;
        let event = fanout::stage_playlists(&mut tx, player_id).await?;
        tx.commit().await?;

        self.ctx.fanout.publish(event);
        info!(player_id, playlist_id = %playlist.id, name, "Created playlist");
        Ok(playlist.id)
    }

    pub async fn get(&self, playlist_id: &str) -> Result<PlaylistDetail> {
        let mut conn = self.ctx.db.acquire().await?;
        let playlist = playlists::require_playlist(&mut *conn, playlist_id).await?;
        let items = playlists::list_items(&mut *conn, playlist_id).await?;
        Ok(PlaylistDetail { playlist, items })
    }

    pub async fn rename(&self, playlist_id: &str, name: &str) -> Result<()> {
        let mut tx = self.ctx.db.begin().await?;
        let playlist = playlists::require_playlist(&mut *tx, playlist_id).await?;
        playlists::rename_playlist(&mut *tx, playlist_id, name).await?;
        let event = fanout::stage_playlists(&mut tx, &playlist.player_id).await?;
        tx.commit().await?;

        self.ctx.fanout.publish(event);
        Ok(())
    }

    /// Delete a playlist; queue entries imported from it stay queued
    pub async fn delete(&self, playlist_id: &str) -> Result<()> {
        let mut tx = self.ctx.db.begin().await?;
        let playlist = playlists::require_playlist(&mut *tx, playlist_id).await?;
        playlists::delete_playlist(&mut *tx, playlist_id).await?;
        let event = fanout::stage_playlists(&mut tx, &playlist.player_id).await?;
        tx.commit().await?;

        self.ctx.fanout.publish(event);
        info!(playlist_id, "Deleted playlist");
        Ok(())
    }

    pub async fn add_item(&self, playlist_id: &str, media_item_id: &str) -> Result<String> {
        let mut tx = self.ctx.db.begin().await?;
        let playlist = playlists::require_playlist(&mut *tx, playlist_id).await?;
        media::require_media(&mut *tx, media_item_id).await?;
        let item_id = playlists::add_item(&mut *tx, playlist_id, media_item_id).await?;
        let event = fanout::stage_playlists(&mut tx, &playlist.player_id).await?;
        tx.commit().await?;

        self.ctx.fanout.publish(event);
        Ok(item_id)
    }

    pub async fn remove_item(&self, item_id: &str) -> Result<()> {
        let mut tx = self.ctx.db.begin().await?;
        let Some(playlist_id) = playlists::remove_item(&mut tx, item_id).await? else {
            return Err(Error::NotFound(format!("playlist item not found: {}", item_id)));
        };
        let playlist = playlists::require_playlist(&mut *tx, &playlist_id).await?;
        let event = fanout::stage_playlists(&mut tx, &playlist.player_id).await?;
        tx.commit().await?;

        self.ctx.fanout.publish(event);
        Ok(())
    }

    pub async fn reorder(&self, playlist_id: &str, item_ids: &[String]) -> Result<()> {
        validate_order(item_ids)?;

        let event = retry_on_conflict("playlist reorder", &self.ctx.settings.retry, move || {
            self.try_reorder(playlist_id, item_ids)
        })
        .await?;

        self.ctx.fanout.publish(event);
        Ok(())
    }

    async fn try_reorder(&self, playlist_id: &str, item_ids: &[String]) -> Result<JukeboxEvent> {
        let mut tx = self.ctx.db.begin().await?;
        let playlist = playlists::require_playlist(&mut *tx, playlist_id).await?;

        let current: Vec<String> = playlists::list_items(&mut *tx, playlist_id)
            .await?
            .into_iter()
            .map(|item| item.id)
            .collect();

        let target = merge_order(&current, item_ids);
        playlists::assign_item_positions(&mut tx, &target).await?;

        let event = fanout::stage_playlists(&mut tx, &playlist.player_id).await?;
        tx.commit().await?;
        Ok(event)
    }

    /// Upsert externally scraped media and append it to the playlist
    pub async fn scrape(&self, playlist_id: &str, scraped: &[ScrapedMedia]) -> Result<usize> {
        let mut tx = self.ctx.db.begin().await?;
        let playlist = playlists::require_playlist(&mut *tx, playlist_id).await?;

        for entry in scraped {
            let item =
                media::upsert_media(&mut *tx, &entry.source_id, &entry.title, entry.duration_seconds)
                    .await?;
            playlists::add_item(&mut *tx, playlist_id, &item.id).await?;
        }

        let event = fanout::stage_playlists(&mut tx, &playlist.player_id).await?;
        tx.commit().await?;

        self.ctx.fanout.publish(event);
        info!(playlist_id, imported = scraped.len(), "Imported scraped media");
        Ok(scraped.len())
    }

    /// Drop a media item from every playlist that contains it
    pub async fn remove_media_globally(&self, media_item_id: &str) -> Result<usize> {
        let mut tx = self.ctx.db.begin().await?;
        media::require_media(&mut *tx, media_item_id).await?;

        let (removed, touched) = playlists::remove_media_everywhere(&mut tx, media_item_id).await?;

        let mut owners: Vec<&str> = touched.iter().map(|p| p.player_id.as_str()).collect();
        owners.sort_unstable();
        owners.dedup();

        let mut events = Vec::with_capacity(owners.len());
        for player_id in owners {
            events.push(fanout::stage_playlists(&mut tx, player_id).await?);
        }
        tx.commit().await?;

        self.ctx.fanout.publish_all(events);
        info!(media_item_id, removed, "Removed media from all playlists");
        Ok(removed as usize)
    }

    async fn legacy_set_active(&self, player_id: &str, playlist_id: &str) -> Result<()> {
        let mut tx = self.ctx.db.begin().await?;
        let playlist = playlists::require_playlist(&mut *tx, playlist_id).await?;
        if playlist.player_id != player_id {
            return Err(Error::NotFound(format!("playlist not found: {}", playlist_id)));
        }
        playlists::set_active(&mut tx, player_id, playlist_id).await?;
        let event = fanout::stage_playlists(&mut tx, player_id).await?;
        tx.commit().await?;

        self.ctx.fanout.publish(event);
        Ok(())
    }

    async fn legacy_clear_queue(&self, player_id: &str) -> Result<()> {
        let mut tx = self.ctx.db.begin().await?;
        players::require_player(&mut *tx, player_id).await?;
        queue::clear(&mut tx, player_id, Some(QueueType::Normal)).await?;
        let event = fanout::stage_queue(&mut tx, player_id).await?;
        tx.commit().await?;

        self.ctx.fanout.publish(event);
        Ok(())
    }

    async fn legacy_import_queue(&self, player_id: &str, playlist_id: &str) -> Result<usize> {
        let mut tx = self.ctx.db.begin().await?;
        players::require_player(&mut *tx, player_id).await?;
        playlists::require_playlist(&mut *tx, playlist_id).await?;
        let items = playlists::list_items(&mut *tx, playlist_id).await?;
        for item in &items {
            queue::append(&mut tx, player_id, &item.media_item_id, QueueType::Normal, None).await?;
        }
        let event = fanout::stage_queue(&mut tx, player_id).await?;
        tx.commit().await?;

        self.ctx.fanout.publish(event);
        Ok(items.len())
    }
}
