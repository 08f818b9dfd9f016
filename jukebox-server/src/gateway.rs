//! Queue Mutation Gateway
//!
//! Validates queue commands, checks that the target player is online, and
//! runs each mutation as one transaction. Conflict-prone mutations run under
//! the shared [`RetryPolicy`](jukebox_common::RetryPolicy): every attempt
//! re-reads the current partition inside its own transaction, so a retry
//! never resubmits stale positions.
//!
//! The gateway holds no locks. Serialization comes from SQLite; the gateway
//! only detects collisions (structurally, see `Conflicting`) and retries.

use crate::arbiter::ensure_online;
use crate::db::{media, queue, status};
use crate::error::{Error, Result};
use crate::fanout;
use crate::state::AppContext;
use jukebox_common::api::{AddResponse, NextResponse, QueueRequest, SuccessResponse};
use jukebox_common::events::{JukeboxEvent, PlayerCommandKind};
use jukebox_common::models::{PlayerState, QueueItem, QueueType};
use jukebox_common::retry_on_conflict;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};

/// Validated queue command
#[derive(Debug, Clone, PartialEq)]
pub enum QueueCommand {
    Add {
        media_item_id: String,
        queue_type: QueueType,
        requested_by: Option<String>,
    },
    Remove {
        queue_id: String,
    },
    Reorder {
        queue_type: QueueType,
        queue_ids: Vec<String>,
    },
    Next,
    Skip,
    /// `None` clears both partitions
    Clear {
        queue_type: Option<QueueType>,
    },
    Shuffle {
        queue_type: QueueType,
    },
}

impl QueueCommand {
    pub fn name(&self) -> &'static str {
        match self {
            QueueCommand::Add { .. } => "add",
            QueueCommand::Remove { .. } => "remove",
            QueueCommand::Reorder { .. } => "reorder",
            QueueCommand::Next => "next",
            QueueCommand::Skip => "skip",
            QueueCommand::Clear { .. } => "clear",
            QueueCommand::Shuffle { .. } => "shuffle",
        }
    }
}

/// Parse the wire envelope into `(player_id, command)`
pub fn parse_request(request: QueueRequest) -> Result<(String, QueueCommand)> {
    let player_id = required(request.player_id, "player_id")?;
    let action = required(request.action, "action")?;

    let all_partitions = request.queue_type.as_deref() == Some("all");
    let queue_type = request
        .queue_type
        .as_deref()
        .filter(|_| !all_partitions)
        .map(str::parse::<QueueType>)
        .transpose()?;

    // "all" only makes sense for clear
    let single_partition = |action: &str| -> Result<QueueType> {
        if all_partitions {
            return Err(Error::InvalidInput(format!(
                "type all is not valid for {}",
                action
            )));
        }
        Ok(queue_type.unwrap_or(QueueType::Normal))
    };

    let command = match action.as_str() {
        "add" => QueueCommand::Add {
            media_item_id: required(request.media_item_id, "media_item_id")?,
            queue_type: single_partition("add")?,
            requested_by: request.requested_by,
        },
        "remove" => QueueCommand::Remove {
            queue_id: required(request.queue_id, "queue_id")?,
        },
        "reorder" => {
            let queue_ids = request
                .queue_ids
                .ok_or_else(|| Error::InvalidInput("missing field: queue_ids".to_string()))?;
            validate_order(&queue_ids)?;
            QueueCommand::Reorder {
                queue_type: single_partition("reorder")?,
                queue_ids,
            }
        }
        "next" => QueueCommand::Next,
        "skip" => QueueCommand::Skip,
        "clear" => QueueCommand::Clear { queue_type },
        "shuffle" => QueueCommand::Shuffle {
            queue_type: single_partition("shuffle")?,
        },
        other => return Err(Error::InvalidInput(format!("unknown action: {}", other))),
    };

    Ok((player_id, command))
}

fn required(value: Option<String>, field: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(Error::InvalidInput(format!("missing field: {}", field))),
    }
}

/// Reject empty orders and orders naming an id twice
pub fn validate_order(ids: &[String]) -> Result<()> {
    if ids.is_empty() {
        return Err(Error::InvalidInput("order must name at least one id".to_string()));
    }
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(Error::InvalidInput(format!("duplicate id in order: {}", id)));
        }
    }
    Ok(())
}

/// Target order for a partition: requested ids still present, in the
/// requested order, then every other current id in its current order
pub fn merge_order(current: &[String], requested: &[String]) -> Vec<String> {
    let present: HashSet<&str> = current.iter().map(String::as_str).collect();
    let mut seen = HashSet::with_capacity(current.len());
    let mut order = Vec::with_capacity(current.len());

    for id in requested {
        if present.contains(id.as_str()) && seen.insert(id.as_str()) {
            order.push(id.clone());
        }
    }
    for id in current {
        if !seen.contains(id.as_str()) {
            order.push(id.clone());
        }
    }

    order
}

/// Response body for a queue command
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueueOutcome {
    Added(AddResponse),
    Next(NextResponse),
    Success(SuccessResponse),
}

pub struct QueueGateway<'a> {
    ctx: &'a AppContext,
}

impl<'a> QueueGateway<'a> {
    pub fn new(ctx: &'a AppContext) -> Self {
        Self { ctx }
    }

    /// Check preconditions and dispatch one command
    pub async fn execute(&self, player_id: &str, command: QueueCommand) -> Result<QueueOutcome> {
        self.ensure_online(player_id).await?;

        debug!(player_id, action = command.name(), "Dispatching queue command");

        let outcome = match command {
            QueueCommand::Add {
                media_item_id,
                queue_type,
                requested_by,
            } => QueueOutcome::Added(AddResponse {
                queue_id: self
                    .add(player_id, &media_item_id, queue_type, requested_by.as_deref())
                    .await?,
            }),
            QueueCommand::Remove { queue_id } => {
                self.remove(player_id, &queue_id).await?;
                QueueOutcome::Success(SuccessResponse::ok())
            }
            QueueCommand::Reorder {
                queue_type,
                queue_ids,
            } => {
                self.reorder(player_id, queue_type, &queue_ids).await?;
                QueueOutcome::Success(SuccessResponse::ok())
            }
            QueueCommand::Next => QueueOutcome::Next(NextResponse {
                next_item: self.next(player_id).await?,
            }),
            QueueCommand::Skip => {
                self.skip(player_id);
                QueueOutcome::Success(SuccessResponse::ok())
            }
            QueueCommand::Clear { queue_type } => {
                self.clear(player_id, queue_type).await?;
                QueueOutcome::Success(SuccessResponse::ok())
            }
            QueueCommand::Shuffle { queue_type } => {
                self.shuffle(player_id, queue_type).await?;
                QueueOutcome::Success(SuccessResponse::ok())
            }
        };

        Ok(outcome)
    }

    /// PlayerOffline unless a live priority session exists
    pub async fn ensure_online(&self, player_id: &str) -> Result<()> {
        let mut conn = self.ctx.db.acquire().await?;
        ensure_online(&mut conn, player_id, self.ctx.settings.liveness_window).await
    }

    /// Append to the end of the partition; returns the new queue id
    pub async fn add(
        &self,
        player_id: &str,
        media_item_id: &str,
        queue_type: QueueType,
        requested_by: Option<&str>,
    ) -> Result<String> {
        let (queue_id, event) = retry_on_conflict("queue add", &self.ctx.settings.retry, move || {
            self.try_add(player_id, media_item_id, queue_type, requested_by)
        })
        .await?;

        self.ctx.fanout.publish(event);
        info!(player_id, %queue_type, media_item_id, queue_id = %queue_id, "Queued item");
        Ok(queue_id)
    }

    async fn try_add(
        &self,
        player_id: &str,
        media_item_id: &str,
        queue_type: QueueType,
        requested_by: Option<&str>,
    ) -> Result<(String, JukeboxEvent)> {
        let mut tx = self.ctx.db.begin().await?;
        media::require_media(&mut *tx, media_item_id).await?;
        let queue_id = queue::append(&mut tx, player_id, media_item_id, queue_type, requested_by).await?;
        let event = fanout::stage_queue(&mut tx, player_id).await?;
        tx.commit().await?;
        Ok((queue_id, event))
    }

    /// Delete an unplayed row and close the gap in its partition
    pub async fn remove(&self, player_id: &str, queue_id: &str) -> Result<()> {
        let event = retry_on_conflict("queue remove", &self.ctx.settings.retry, move || {
            self.try_remove(player_id, queue_id)
        })
        .await?;

        self.ctx.fanout.publish(event);
        info!(player_id, queue_id, "Removed queue item");
        Ok(())
    }

    async fn try_remove(&self, player_id: &str, queue_id: &str) -> Result<JukeboxEvent> {
        let mut tx = self.ctx.db.begin().await?;

        let item = match queue::get_item(&mut tx, queue_id).await? {
            Some(item) if item.player_id == player_id && item.played_at.is_none() => item,
            _ => return Err(Error::NotFound(format!("queue item not found: {}", queue_id))),
        };

        queue::delete_item(&mut tx, queue_id).await?;
        queue::renumber_partition(&mut tx, player_id, item.queue_type).await?;

        let event = fanout::stage_queue(&mut tx, player_id).await?;
        tx.commit().await?;
        Ok(event)
    }

    /// Reassign positions 0..n-1 to match `queue_ids`
    ///
    /// Ids that are no longer unplayed members of the partition are skipped;
    /// members not named keep their relative order after the named ones.
    /// Submitting the order the partition already has writes nothing.
    pub async fn reorder(&self, player_id: &str, queue_type: QueueType, queue_ids: &[String]) -> Result<()> {
        validate_order(queue_ids)?;

        let event = retry_on_conflict("queue reorder", &self.ctx.settings.retry, move || {
            self.try_reorder(player_id, queue_type, queue_ids)
        })
        .await?;

        if let Some(event) = event {
            self.ctx.fanout.publish(event);
        }
        info!(player_id, %queue_type, count = queue_ids.len(), "Reordered queue");
        Ok(())
    }

    async fn try_reorder(
        &self,
        player_id: &str,
        queue_type: QueueType,
        queue_ids: &[String],
    ) -> Result<Option<JukeboxEvent>> {
        let mut tx = self.ctx.db.begin().await?;

        let current: Vec<String> = queue::list_partition(&mut tx, player_id, queue_type)
            .await?
            .into_iter()
            .map(|item| item.id)
            .collect();

        let target = merge_order(&current, queue_ids);
        if target == current {
            return Ok(None);
        }

        queue::assign_positions(&mut tx, player_id, queue_type, &target).await?;
        let event = fanout::stage_queue(&mut tx, player_id).await?;
        tx.commit().await?;
        Ok(Some(event))
    }

    /// Random permutation of one partition
    pub async fn shuffle(&self, player_id: &str, queue_type: QueueType) -> Result<()> {
        let event = retry_on_conflict("queue shuffle", &self.ctx.settings.retry, move || {
            self.try_shuffle(player_id, queue_type)
        })
        .await?;

        if let Some(event) = event {
            self.ctx.fanout.publish(event);
        }
        info!(player_id, %queue_type, "Shuffled queue");
        Ok(())
    }

    async fn try_shuffle(&self, player_id: &str, queue_type: QueueType) -> Result<Option<JukeboxEvent>> {
        let mut tx = self.ctx.db.begin().await?;

        let mut ids: Vec<String> = queue::list_partition(&mut tx, player_id, queue_type)
            .await?
            .into_iter()
            .map(|item| item.id)
            .collect();

        if ids.len() < 2 {
            return Ok(None);
        }

        ids.shuffle(&mut rand::thread_rng());

        queue::assign_positions(&mut tx, player_id, queue_type, &ids).await?;
        let event = fanout::stage_queue(&mut tx, player_id).await?;
        tx.commit().await?;
        Ok(Some(event))
    }

    /// Finish the current row and promote the next head
    ///
    /// Marks exactly the row named by `current_queue_id` as played (if it is
    /// still queued), renumbers its partition, selects the new head (priority
    /// first) and points the player status at it. With nothing left the
    /// status goes idle with no current media.
    pub async fn next(&self, player_id: &str) -> Result<Option<QueueItem>> {
        let (head, events) = retry_on_conflict("queue next", &self.ctx.settings.retry, move || {
            self.try_next(player_id)
        })
        .await?;

        self.ctx.fanout.publish_all(events);

        match &head {
            Some(item) => info!(player_id, queue_id = %item.id, media_item_id = %item.media_item_id, "Advanced to next item"),
            None => info!(player_id, "Queue empty, player idle"),
        }

        Ok(head)
    }

    async fn try_next(&self, player_id: &str) -> Result<(Option<QueueItem>, Vec<JukeboxEvent>)> {
        let mut tx = self.ctx.db.begin().await?;

        let mut player_status = status::get_status(&mut *tx, player_id).await?;

        if let Some(current_id) = player_status.current_queue_id.clone() {
            if let Some(finished) = queue::get_item(&mut tx, &current_id).await? {
                if finished.player_id == player_id && queue::mark_played(&mut tx, &current_id).await? {
                    queue::renumber_partition(&mut tx, player_id, finished.queue_type).await?;
                    if finished.queue_type == QueueType::Normal {
                        player_status.now_playing_index += 1;
                    }
                }
            }
        }

        let head = queue::head(&mut tx, player_id).await?;

        match &head {
            Some(item) => {
                player_status.state = PlayerState::Loading;
                player_status.current_media_id = Some(item.media_item_id.clone());
                player_status.current_queue_id = Some(item.id.clone());
            }
            None => {
                player_status.state = PlayerState::Idle;
                player_status.current_media_id = None;
                player_status.current_queue_id = None;
            }
        }
        player_status.progress = 0.0;
        player_status.queue_exhausted = false;
        status::write_status(&mut *tx, &player_status).await?;

        let events = vec![
            fanout::stage_queue(&mut tx, player_id).await?,
            fanout::stage_status(&mut tx, player_id).await?,
        ];

        tx.commit().await?;
        Ok((head, events))
    }

    /// Ask the priority renderer to fade out and advance
    pub fn skip(&self, player_id: &str) {
        self.ctx
            .fanout
            .publish(JukeboxEvent::player_command(player_id, PlayerCommandKind::Skip));
        info!(player_id, "Skip requested");
    }

    /// Delete unplayed rows in one partition, or both
    pub async fn clear(&self, player_id: &str, queue_type: Option<QueueType>) -> Result<u64> {
        let mut tx = self.ctx.db.begin().await?;
        let removed = queue::clear(&mut tx, player_id, queue_type).await?;
        let event = fanout::stage_queue(&mut tx, player_id).await?;
        tx.commit().await?;

        self.ctx.fanout.publish(event);
        info!(
            player_id,
            scope = queue_type.map(|t| t.as_str()).unwrap_or("all"),
            removed,
            "Cleared queue"
        );
        Ok(removed)
    }
}
