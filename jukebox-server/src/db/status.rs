//! Playback State Store: one status row per player

use crate::error::Result;
use chrono::Utc;
use jukebox_common::models::PlayerStatus;
use sqlx::SqliteExecutor;

/// Current status, or an idle status if the row does not exist yet
pub async fn get_status<'e, E>(executor: E, player_id: &str) -> Result<PlayerStatus>
where
    E: SqliteExecutor<'e>,
{
    let status = sqlx::query_as::<_, PlayerStatus>(
        r#"
        SELECT player_id, state, current_media_id, current_queue_id, progress,
               now_playing_index, queue_exhausted, updated_at
        FROM player_status
        WHERE player_id = ?
        "#,
    )
    .bind(player_id)
    .fetch_optional(executor)
    .await?;

    Ok(status.unwrap_or_else(|| PlayerStatus::idle(player_id)))
}

/// Upsert the full status row; `updated_at` is stamped here
pub async fn write_status<'e, E>(executor: E, status: &PlayerStatus) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO player_status (
            player_id, state, current_media_id, current_queue_id, progress,
            now_playing_index, queue_exhausted, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(player_id) DO UPDATE SET
            state = excluded.state,
            current_media_id = excluded.current_media_id,
            current_queue_id = excluded.current_queue_id,
            progress = excluded.progress,
            now_playing_index = excluded.now_playing_index,
            queue_exhausted = excluded.queue_exhausted,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&status.player_id)
    .bind(status.state)
    .bind(&status.current_media_id)
    .bind(&status.current_queue_id)
    .bind(status.progress)
    .bind(status.now_playing_index)
    .bind(status.queue_exhausted)
    .bind(Utc::now())
    .execute(executor)
    .await?;

    Ok(())
}
