//! Queue Store
//!
//! Unplayed rows in each `(player_id, queue_type)` partition hold unique,
//! contiguous, zero-based positions. Every function that moves rows keeps
//! that true at commit time; intermediate states inside a transaction use
//! negative positions so the partial unique index never sees a collision
//! from our own renumbering. A collision that does surface therefore comes
//! from a concurrent writer and is reported as a conflict.

use crate::error::Result;
use chrono::Utc;
use jukebox_common::models::{QueueItem, QueueType};
use sqlx::SqliteConnection;
use uuid::Uuid;

const SELECT_ITEMS: &str = r#"
    SELECT q.id, q.player_id, q.media_item_id, q.queue_type, q.position,
           q.requested_by, q.played_at, q.created_at,
           m.source_id, m.title, m.duration_seconds
    FROM queue q
    JOIN media_items m ON m.id = q.media_item_id
"#;

/// All unplayed rows for a player, priority partition first
pub async fn list_unplayed(conn: &mut SqliteConnection, player_id: &str) -> Result<Vec<QueueItem>> {
    let sql = format!(
        "{} WHERE q.player_id = ? AND q.played_at IS NULL
           ORDER BY CASE q.queue_type WHEN 'priority' THEN 0 ELSE 1 END, q.position",
        SELECT_ITEMS
    );

    let items = sqlx::query_as::<_, QueueItem>(&sql)
        .bind(player_id)
        .fetch_all(conn)
        .await?;

    Ok(items)
}

/// Unplayed rows of one partition ordered by position
pub async fn list_partition(
    conn: &mut SqliteConnection,
    player_id: &str,
    queue_type: QueueType,
) -> Result<Vec<QueueItem>> {
    let sql = format!(
        "{} WHERE q.player_id = ? AND q.queue_type = ? AND q.played_at IS NULL
           ORDER BY q.position",
        SELECT_ITEMS
    );

    let items = sqlx::query_as::<_, QueueItem>(&sql)
        .bind(player_id)
        .bind(queue_type)
        .fetch_all(conn)
        .await?;

    Ok(items)
}

pub async fn get_item(conn: &mut SqliteConnection, queue_id: &str) -> Result<Option<QueueItem>> {
    let sql = format!("{} WHERE q.id = ?", SELECT_ITEMS);

    let item = sqlx::query_as::<_, QueueItem>(&sql)
        .bind(queue_id)
        .fetch_optional(conn)
        .await?;

    Ok(item)
}

/// Next item to play: priority head, else normal head
pub async fn head(conn: &mut SqliteConnection, player_id: &str) -> Result<Option<QueueItem>> {
    let sql = format!(
        "{} WHERE q.player_id = ? AND q.played_at IS NULL AND q.position = 0
           ORDER BY CASE q.queue_type WHEN 'priority' THEN 0 ELSE 1 END
           LIMIT 1",
        SELECT_ITEMS
    );

    let item = sqlx::query_as::<_, QueueItem>(&sql)
        .bind(player_id)
        .fetch_optional(conn)
        .await?;

    Ok(item)
}

/// Append at the end of the partition; returns the new queue id
///
/// The position is computed inside the INSERT itself, so two concurrent
/// appends that read the same maximum collide on the unique index.
pub async fn append(
    conn: &mut SqliteConnection,
    player_id: &str,
    media_item_id: &str,
    queue_type: QueueType,
    requested_by: Option<&str>,
) -> Result<String> {
    let queue_id = Uuid::new_v4().to_string();

    sqlx::query(
        r#"
        INSERT INTO queue (id, player_id, media_item_id, queue_type, position, requested_by, created_at)
        SELECT ?, ?, ?, ?, COALESCE(MAX(position) + 1, 0), ?, ?
        FROM queue
        WHERE player_id = ? AND queue_type = ? AND played_at IS NULL
        "#,
    )
    .bind(&queue_id)
    .bind(player_id)
    .bind(media_item_id)
    .bind(queue_type)
    .bind(requested_by)
    .bind(Utc::now())
    .bind(player_id)
    .bind(queue_type)
    .execute(conn)
    .await?;

    Ok(queue_id)
}

/// Insert rows at positions 0..n-1 of an empty partition
pub async fn insert_sequence(
    conn: &mut SqliteConnection,
    player_id: &str,
    queue_type: QueueType,
    media_item_ids: &[String],
) -> Result<Vec<String>> {
    let now = Utc::now();
    let mut ids = Vec::with_capacity(media_item_ids.len());

    for (position, media_item_id) in media_item_ids.iter().enumerate() {
        let queue_id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO queue (id, player_id, media_item_id, queue_type, position, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&queue_id)
        .bind(player_id)
        .bind(media_item_id)
        .bind(queue_type)
        .bind(position as i64)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        ids.push(queue_id);
    }

    Ok(ids)
}

/// Delete one row; returns it if it existed
pub async fn delete_item(conn: &mut SqliteConnection, queue_id: &str) -> Result<Option<QueueItem>> {
    let Some(item) = get_item(&mut *conn, queue_id).await? else {
        return Ok(None);
    };

    sqlx::query("DELETE FROM queue WHERE id = ?")
        .bind(queue_id)
        .execute(&mut *conn)
        .await?;

    Ok(Some(item))
}

/// Mark a row played; returns false if it was missing or already played
pub async fn mark_played(conn: &mut SqliteConnection, queue_id: &str) -> Result<bool> {
    let result = sqlx::query("UPDATE queue SET played_at = ? WHERE id = ? AND played_at IS NULL")
        .bind(Utc::now())
        .bind(queue_id)
        .execute(conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete unplayed rows of one partition, or of both when `queue_type` is None
pub async fn clear(
    conn: &mut SqliteConnection,
    player_id: &str,
    queue_type: Option<QueueType>,
) -> Result<u64> {
    let result = match queue_type {
        Some(queue_type) => {
            sqlx::query(
                "DELETE FROM queue WHERE player_id = ? AND queue_type = ? AND played_at IS NULL",
            )
            .bind(player_id)
            .bind(queue_type)
            .execute(conn)
            .await?
        }
        None => {
            sqlx::query("DELETE FROM queue WHERE player_id = ? AND played_at IS NULL")
                .bind(player_id)
                .execute(conn)
                .await?
        }
    };

    Ok(result.rows_affected())
}

/// Close gaps left by a removal, keeping relative order
pub async fn renumber_partition(
    conn: &mut SqliteConnection,
    player_id: &str,
    queue_type: QueueType,
) -> Result<()> {
    let ids: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT id FROM queue
        WHERE player_id = ? AND queue_type = ? AND played_at IS NULL
        ORDER BY position
        "#,
    )
    .bind(player_id)
    .bind(queue_type)
    .fetch_all(&mut *conn)
    .await?;

    assign_positions(conn, player_id, queue_type, &ids).await
}

/// Give `ordered_ids` positions 0..n-1 in the given order
///
/// `ordered_ids` must be exactly the unplayed rows of the partition.
pub async fn assign_positions(
    conn: &mut SqliteConnection,
    player_id: &str,
    queue_type: QueueType,
    ordered_ids: &[String],
) -> Result<()> {
    // Phase 1: park every row on a distinct negative position
    sqlx::query(
        r#"
        UPDATE queue SET position = -1 - position
        WHERE player_id = ? AND queue_type = ? AND played_at IS NULL AND position >= 0
        "#,
    )
    .bind(player_id)
    .bind(queue_type)
    .execute(&mut *conn)
    .await?;

    // Phase 2: final positions
    for (position, queue_id) in ordered_ids.iter().enumerate() {
        sqlx::query("UPDATE queue SET position = ? WHERE id = ?")
            .bind(position as i64)
            .bind(queue_id)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}
