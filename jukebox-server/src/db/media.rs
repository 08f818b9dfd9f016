//! Media item catalogue

use crate::error::{Error, Result};
use jukebox_common::models::MediaItem;
use sqlx::SqliteExecutor;
use uuid::Uuid;

/// Insert a media item, or refresh title/duration if `source_id` is known
pub async fn upsert_media<'e, E>(
    executor: E,
    source_id: &str,
    title: &str,
    duration_seconds: Option<f64>,
) -> Result<MediaItem>
where
    E: SqliteExecutor<'e>,
{
    let item = sqlx::query_as::<_, MediaItem>(
        r#"
        INSERT INTO media_items (id, source_id, title, duration_seconds)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(source_id) DO UPDATE SET
            title = excluded.title,
            duration_seconds = COALESCE(excluded.duration_seconds, media_items.duration_seconds)
        RETURNING id, source_id, title, duration_seconds
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(source_id)
    .bind(title)
    .bind(duration_seconds)
    .fetch_one(executor)
    .await?;

    Ok(item)
}

pub async fn get_media<'e, E>(executor: E, id: &str) -> Result<Option<MediaItem>>
where
    E: SqliteExecutor<'e>,
{
    let item = sqlx::query_as::<_, MediaItem>(
        "SELECT id, source_id, title, duration_seconds FROM media_items WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(item)
}

pub async fn require_media<'e, E>(executor: E, id: &str) -> Result<MediaItem>
where
    E: SqliteExecutor<'e>,
{
    get_media(executor, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("media item not found: {}", id)))
}
