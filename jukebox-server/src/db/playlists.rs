//! Playlists and playlist items

use crate::error::{Error, Result};
use chrono::Utc;
use jukebox_common::models::{Playlist, PlaylistItem};
use sqlx::{SqliteConnection, SqliteExecutor};
use uuid::Uuid;

pub async fn create_playlist<'e, E>(executor: E, player_id: &str, name: &str) -> Result<Playlist>
where
    E: SqliteExecutor<'e>,
{
    let playlist = Playlist {
        id: Uuid::new_v4().to_string(),
        player_id: player_id.to_string(),
        name: name.to_string(),
        is_active: false,
        created_at: Utc::now(),
    };

    sqlx::query(
        "INSERT INTO playlists (id, player_id, name, is_active, created_at) VALUES (?, ?, ?, 0, ?)",
    )
    .bind(&playlist.id)
    .bind(&playlist.player_id)
    .bind(&playlist.name)
    .bind(playlist.created_at)
    .execute(executor)
    .await?;

    Ok(playlist)
}

pub async fn get_playlist<'e, E>(executor: E, playlist_id: &str) -> Result<Option<Playlist>>
where
    E: SqliteExecutor<'e>,
{
    let playlist = sqlx::query_as::<_, Playlist>(
        "SELECT id, player_id, name, is_active, created_at FROM playlists WHERE id = ?",
    )
    .bind(playlist_id)
    .fetch_optional(executor)
    .await?;

    Ok(playlist)
}

pub async fn require_playlist<'e, E>(executor: E, playlist_id: &str) -> Result<Playlist>
where
    E: SqliteExecutor<'e>,
{
    get_playlist(executor, playlist_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("playlist not found: {}", playlist_id)))
}

pub async fn list_playlists<'e, E>(executor: E, player_id: &str) -> Result<Vec<Playlist>>
where
    E: SqliteExecutor<'e>,
{
    let playlists = sqlx::query_as::<_, Playlist>(
        r#"
        SELECT id, player_id, name, is_active, created_at
        FROM playlists WHERE player_id = ?
        ORDER BY created_at, id
        "#,
    )
    .bind(player_id)
    .fetch_all(executor)
    .await?;

    Ok(playlists)
}

pub async fn rename_playlist<'e, E>(executor: E, playlist_id: &str, name: &str) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query("UPDATE playlists SET name = ? WHERE id = ?")
        .bind(name)
        .bind(playlist_id)
        .execute(executor)
        .await?;

    Ok(())
}

pub async fn delete_playlist<'e, E>(executor: E, playlist_id: &str) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query("DELETE FROM playlists WHERE id = ?")
        .bind(playlist_id)
        .execute(executor)
        .await?;

    Ok(())
}

/// Make `playlist_id` the only active playlist of its player
pub async fn set_active(conn: &mut SqliteConnection, player_id: &str, playlist_id: &str) -> Result<()> {
    sqlx::query("UPDATE playlists SET is_active = 0 WHERE player_id = ? AND is_active = 1")
        .bind(player_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query("UPDATE playlists SET is_active = 1 WHERE id = ? AND player_id = ?")
        .bind(playlist_id)
        .bind(player_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub async fn list_items<'e, E>(executor: E, playlist_id: &str) -> Result<Vec<PlaylistItem>>
where
    E: SqliteExecutor<'e>,
{
    let items = sqlx::query_as::<_, PlaylistItem>(
        r#"
        SELECT id, playlist_id, media_item_id, position
        FROM playlist_items WHERE playlist_id = ?
        ORDER BY position, id
        "#,
    )
    .bind(playlist_id)
    .fetch_all(executor)
    .await?;

    Ok(items)
}

/// Append a media item to the end of a playlist
pub async fn add_item<'e, E>(executor: E, playlist_id: &str, media_item_id: &str) -> Result<String>
where
    E: SqliteExecutor<'e>,
{
    let item_id = Uuid::new_v4().to_string();

    sqlx::query(
        r#"
        INSERT INTO playlist_items (id, playlist_id, media_item_id, position)
        SELECT ?, ?, ?, COALESCE(MAX(position) + 1, 0)
        FROM playlist_items WHERE playlist_id = ?
        "#,
    )
    .bind(&item_id)
    .bind(playlist_id)
    .bind(media_item_id)
    .bind(playlist_id)
    .execute(executor)
    .await?;

    Ok(item_id)
}

/// Remove one item; returns its playlist id if it existed
pub async fn remove_item(conn: &mut SqliteConnection, item_id: &str) -> Result<Option<String>> {
    let playlist_id: Option<String> =
        sqlx::query_scalar("SELECT playlist_id FROM playlist_items WHERE id = ?")
            .bind(item_id)
            .fetch_optional(&mut *conn)
            .await?;

    let Some(playlist_id) = playlist_id else {
        return Ok(None);
    };

    sqlx::query("DELETE FROM playlist_items WHERE id = ?")
        .bind(item_id)
        .execute(&mut *conn)
        .await?;

    renumber_items(conn, &playlist_id).await?;

    Ok(Some(playlist_id))
}

/// Assign positions 0..n-1 in the given order
pub async fn assign_item_positions(conn: &mut SqliteConnection, ordered_ids: &[String]) -> Result<()> {
    for (position, item_id) in ordered_ids.iter().enumerate() {
        sqlx::query("UPDATE playlist_items SET position = ? WHERE id = ?")
            .bind(position as i64)
            .bind(item_id)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

pub async fn renumber_items(conn: &mut SqliteConnection, playlist_id: &str) -> Result<()> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT id FROM playlist_items WHERE playlist_id = ? ORDER BY position, id",
    )
    .bind(playlist_id)
    .fetch_all(&mut *conn)
    .await?;

    assign_item_positions(conn, &ids).await
}

/// Delete a media item from every playlist; returns (removed rows, touched playlists)
pub async fn remove_media_everywhere(
    conn: &mut SqliteConnection,
    media_item_id: &str,
) -> Result<(u64, Vec<Playlist>)> {
    let touched = sqlx::query_as::<_, Playlist>(
        r#"
        SELECT DISTINCT p.id, p.player_id, p.name, p.is_active, p.created_at
        FROM playlists p
        JOIN playlist_items i ON i.playlist_id = p.id
        WHERE i.media_item_id = ?
        "#,
    )
    .bind(media_item_id)
    .fetch_all(&mut *conn)
    .await?;

    let result = sqlx::query("DELETE FROM playlist_items WHERE media_item_id = ?")
        .bind(media_item_id)
        .execute(&mut *conn)
        .await?;

    for playlist in &touched {
        renumber_items(&mut *conn, &playlist.id).await?;
    }

    Ok((result.rows_affected(), touched))
}
