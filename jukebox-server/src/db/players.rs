//! Player registry

use crate::error::{Error, Result};
use chrono::Utc;
use jukebox_common::models::{Player, PlayerStatus};
use sqlx::{SqliteConnection, SqliteExecutor};

/// Create a player together with its idle status row
pub async fn create_player(conn: &mut SqliteConnection, id: &str, name: &str) -> Result<Player> {
    let player = Player {
        id: id.to_string(),
        name: name.to_string(),
        created_at: Utc::now(),
    };

    sqlx::query("INSERT INTO players (id, name, created_at) VALUES (?, ?, ?)")
        .bind(&player.id)
        .bind(&player.name)
        .bind(player.created_at)
        .execute(&mut *conn)
        .await?;

    super::status::write_status(&mut *conn, &PlayerStatus::idle(id)).await?;

    Ok(player)
}

pub async fn get_player<'e, E>(executor: E, id: &str) -> Result<Option<Player>>
where
    E: SqliteExecutor<'e>,
{
    let player = sqlx::query_as::<_, Player>("SELECT id, name, created_at FROM players WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?;

    Ok(player)
}

/// Fetch a player or fail with NotFound
pub async fn require_player<'e, E>(executor: E, id: &str) -> Result<Player>
where
    E: SqliteExecutor<'e>,
{
    get_player(executor, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("player not found: {}", id)))
}

pub async fn list_players<'e, E>(executor: E) -> Result<Vec<Player>>
where
    E: SqliteExecutor<'e>,
{
    let players = sqlx::query_as::<_, Player>(
        "SELECT id, name, created_at FROM players ORDER BY created_at, id",
    )
    .fetch_all(executor)
    .await?;

    Ok(players)
}
