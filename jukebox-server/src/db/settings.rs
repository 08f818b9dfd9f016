//! Settings table access
//!
//! Per-player rows (e.g. `shuffle`) plus global runtime settings stored under
//! player id `""`.

use crate::error::Result;
use sqlx::SqliteExecutor;
use std::collections::BTreeMap;

/// Player id used for global settings rows
pub const GLOBAL: &str = "";

/// Per-player setting toggling shuffle on playlist load
pub const SHUFFLE: &str = "shuffle";

pub async fn get_setting<'e, E>(executor: E, player_id: &str, key: &str) -> Result<Option<String>>
where
    E: SqliteExecutor<'e>,
{
    let value = sqlx::query_scalar("SELECT value FROM settings WHERE player_id = ? AND key = ?")
        .bind(player_id)
        .bind(key)
        .fetch_optional(executor)
        .await?;

    Ok(value)
}

pub async fn set_setting<'e, E>(executor: E, player_id: &str, key: &str, value: &str) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO settings (player_id, key, value) VALUES (?, ?, ?)
        ON CONFLICT(player_id, key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(player_id)
    .bind(key)
    .bind(value)
    .execute(executor)
    .await?;

    Ok(())
}

/// Boolean setting; accepts `true`/`1`/`yes`/`on` (case-insensitive)
pub async fn get_bool<'e, E>(executor: E, player_id: &str, key: &str) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    Ok(get_setting(executor, player_id, key)
        .await?
        .map(|value| parse_bool(&value))
        .unwrap_or(false))
}

pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

pub async fn get_player_settings<'e, E>(executor: E, player_id: &str) -> Result<BTreeMap<String, String>>
where
    E: SqliteExecutor<'e>,
{
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT key, value FROM settings WHERE player_id = ? ORDER BY key")
            .bind(player_id)
            .fetch_all(executor)
            .await?;

    Ok(rows.into_iter().collect())
}
