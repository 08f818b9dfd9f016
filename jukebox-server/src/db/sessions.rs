//! Session Registry
//!
//! At most one `is_priority = 1` row per player, enforced by
//! `idx_sessions_single_priority`.

use crate::error::Result;
use chrono::{DateTime, Utc};
use jukebox_common::models::PlayerSession;
use sqlx::SqliteExecutor;

const SELECT_SESSION: &str = r#"
    SELECT session_id, player_id, is_priority, last_heartbeat, created_at
    FROM player_sessions
"#;

pub async fn current_priority<'e, E>(executor: E, player_id: &str) -> Result<Option<PlayerSession>>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!("{} WHERE player_id = ? AND is_priority = 1", SELECT_SESSION);

    let session = sqlx::query_as::<_, PlayerSession>(&sql)
        .bind(player_id)
        .fetch_optional(executor)
        .await?;

    Ok(session)
}

/// Clear the priority flag on every session of a player
pub async fn demote_all<'e, E>(executor: E, player_id: &str) -> Result<u64>
where
    E: SqliteExecutor<'e>,
{
    let result =
        sqlx::query("UPDATE player_sessions SET is_priority = 0 WHERE player_id = ? AND is_priority = 1")
            .bind(player_id)
            .execute(executor)
            .await?;

    Ok(result.rows_affected())
}

/// Insert or refresh a session row with the given role
pub async fn upsert_session<'e, E>(
    executor: E,
    session_id: &str,
    player_id: &str,
    is_priority: bool,
    now: DateTime<Utc>,
) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO player_sessions (session_id, player_id, is_priority, last_heartbeat, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(session_id) DO UPDATE SET
            player_id = excluded.player_id,
            is_priority = excluded.is_priority,
            last_heartbeat = excluded.last_heartbeat
        "#,
    )
    .bind(session_id)
    .bind(player_id)
    .bind(is_priority)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn touch_heartbeat<'e, E>(executor: E, session_id: &str, now: DateTime<Utc>) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query("UPDATE player_sessions SET last_heartbeat = ? WHERE session_id = ?")
        .bind(now)
        .bind(session_id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jukebox_common::db::init_memory_database;

    #[tokio::test]
    async fn test_priority_lifecycle() {
        let db = init_memory_database().await.unwrap();
        sqlx::query("INSERT INTO players (id, name) VALUES ('p1', 'Bar')")
            .execute(&db)
            .await
            .unwrap();

        let now = Utc::now();
        upsert_session(&db, "s1", "p1", true, now).await.unwrap();
        upsert_session(&db, "s2", "p1", false, now).await.unwrap();

        let current = current_priority(&db, "p1").await.unwrap().unwrap();
        assert_eq!(current.session_id, "s1");

        // Promoting s2 without demoting s1 first violates the index
        let err = upsert_session(&db, "s2", "p1", true, now).await.unwrap_err();
        assert!(jukebox_common::Conflicting::is_conflict(&err));

        assert_eq!(demote_all(&db, "p1").await.unwrap(), 1);
        upsert_session(&db, "s2", "p1", true, now).await.unwrap();
        assert_eq!(
            current_priority(&db, "p1").await.unwrap().unwrap().session_id,
            "s2"
        );

        assert!(touch_heartbeat(&db, "s2", Utc::now()).await.unwrap());
        assert!(!touch_heartbeat(&db, "missing", Utc::now()).await.unwrap());
        let demoted: bool =
            sqlx::query_scalar("SELECT is_priority FROM player_sessions WHERE session_id = 's1'")
                .fetch_one(&db)
                .await
                .unwrap();
        assert!(!demoted);
    }
}
