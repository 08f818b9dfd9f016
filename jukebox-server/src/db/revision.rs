//! Per-entity revision counters
//!
//! A revision is bumped inside the same transaction as the mutation it
//! versions, so snapshot revisions follow commit order per entity.

use crate::error::Result;
use sqlx::SqliteExecutor;

/// Increment and return the revision for `entity`
pub async fn bump<'e, E>(executor: E, entity: &str) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let revision = sqlx::query_scalar(
        r#"
        INSERT INTO revisions (entity, revision) VALUES (?, 1)
        ON CONFLICT(entity) DO UPDATE SET revision = revision + 1
        RETURNING revision
        "#,
    )
    .bind(entity)
    .fetch_one(executor)
    .await?;

    Ok(revision)
}

/// Current revision for `entity` (0 if never written)
pub async fn current<'e, E>(executor: E, entity: &str) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let revision: Option<i64> =
        sqlx::query_scalar("SELECT revision FROM revisions WHERE entity = ?")
            .bind(entity)
            .fetch_optional(executor)
            .await?;

    Ok(revision.unwrap_or(0))
}
