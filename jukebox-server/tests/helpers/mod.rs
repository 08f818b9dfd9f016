//! Test Helper Utilities
//!
//! Shared setup for jukebox-server integration tests

#![allow(dead_code)]

use jukebox_common::db::{init_database, init_memory_database};
use jukebox_common::models::QueueType;
use jukebox_common::RetryPolicy;
use jukebox_server::config::RuntimeSettings;
use jukebox_server::db::{media, players, queue};
use jukebox_server::AppContext;
use std::time::Duration;
use tempfile::TempDir;

/// Settings with short retry delays so conflict tests stay quick
pub fn test_settings() -> RuntimeSettings {
    RuntimeSettings {
        retry: RetryPolicy {
            max_attempts: 20,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
            jitter: Duration::from_millis(10),
        },
        ..RuntimeSettings::default()
    }
}

/// Single-connection in-memory database
pub async fn memory_context() -> AppContext {
    memory_context_with(test_settings()).await
}

pub async fn memory_context_with(settings: RuntimeSettings) -> AppContext {
    let db = init_memory_database().await.expect("memory database");
    AppContext::new(db, settings)
}

/// File-backed database with a real connection pool, for concurrency tests
///
/// Returns (TempDir, AppContext) - TempDir must be kept alive for duration of test
pub async fn file_context() -> (TempDir, AppContext) {
    let temp_dir = TempDir::new().expect("temp dir");
    let db = init_database(&temp_dir.path().join("jukebox_test.db"))
        .await
        .expect("file database");
    (temp_dir, AppContext::new(db, test_settings()))
}

pub async fn seed_player(ctx: &AppContext, player_id: &str) {
    let mut conn = ctx.db.acquire().await.expect("connection");
    players::create_player(&mut conn, player_id, &format!("Player {}", player_id))
        .await
        .expect("create player");
}

/// Register a priority session so the player counts as online
pub async fn bring_online(ctx: &AppContext, player_id: &str) -> String {
    let session_id = format!("session-{}", player_id);
    let response = ctx
        .arbiter()
        .register_session(player_id, &session_id, None)
        .await
        .expect("register session");
    assert!(response.is_priority, "first session should win priority");
    session_id
}

/// Online player ready for queue commands
pub async fn online_player(ctx: &AppContext, player_id: &str) -> String {
    seed_player(ctx, player_id).await;
    bring_online(ctx, player_id).await
}

pub async fn seed_media(ctx: &AppContext, source_id: &str) -> String {
    media::upsert_media(&ctx.db, source_id, &format!("Title {}", source_id), Some(180.0))
        .await
        .expect("upsert media")
        .id
}

/// (queue id, position) pairs of one partition, in position order
pub async fn positions(ctx: &AppContext, player_id: &str, queue_type: QueueType) -> Vec<(String, i64)> {
    let mut conn = ctx.db.acquire().await.expect("connection");
    queue::list_partition(&mut conn, player_id, queue_type)
        .await
        .expect("list partition")
        .into_iter()
        .map(|item| (item.id, item.position))
        .collect()
}

/// Queue ids of one partition in position order
pub async fn order(ctx: &AppContext, player_id: &str, queue_type: QueueType) -> Vec<String> {
    positions(ctx, player_id, queue_type)
        .await
        .into_iter()
        .map(|(id, _)| id)
        .collect()
}

/// Positions must be exactly 0..n-1
pub async fn assert_contiguous(ctx: &AppContext, player_id: &str, queue_type: QueueType) {
    let found: Vec<i64> = positions(ctx, player_id, queue_type)
        .await
        .into_iter()
        .map(|(_, position)| position)
        .collect();
    let expected: Vec<i64> = (0..found.len() as i64).collect();
    assert_eq!(found, expected, "{} partition of {} not contiguous", queue_type, player_id);
}
