//! Queue integrity tests
//!
//! Position invariants, the add/remove/reorder scenario, idempotent
//! reorder, overlapping reorders against a pooled file database, and
//! `next()` exhausting the queue.

mod helpers;

use helpers::*;
use jukebox_common::models::{PlayerState, QueueType};
use jukebox_server::db::status;
use jukebox_server::gateway::{parse_request, QueueCommand};
use jukebox_server::Error;
use jukebox_common::api::QueueRequest;

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_add_remove_reorder_scenario() {
    let ctx = memory_context().await;
    online_player(&ctx, "p1").await;
    let gateway = ctx.gateway();

    let mut queued = Vec::new();
    for source in ["A", "B", "C"] {
        let media_id = seed_media(&ctx, source).await;
        queued.push(gateway.add("p1", &media_id, QueueType::Normal, None).await.unwrap());
    }
    let (a, b, c) = (queued[0].clone(), queued[1].clone(), queued[2].clone());

    assert_eq!(
        positions(&ctx, "p1", QueueType::Normal).await,
        vec![(a.clone(), 0), (b.clone(), 1), (c.clone(), 2)]
    );

    gateway.remove("p1", &b).await.unwrap();
    assert_eq!(
        positions(&ctx, "p1", QueueType::Normal).await,
        vec![(a.clone(), 0), (c.clone(), 1)]
    );

    gateway
        .reorder("p1", QueueType::Normal, &[c.clone(), a.clone()])
        .await
        .unwrap();
    assert_eq!(
        positions(&ctx, "p1", QueueType::Normal).await,
        vec![(c, 0), (a, 1)]
    );
}

#[tokio::test]
async fn test_partitions_stay_contiguous_under_mixed_mutations() {
    let ctx = memory_context().await;
    online_player(&ctx, "p1").await;
    let gateway = ctx.gateway();

    let mut normal = Vec::new();
    let mut priority = Vec::new();
    for i in 0..6 {
        let media_id = seed_media(&ctx, &format!("m{}", i)).await;
        normal.push(gateway.add("p1", &media_id, QueueType::Normal, None).await.unwrap());
        priority.push(
            gateway
                .add("p1", &media_id, QueueType::Priority, Some("table 4"))
                .await
                .unwrap(),
        );
    }

    gateway.remove("p1", &normal[0]).await.unwrap();
    gateway.remove("p1", &normal[3]).await.unwrap();
    gateway.remove("p1", &priority[5]).await.unwrap();
    gateway.shuffle("p1", QueueType::Normal).await.unwrap();
    gateway
        .reorder("p1", QueueType::Priority, &[priority[4].clone(), priority[1].clone()])
        .await
        .unwrap();

    assert_contiguous(&ctx, "p1", QueueType::Normal).await;
    assert_contiguous(&ctx, "p1", QueueType::Priority).await;
    assert_eq!(positions(&ctx, "p1", QueueType::Normal).await.len(), 4);

    let priority_order = order(&ctx, "p1", QueueType::Priority).await;
    assert_eq!(priority_order[0], priority[4]);
    assert_eq!(priority_order[1], priority[1]);
    assert_eq!(priority_order.len(), 5);
}

#[tokio::test]
async fn test_reorder_is_idempotent() {
    let ctx = memory_context().await;
    online_player(&ctx, "p1").await;
    let gateway = ctx.gateway();

    let mut queued = Vec::new();
    for source in ["x", "y", "z"] {
        let media_id = seed_media(&ctx, source).await;
        queued.push(gateway.add("p1", &media_id, QueueType::Normal, None).await.unwrap());
    }
    let target = vec![queued[2].clone(), queued[0].clone(), queued[1].clone()];

    gateway.reorder("p1", QueueType::Normal, &target).await.unwrap();
    let first = positions(&ctx, "p1", QueueType::Normal).await;

    let mut conn = ctx.db.acquire().await.unwrap();
    let revision_before = jukebox_server::fanout::queue_snapshot(&mut conn, "p1")
        .await
        .unwrap()
        .revision;
    drop(conn);

    gateway.reorder("p1", QueueType::Normal, &target).await.unwrap();
    assert_eq!(positions(&ctx, "p1", QueueType::Normal).await, first);

    let mut conn = ctx.db.acquire().await.unwrap();
    let revision_after = jukebox_server::fanout::queue_snapshot(&mut conn, "p1")
        .await
        .unwrap()
        .revision;
    assert_eq!(revision_before, revision_after, "no-op reorder must not commit");
}

#[tokio::test]
async fn test_reorder_ignores_stale_ids_and_keeps_unnamed_members() {
    let ctx = memory_context().await;
    online_player(&ctx, "p1").await;
    let gateway = ctx.gateway();

    let mut queued = Vec::new();
    for source in ["a", "b", "c"] {
        let media_id = seed_media(&ctx, source).await;
        queued.push(gateway.add("p1", &media_id, QueueType::Normal, None).await.unwrap());
    }
    gateway.remove("p1", &queued[1]).await.unwrap();

    gateway
        .reorder("p1", QueueType::Normal, &[queued[1].clone(), queued[2].clone()])
        .await
        .unwrap();

    assert_eq!(
        order(&ctx, "p1", QueueType::Normal).await,
        vec![queued[2].clone(), queued[0].clone()]
    );
}

#[tokio::test]
async fn test_reorder_envelope_validation() {
    let mut request = QueueRequest::action("p1", "reorder");
    request.queue_ids = Some(vec![]);
    assert!(matches!(parse_request(request), Err(Error::InvalidInput(_))));

    let mut request = QueueRequest::action("p1", "reorder");
    request.queue_ids = Some(ids(&["q1", "q1"]));
    assert!(matches!(parse_request(request), Err(Error::InvalidInput(_))));

    let mut request = QueueRequest::action("p1", "clear");
    request.queue_type = Some("all".to_string());
    assert_eq!(
        parse_request(request).unwrap().1,
        QueueCommand::Clear { queue_type: None }
    );

    let mut request = QueueRequest::action("p1", "add");
    request.media_item_id = Some("m1".to_string());
    request.queue_type = Some("vip".to_string());
    assert!(matches!(parse_request(request), Err(Error::InvalidInput(_))));
}

#[tokio::test]
async fn test_concurrent_reorders_apply_exactly_one_order() {
    let (_dir, ctx) = file_context().await;
    online_player(&ctx, "p1").await;

    let mut queued = Vec::new();
    for source in ["X", "Y", "Z"] {
        let media_id = seed_media(&ctx, source).await;
        queued.push(
            ctx.gateway()
                .add("p1", &media_id, QueueType::Normal, None)
                .await
                .unwrap(),
        );
    }
    let forward = vec![queued[0].clone(), queued[1].clone(), queued[2].clone()];
    let backward = vec![queued[2].clone(), queued[1].clone(), queued[0].clone()];

    // Start from neither order so both reorders must write
    ctx.gateway()
        .reorder("p1", QueueType::Normal, &[queued[1].clone(), queued[0].clone()])
        .await
        .unwrap();

    for _ in 0..5 {
        let gateway_a = ctx.gateway();
        let gateway_b = ctx.gateway();
        let (first, second) = tokio::join!(
            gateway_a.reorder("p1", QueueType::Normal, &forward),
            gateway_b.reorder("p1", QueueType::Normal, &backward),
        );
        first.unwrap();
        second.unwrap();

        let result = order(&ctx, "p1", QueueType::Normal).await;
        assert!(
            result == forward || result == backward,
            "unexpected order {:?}",
            result
        );
        assert_contiguous(&ctx, "p1", QueueType::Normal).await;
    }
}

#[tokio::test]
async fn test_concurrent_adds_get_distinct_positions() {
    let (_dir, ctx) = file_context().await;
    online_player(&ctx, "p1").await;
    let media_id = seed_media(&ctx, "song").await;

    let adds = (0..8).map(|_| {
        let ctx = ctx.clone();
        let media_id = media_id.clone();
        tokio::spawn(async move {
            ctx.gateway()
                .add("p1", &media_id, QueueType::Priority, None)
                .await
        })
    });

    for handle in futures::future::join_all(adds).await {
        handle.unwrap().unwrap();
    }

    assert_eq!(positions(&ctx, "p1", QueueType::Priority).await.len(), 8);
    assert_contiguous(&ctx, "p1", QueueType::Priority).await;
}

#[tokio::test]
async fn test_next_on_exhausted_queue_clears_current_media() {
    let ctx = memory_context().await;
    online_player(&ctx, "p1").await;
    let gateway = ctx.gateway();

    let media_id = seed_media(&ctx, "only").await;
    let queue_id = gateway.add("p1", &media_id, QueueType::Normal, None).await.unwrap();

    let playing = gateway.next("p1").await.unwrap().unwrap();
    assert_eq!(playing.id, queue_id);
    let current = status::get_status(&ctx.db, "p1").await.unwrap();
    assert_eq!(current.current_media_id.as_deref(), Some(media_id.as_str()));
    assert_eq!(current.state, PlayerState::Loading);

    assert!(gateway.next("p1").await.unwrap().is_none());
    let current = status::get_status(&ctx.db, "p1").await.unwrap();
    assert_eq!(current.current_media_id, None);
    assert_eq!(current.current_queue_id, None);
    assert_eq!(current.state, PlayerState::Idle);
    assert!(positions(&ctx, "p1", QueueType::Normal).await.is_empty());
}

#[tokio::test]
async fn test_next_prefers_priority_and_marks_only_current_row() {
    let ctx = memory_context().await;
    online_player(&ctx, "p1").await;
    let gateway = ctx.gateway();

    let background = seed_media(&ctx, "background").await;
    let request = seed_media(&ctx, "request").await;
    let normal_id = gateway.add("p1", &background, QueueType::Normal, None).await.unwrap();

    let first = gateway.next("p1").await.unwrap().unwrap();
    assert_eq!(first.id, normal_id);

    // A request arrives while the normal item plays
    let priority_id = gateway
        .add("p1", &request, QueueType::Priority, Some("guest"))
        .await
        .unwrap();

    let second = gateway.next("p1").await.unwrap().unwrap();
    assert_eq!(second.id, priority_id);
    assert!(positions(&ctx, "p1", QueueType::Normal).await.is_empty());

    let current = status::get_status(&ctx.db, "p1").await.unwrap();
    assert_eq!(current.now_playing_index, 1);
}

#[tokio::test]
async fn test_queue_commands_require_online_player() {
    let ctx = memory_context().await;
    seed_player(&ctx, "p1").await;

    let result = ctx.gateway().execute("p1", QueueCommand::Next).await;
    assert!(matches!(result, Err(Error::PlayerOffline(_))));

    let result = ctx.gateway().execute("ghost", QueueCommand::Next).await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_clear_all_empties_both_partitions() {
    let ctx = memory_context().await;
    online_player(&ctx, "p1").await;
    let gateway = ctx.gateway();
    let media_id = seed_media(&ctx, "m").await;

    gateway.add("p1", &media_id, QueueType::Normal, None).await.unwrap();
    gateway.add("p1", &media_id, QueueType::Priority, None).await.unwrap();

    assert_eq!(gateway.clear("p1", None).await.unwrap(), 2);
    assert!(positions(&ctx, "p1", QueueType::Normal).await.is_empty());
    assert!(positions(&ctx, "p1", QueueType::Priority).await.is_empty());
}
