//! Playback State Synchronizer tests
//!
//! Run under paused tokio time against a scripted server and a recording
//! engine: duplicate ends, skips while loading, fades, the stuck-loading
//! watchdog, the failure breaker, failed or external advances and slave
//! mirroring.

mod helpers;

use helpers::*;
use jukebox_common::events::{JukeboxEvent, PlayerCommandKind};
use jukebox_common::models::{PlayerState, PlayerStatus};
use jukebox_renderer::arbiter::Role;
use jukebox_renderer::engine::{EngineSignal, MediaFailure};
use jukebox_renderer::fade::FADE_STEPS;
use std::time::Duration;
use tokio::time::Instant;

/// Let the cooldown that follows the previous advance run out
async fn past_cooldown() {
    tokio::time::sleep(test_timing().advance_cooldown * 2).await;
}

#[tokio::test(start_paused = true)]
async fn test_promoted_instance_starts_queue_head() {
    let api = MockApi::new(items(&["a", "b"]));
    let mut h = Harness::start(api.clone(), EngineBehavior::Normal, test_timing(), Role::Priority);

    let report = h.wait_playing("a").await;
    assert_eq!(report.role, Role::Priority);
    assert_eq!(api.next_count(), 1);

    let written = api.with(|s| s.reports.last().cloned()).unwrap();
    assert_eq!(written.state, PlayerState::Playing);
    assert_eq!(written.current_media_id.as_deref(), Some("media-a"));
    assert_eq!(written.session_id, "session-under-test");

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_ended_signals_advance_once() {
    let api = MockApi::new(items(&["a", "b", "c"]));
    let mut h = Harness::start(api.clone(), EngineBehavior::Normal, test_timing(), Role::Priority);
    h.wait_playing("a").await;
    past_cooldown().await;

    h.signal(EngineSignal::Ended).await;
    h.signal(EngineSignal::Ended).await;

    h.wait_playing("b").await;
    h.settle().await;

    assert_eq!(api.next_count(), 2);
    assert_eq!(h.engine.loads(), vec!["a".to_string(), "b".to_string()]);
    // Natural end does not fade
    assert!(h.engine.fade_levels().is_empty());

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_late_duplicate_ended_within_cooldown_is_dropped() {
    let api = MockApi::new(items(&["a", "b", "c"]));
    let mut h = Harness::start(api.clone(), EngineBehavior::Normal, test_timing(), Role::Priority);
    h.wait_playing("a").await;
    past_cooldown().await;

    h.signal(EngineSignal::Ended).await;
    h.wait_playing("b").await;

    // Arrives after the new item is already playing
    h.signal(EngineSignal::Ended).await;
    h.settle().await;
    assert_eq!(api.next_count(), 2);

    // A genuine end after the cooldown advances again
    tokio::time::sleep(Duration::from_secs(2)).await;
    h.signal(EngineSignal::Ended).await;
    h.wait_playing("c").await;
    assert_eq!(api.next_count(), 3);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_skip_while_loading_is_ignored() {
    let timing = jukebox_renderer::config::Timing {
        loading_timeout: Duration::from_secs(600),
        ..test_timing()
    };
    let api = MockApi::new(items(&["a", "b"]));
    let mut h = Harness::start(api.clone(), EngineBehavior::Stall, timing, Role::Priority);
    h.wait_for(|r| r.state == PlayerState::Loading).await;

    h.command(PlayerCommandKind::Skip).await;
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(api.next_count(), 1);
    assert!(h.engine.fade_levels().is_empty());
    assert_eq!(h.report.borrow().state, PlayerState::Loading);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_skip_while_idle_is_ignored() {
    let api = MockApi::new(Vec::new());
    let h = Harness::start(api.clone(), EngineBehavior::Normal, test_timing(), Role::Priority);
    h.settle().await;

    h.command(PlayerCommandKind::Skip).await;
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(api.next_count(), 0);
    assert_eq!(h.report.borrow().state, PlayerState::Idle);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_admin_skip_fades_before_advancing() {
    let timing = test_timing();
    let api = MockApi::new(items(&["a", "b", "c"]));
    let mut h = Harness::start(api.clone(), EngineBehavior::Normal, timing, Role::Priority);
    h.wait_playing("a").await;
    past_cooldown().await;

    let skipped_at = Instant::now();
    h.command(PlayerCommandKind::Skip).await;
    // Double click during the fade
    h.command(PlayerCommandKind::Skip).await;

    h.wait_playing("b").await;
    h.settle().await;

    assert_eq!(api.next_count(), 2);
    let advanced_at = api.with(|s| s.next_calls[1]);
    assert!(advanced_at - skipped_at >= timing.fade_duration);

    let fades = h.engine.fade_levels();
    assert_eq!(fades.len(), FADE_STEPS as usize);
    assert!(fades.iter().all(|(at, _)| *at <= advanced_at));
    assert!(fades.windows(2).all(|pair| pair[1].1 <= pair[0].1));
    assert_eq!(fades.last().unwrap().1, 0.0);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stuck_loading_forces_advance() {
    let api = MockApi::new(items(&["a", "b", "c"]));
    let mut h = Harness::start(api.clone(), EngineBehavior::Stall, test_timing(), Role::Priority);
    h.wait_for(|r| r.state == PlayerState::Loading).await;

    tokio::time::sleep(Duration::from_millis(4500)).await;

    let calls = api.with(|s| s.next_calls.clone());
    assert_eq!(calls.len(), 2);
    assert!(calls[1] - calls[0] >= Duration::from_secs(4));
    assert_eq!(h.report.borrow().current_queue_id.as_deref(), Some("b"));
    assert!(h.engine.fade_levels().is_empty());

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_failures_trip_breaker() {
    let api = MockApi::new(items(&["a", "b", "c", "d", "e", "f", "g"]));
    let mut h = Harness::start(
        api.clone(),
        EngineBehavior::Fail(MediaFailure::NotFound),
        test_timing(),
        Role::Priority,
    );

    let report = h.wait_for(|r| r.state == PlayerState::Error).await;
    assert!(report.queue_exhausted);
    h.settle().await;

    assert_eq!(api.next_count(), 5);
    assert_eq!(
        api.with(|s| s.removed_media.clone()),
        vec!["media-a", "media-b", "media-c", "media-d", "media-e"]
    );
    let written = api.with(|s| s.reports.last().cloned()).unwrap();
    assert_eq!(written.state, PlayerState::Error);
    assert!(written.queue_exhausted);

    // The snapshot produced by our own last advance does not reopen playback
    h.publish_queue().await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(api.next_count(), 5);

    // Admin play closes the breaker
    h.engine.set_behavior(EngineBehavior::Normal);
    h.command(PlayerCommandKind::Play).await;
    h.wait_playing("f").await;
    assert_eq!(api.next_count(), 6);
    assert!(!h.report.borrow().queue_exhausted);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_queue_change_closes_breaker() {
    let timing = jukebox_renderer::config::Timing {
        max_consecutive_failures: 2,
        ..test_timing()
    };
    let api = MockApi::new(items(&["a", "b", "c"]));
    let mut h = Harness::start(
        api.clone(),
        EngineBehavior::Fail(MediaFailure::Other),
        timing,
        Role::Priority,
    );
    h.wait_for(|r| r.state == PlayerState::Error).await;
    // Transient failures keep the media in playlists
    assert!(api.with(|s| s.removed_media.is_empty()));

    h.engine.set_behavior(EngineBehavior::Normal);
    api.with(|s| {
        s.queue.push_back(item("z"));
        s.revision += 1;
    });
    h.publish_queue().await;

    h.wait_playing("c").await;
    assert_eq!(api.next_count(), 3);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_idle_instance_starts_when_queue_gains_items() {
    let api = MockApi::new(Vec::new());
    let mut h = Harness::start(api.clone(), EngineBehavior::Normal, test_timing(), Role::Priority);
    h.settle().await;
    assert_eq!(api.next_count(), 0);

    api.with(|s| {
        s.queue.push_back(item("a"));
        s.revision += 1;
    });
    h.publish_queue().await;

    h.wait_playing("a").await;
    assert_eq!(api.next_count(), 1);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_removed_current_row_advances_without_fade() {
    let api = MockApi::new(items(&["a", "b"]));
    let mut h = Harness::start(api.clone(), EngineBehavior::Normal, test_timing(), Role::Priority);
    h.wait_playing("a").await;

    // Admin deletes the row that is playing
    api.with(|s| {
        s.current = None;
        s.revision += 1;
    });
    h.publish_queue().await;

    h.wait_playing("b").await;
    assert_eq!(api.next_count(), 2);
    assert!(h.engine.fade_levels().is_empty());

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_external_next_is_followed_not_repeated() {
    let api = MockApi::new(items(&["a", "b", "c"]));
    let mut h = Harness::start(api.clone(), EngineBehavior::Normal, test_timing(), Role::Priority);
    h.wait_playing("a").await;

    // A kiosk advances the queue through the server
    api.with(|s| advance_queue(s));
    h.publish_queue().await;

    h.wait_playing("b").await;
    h.settle().await;

    assert_eq!(h.engine.loads(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(api.next_count(), 1);
    assert_eq!(api.with(|s| s.queue.len()), 1);
    assert!(h.engine.fade_levels().is_empty());

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_next_is_retried() {
    let timing = test_timing();
    let api = MockApi::new(items(&["a", "b"]));
    let mut h = Harness::start(api.clone(), EngineBehavior::Normal, timing, Role::Priority);
    h.wait_playing("a").await;
    past_cooldown().await;

    api.with(|s| s.fail_next = 1);
    h.signal(EngineSignal::Ended).await;

    h.wait_playing("b").await;
    h.settle().await;

    let calls = api.with(|s| s.next_calls.clone());
    assert_eq!(calls.len(), 3);
    assert!(calls[2] - calls[1] >= timing.advance_retry);
    assert_eq!(h.engine.loads(), vec!["a".to_string(), "b".to_string()]);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_next_that_committed_loads_server_pointer() {
    let api = MockApi::new(items(&["a", "b", "c"]));
    let mut h = Harness::start(api.clone(), EngineBehavior::Normal, test_timing(), Role::Priority);
    h.wait_playing("a").await;
    past_cooldown().await;

    api.with(|s| s.fail_next_after_commit = 1);
    h.signal(EngineSignal::Ended).await;

    h.wait_playing("b").await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    // The committed advance is not repeated
    assert_eq!(api.next_count(), 2);
    assert_eq!(api.with(|s| s.queue.len()), 1);
    assert_eq!(h.engine.loads(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(h.report.borrow().current_queue_id.as_deref(), Some("b"));

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_pause_and_play_commands() {
    let api = MockApi::new(items(&["a"]));
    let mut h = Harness::start(api.clone(), EngineBehavior::Normal, test_timing(), Role::Priority);
    h.wait_playing("a").await;

    h.command(PlayerCommandKind::Pause).await;
    h.wait_for(|r| r.state == PlayerState::Paused).await;
    assert_eq!(api.with(|s| s.status.state), PlayerState::Paused);

    h.command(PlayerCommandKind::Play).await;
    h.wait_playing("a").await;
    assert_eq!(api.next_count(), 1);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_slave_mirrors_status_without_writing() {
    let api = MockApi::new(items(&["a", "b"]));
    let mut h = Harness::start(api.clone(), EngineBehavior::Normal, test_timing(), Role::Slave);

    let mut status = PlayerStatus::idle(PLAYER);
    status.state = PlayerState::Playing;
    status.progress = 42.0;
    status.current_queue_id = Some("a".to_string());
    h.events
        .send(JukeboxEvent::status_snapshot(3, status.clone()))
        .await
        .unwrap();

    let report = h
        .wait_for(|r| r.state == PlayerState::Playing && r.progress == 42.0)
        .await;
    assert_eq!(report.role, Role::Slave);
    assert_eq!(report.current_queue_id.as_deref(), Some("a"));

    // Older revision and admin commands are ignored
    status.state = PlayerState::Paused;
    h.events
        .send(JukeboxEvent::status_snapshot(2, status))
        .await
        .unwrap();
    h.command(PlayerCommandKind::Skip).await;
    h.publish_queue().await;
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(h.report.borrow().state, PlayerState::Playing);
    assert_eq!(api.next_count(), 0);
    assert!(api.with(|s| s.reports.is_empty()));
    assert!(h.engine.calls().is_empty());

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_promotion_resumes_current_item() {
    let api = MockApi::new(items(&["c"]));
    api.with(|s| {
        s.current = Some(item("b"));
        s.status.current_queue_id = Some("b".to_string());
        s.status.state = PlayerState::Playing;
    });
    let mut h = Harness::start(api.clone(), EngineBehavior::Normal, test_timing(), Role::Slave);
    h.settle().await;
    assert!(h.engine.calls().is_empty());

    h.role.send(Role::Priority).unwrap();

    h.wait_playing("b").await;
    assert_eq!(api.next_count(), 0);
    assert_eq!(h.engine.loads(), vec!["b".to_string()]);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_rejected_status_write_demotes() {
    let api = MockApi::new(items(&["a"]));
    api.with(|s| s.reject_status = true);
    let h = Harness::start(api.clone(), EngineBehavior::Normal, test_timing(), Role::Priority);
    h.settle().await;

    assert_eq!(h.report.borrow().role, Role::Slave);
    let calls = h.engine.calls();
    assert_eq!(calls.last().map(|(_, call)| call.clone()), Some(EngineCall::Stop));

    // Demoted instances leave progression alone
    h.signal(EngineSignal::Ended).await;
    h.settle().await;
    assert_eq!(api.next_count(), 1);

    h.shutdown().await;
}
