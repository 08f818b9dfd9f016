//! Renderer-side session arbitration tests
//!
//! Stored session persistence across restarts, demotion on a rejected
//! heartbeat, and the heartbeat / re-registration timers.

mod helpers;

use helpers::*;
use jukebox_common::models::PlayerState;
use jukebox_renderer::arbiter::{ArbiterClient, Role};
use jukebox_renderer::session_store::SessionStore;
use jukebox_renderer::synchronizer::PlaybackReport;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

fn store_in(dir: &tempfile::TempDir) -> SessionStore {
    SessionStore::new(dir.path().join("renderer_session"))
}

#[tokio::test]
async fn test_priority_registration_persists_session_id() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let api = MockApi::new(Vec::new());
    let (arbiter, role) = ArbiterClient::new(api.clone(), store.clone(), test_timing());

    assert_eq!(arbiter.register().await.unwrap(), Role::Priority);
    assert_eq!(*role.borrow(), Role::Priority);
    assert_eq!(
        store.load().await.unwrap().as_deref(),
        Some(arbiter.session_id())
    );
}

#[tokio::test]
async fn test_restart_presents_stored_session_id() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    store.save("previous-run").await.unwrap();

    let api = MockApi::new(Vec::new());
    let (arbiter, _role) = ArbiterClient::new(api.clone(), store.clone(), test_timing());
    arbiter.register().await.unwrap();

    let (session_id, stored) = api.with(|s| s.registrations[0].clone());
    assert_eq!(session_id, arbiter.session_id());
    assert_ne!(session_id, "previous-run");
    assert_eq!(stored.as_deref(), Some("previous-run"));

    // The new id replaces the old one
    assert_eq!(
        store.load().await.unwrap().as_deref(),
        Some(arbiter.session_id())
    );
}

#[tokio::test]
async fn test_slave_registration_clears_stored_id() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    store.save("stale").await.unwrap();

    let api = MockApi::new(Vec::new());
    api.with(|s| s.grant_priority = false);
    let (arbiter, role) = ArbiterClient::new(api.clone(), store.clone(), test_timing());

    assert_eq!(arbiter.register().await.unwrap(), Role::Slave);
    assert_eq!(*role.borrow(), Role::Slave);
    assert_eq!(store.load().await.unwrap(), None);
}

#[tokio::test]
async fn test_rejected_heartbeat_demotes() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(&dir);
    let api = MockApi::new(Vec::new());
    let (arbiter, role) = ArbiterClient::new(api.clone(), store.clone(), test_timing());
    arbiter.register().await.unwrap();

    let report = PlaybackReport {
        state: PlayerState::Playing,
        progress: 30.0,
        ..PlaybackReport::default()
    };
    assert_eq!(arbiter.heartbeat(&report).await.unwrap(), Role::Priority);

    api.with(|s| s.heartbeat_priority = false);
    assert_eq!(arbiter.heartbeat(&report).await.unwrap(), Role::Slave);
    assert_eq!(*role.borrow(), Role::Slave);
    assert_eq!(store.load().await.unwrap(), None);
    assert_eq!(
        api.with(|s| s.heartbeats.clone()),
        vec![(PlayerState::Playing, 30.0), (PlayerState::Playing, 30.0)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_background_task_heartbeats_then_reregisters() {
    let dir = tempfile::tempdir().unwrap();
    let api = MockApi::new(Vec::new());
    let (arbiter, mut role) = ArbiterClient::new(api.clone(), store_in(&dir), test_timing());

    let (_report_tx, report_rx) = watch::channel(PlaybackReport {
        state: PlayerState::Playing,
        progress: 12.0,
        ..PlaybackReport::default()
    });
    let cancel = CancellationToken::new();
    let task = arbiter.spawn(report_rx, cancel.clone());

    // Registered at 0s, heartbeats at 3s, 6s and 9s
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(*role.borrow_and_update(), Role::Priority);
    assert_eq!(api.with(|s| s.registrations.len()), 1);
    assert_eq!(api.with(|s| s.heartbeats.len()), 3);
    assert!(api
        .with(|s| s.heartbeats.clone())
        .iter()
        .all(|hb| *hb == (PlayerState::Playing, 12.0)));

    // Heartbeat at 12s is rejected; re-registration at 17s stays slave
    api.with(|s| {
        s.heartbeat_priority = false;
        s.grant_priority = false;
    });
    tokio::time::sleep(Duration::from_secs(8)).await;
    assert_eq!(*role.borrow(), Role::Slave);
    assert_eq!(api.with(|s| s.heartbeats.len()), 4);
    assert_eq!(api.with(|s| s.registrations.len()), 2);

    // Server unreachable: keep trying without changing role
    api.with(|s| s.offline = true);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(*role.borrow(), Role::Slave);

    // Takes over once the server grants priority again
    api.with(|s| {
        s.offline = false;
        s.grant_priority = true;
    });
    tokio::time::timeout(Duration::from_secs(10), role.wait_for(|r| *r == Role::Priority))
        .await
        .expect("never promoted")
        .unwrap();

    cancel.cancel();
    task.await.unwrap();
}
