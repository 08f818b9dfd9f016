//! # Jukebox Common Library
//!
//! Shared code for the jukebox coordination server and renderer instances:
//! - Data models (queue items, player status, sessions, playlists)
//! - Event types (JukeboxEvent enum) and the in-process EventBus
//! - Wire request/response types shared by server and clients
//! - Conflict retry policy
//! - Last-snapshot-wins reconciliation for optimistic client state
//! - Configuration loading
//! - Fade curve definitions

pub mod api;
pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod fade_curves;
pub mod models;
pub mod reconcile;
pub mod retry;

pub use error::{Error, Result};
pub use fade_curves::FadeCurve;
pub use retry::{retry_on_conflict, Conflicting, RetryPolicy};
