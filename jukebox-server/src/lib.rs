//! # Jukebox Coordination Server (jukebox-server)
//!
//! Owns the authoritative shared playback queue for every player.
//!
//! **Purpose:** Serialize queue and playlist mutations through SQLite
//! transactions, elect one priority renderer session per player, and fan
//! committed snapshots out to admin consoles, kiosks and renderers over SSE.

pub mod api;
pub mod arbiter;
pub mod config;
pub mod db;
pub mod error;
pub mod fanout;
pub mod gateway;
pub mod playlist;
pub mod state;

pub use api::build_router;
pub use error::{Error, Result};
pub use state::AppContext;
