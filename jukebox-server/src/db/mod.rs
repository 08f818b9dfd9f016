//! Database access for the coordination server
//!
//! Functions that run several statements take `&mut SqliteConnection` so they
//! can be composed inside one transaction (`&mut *tx`). Single-statement
//! helpers accept any executor.

pub mod media;
pub mod players;
pub mod playlists;
pub mod queue;
pub mod revision;
pub mod sessions;
pub mod settings;
pub mod status;
