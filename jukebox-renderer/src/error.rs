//! Error types for jukebox-renderer

use thiserror::Error;

/// Main error type for jukebox-renderer
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport failure talking to the server
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status and `{error}` body
    #[error("Server returned {status}: {message}")]
    Api { status: u16, message: String },

    /// Event stream framing or decoding failure
    #[error("Event stream error: {0}")]
    Stream(String),

    /// Response or event body did not decode
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Session store file errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Media engine command failed
    #[error("Media engine error: {0}")]
    Media(String),
}

impl Error {
    /// True for a 403 answer, i.e. this session lost priority
    pub fn is_not_priority(&self) -> bool {
        matches!(self, Error::Api { status: 403, .. })
    }
}

impl From<jukebox_common::Error> for Error {
    fn from(err: jukebox_common::Error) -> Self {
        match err {
            jukebox_common::Error::Io(e) => Error::Io(e),
            other => Error::Config(other.to_string()),
        }
    }
}

/// Convenience Result type using jukebox-renderer Error
pub type Result<T> = std::result::Result<T, Error>;
