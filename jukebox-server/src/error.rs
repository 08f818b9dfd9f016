//! Error types for jukebox-server
//!
//! Every error maps to an HTTP status in `IntoResponse`; bodies are always
//! `{"error": message}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use jukebox_common::api::ErrorResponse;
use jukebox_common::error::is_sqlx_conflict;
use jukebox_common::Conflicting;
use thiserror::Error;

/// Main error type for jukebox-server
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unknown player, queue row, playlist or media item
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing/unknown fields or unknown action
    #[error("Invalid request: {0}")]
    InvalidInput(String),

    /// Write collision that survived (or was not eligible for) retry
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// Target player has no live priority session
    #[error("Player offline: {0}")]
    PlayerOffline(String),

    /// Status write from a session that does not hold priority
    #[error("Session is not priority: {0}")]
    NotPriority(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using jukebox-server Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidInput(_) | Error::PlayerOffline(_) => StatusCode::BAD_REQUEST,
            Error::NotPriority(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Config(_)
            | Error::Database(_)
            | Error::Http(_)
            | Error::Io(_)
            | Error::Conflict(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Conflicting for Error {
    fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict(_) => true,
            Error::Database(err) => is_sqlx_conflict(err),
            _ => false,
        }
    }
}

impl From<jukebox_common::Error> for Error {
    fn from(err: jukebox_common::Error) -> Self {
        use jukebox_common::Error as Common;
        match err {
            Common::Database(e) => Error::Database(e),
            Common::Io(e) => Error::Io(e),
            Common::Config(msg) => Error::Config(msg),
            Common::NotFound(msg) => Error::NotFound(msg),
            Common::InvalidInput(msg) => Error::InvalidInput(msg),
            Common::Conflict(msg) => Error::Conflict(msg),
            Common::Internal(msg) => Error::Internal(msg),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "Request rejected");
        }

        let message = match &self {
            Error::InvalidInput(msg) | Error::NotFound(msg) => msg.clone(),
            Error::PlayerOffline(player_id) => format!("player offline: {}", player_id),
            other => other.to_string(),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
