//! HTTP client for the coordination server
//!
//! [`PlayerApi`] is the seam the arbiter client and synchronizer talk
//! through; [`HttpPlayerApi`] is the reqwest implementation bound to one
//! player.

use crate::error::{Error, Result};
use async_trait::async_trait;
use jukebox_common::api::{
    ErrorResponse, HeartbeatRequest, HeartbeatResponse, NextResponse, PlaylistRequest,
    QueueRequest, RegistrationResponse, RemovedResponse, SessionRequest, StatusReport,
};
use jukebox_common::models::{PlayerState, PlayerStatus, QueueItem, QueueSnapshot};
use reqwest::Response;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("jukebox-renderer/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Server operations a renderer instance performs for its player
#[async_trait]
pub trait PlayerApi: Send + Sync {
    fn player_id(&self) -> &str;

    async fn register_session(
        &self,
        session_id: &str,
        stored_session_id: Option<&str>,
    ) -> Result<RegistrationResponse>;

    async fn heartbeat(
        &self,
        session_id: &str,
        state: PlayerState,
        progress: f64,
    ) -> Result<HeartbeatResponse>;

    /// Rejected with a 403 unless `report.session_id` holds priority
    async fn report_status(&self, report: &StatusReport) -> Result<PlayerStatus>;

    /// Advance the queue; `None` means it is exhausted
    async fn next(&self) -> Result<Option<QueueItem>>;

    /// Drop a permanently unplayable media item from every playlist
    async fn remove_media_globally(&self, media_item_id: &str) -> Result<usize>;

    async fn get_queue(&self) -> Result<QueueSnapshot>;

    async fn get_status(&self) -> Result<PlayerStatus>;
}

/// reqwest-backed [`PlayerApi`]
#[derive(Clone)]
pub struct HttpPlayerApi {
    http_client: reqwest::Client,
    base_url: String,
    player_id: String,
}

impl HttpPlayerApi {
    /// `server_url` is the origin, e.g. `http://127.0.0.1:5740`
    pub fn new(server_url: &str, player_id: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http_client,
            base_url: format!("{}/api/v1", server_url.trim_end_matches('/')),
            player_id: player_id.to_string(),
        })
    }

    /// Full URL of an API path such as `/queue`
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.url(path);
        debug!(url = %url, "POST");
        let response = self.http_client.post(&url).json(body).send().await?;
        decode(response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        debug!(url = %url, "GET");
        let response = self.http_client.get(&url).send().await?;
        decode(response).await
    }
}

/// Success bodies decode as `T`; anything else becomes [`Error::Api`]
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&text)
        .map(|body| body.error)
        .unwrap_or(text);

    Err(Error::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl PlayerApi for HttpPlayerApi {
    fn player_id(&self) -> &str {
        &self.player_id
    }

    async fn register_session(
        &self,
        session_id: &str,
        stored_session_id: Option<&str>,
    ) -> Result<RegistrationResponse> {
        let request = SessionRequest {
            player_id: Some(self.player_id.clone()),
            action: Some("register_session".to_string()),
            session_id: Some(session_id.to_string()),
            stored_session_id: stored_session_id.map(str::to_string),
        };
        self.post("/sessions", &request).await
    }

    async fn heartbeat(
        &self,
        session_id: &str,
        state: PlayerState,
        progress: f64,
    ) -> Result<HeartbeatResponse> {
        let request = HeartbeatRequest {
            player_id: self.player_id.clone(),
            session_id: Some(session_id.to_string()),
            state,
            progress,
        };
        self.post("/heartbeat", &request).await
    }

    async fn report_status(&self, report: &StatusReport) -> Result<PlayerStatus> {
        self.post(&format!("/players/{}/status", self.player_id), report)
            .await
    }

    async fn next(&self) -> Result<Option<QueueItem>> {
        let request = QueueRequest::action(&self.player_id, "next");
        let response: NextResponse = self.post("/queue", &request).await?;
        Ok(response.next_item)
    }

    async fn remove_media_globally(&self, media_item_id: &str) -> Result<usize> {
        let mut request = PlaylistRequest::action("remove_media_globally");
        request.media_item_id = Some(media_item_id.to_string());
        let response: RemovedResponse = self.post("/playlists", &request).await?;
        Ok(response.removed_count)
    }

    async fn get_queue(&self) -> Result<QueueSnapshot> {
        self.get(&format!("/players/{}/queue", self.player_id)).await
    }

    async fn get_status(&self) -> Result<PlayerStatus> {
        self.get(&format!("/players/{}/status", self.player_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation_normalizes_base_url() {
        let api = HttpPlayerApi::new("http://127.0.0.1:5740/", "bar").unwrap();
        assert_eq!(api.url("/queue"), "http://127.0.0.1:5740/api/v1/queue");
        assert_eq!(api.player_id(), "bar");
    }
}
