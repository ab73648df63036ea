//! Minimal REST client for session metadata.
//!
//! The orchestrator only consumes `GET /sessions/{id}`: the returned
//! session kind decides whether the media subsystem is entered at all.

use codecrew_protocol::SessionInfo;
use uuid::Uuid;

use crate::error::Result;

pub struct SessionApi {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl SessionApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            client: reqwest::Client::new(),
        }
    }

    pub async fn fetch_session(&self, session_id: Uuid) -> Result<SessionInfo> {
        let info = self
            .client
            .get(format!("{}/sessions/{}", self.base_url, session_id))
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(info)
    }
}
