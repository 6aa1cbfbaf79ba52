//! HTTP room directory.
//!
//! `GET {backend}/rooms/{roomId}` returns the room's metadata and current
//! members; the service creates the room on first query and touches its last
//! activity on every query.

use std::time::Duration;

use async_trait::async_trait;
use dexchat_core::RoomId;
use tracing::debug;

use crate::errors::{RegistryError, Result};
use crate::store::{RoomDirectory, RoomInfo};

const MAX_ERROR_BODY: usize = 512;

/// Room directory backed by the room info service.
#[derive(Clone, Debug)]
pub struct HttpRoomDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRoomDirectory {
    /// Directory using `client` against `base_url`.
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Directory with its own client and request timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::new(client, base_url))
    }
}

#[async_trait]
impl RoomDirectory for HttpRoomDirectory {
    async fn room_info(&self, room: &RoomId) -> Result<RoomInfo> {
        let url = format!("{}/rooms/{}", self.base_url, room);
        debug!(%url, "fetching room info");
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(MAX_ERROR_BODY);
            return Err(RegistryError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<RoomInfo>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dexchat_core::ErrorKind;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetches_room_info() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/rooms/abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "room": {
                    "roomId": "abc123",
                    "createdAt": "2026-03-01T10:00:00Z",
                    "lastActivity": "2026-03-01T12:00:00Z",
                    "totalMembersEver": 4
                },
                "activeMemberships": [{
                    "roomId": "abc123",
                    "uid": 123456789,
                    "tier": "basic",
                    "joinedAt": "2026-03-01T11:00:00Z"
                }],
                "activeCount": 1
            })))
            .mount(&server)
            .await;

        let dir = HttpRoomDirectory::new(reqwest::Client::new(), format!("{}/api/", server.uri()));
        let info = dir.room_info(&RoomId::parse("abc123").unwrap()).await.unwrap();
        assert_eq!(info.active_count, 1);
        assert_eq!(info.room.total_members_ever, 4);
        assert_eq!(info.active_memberships[0].uid.get(), 123_456_789);
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let dir = HttpRoomDirectory::new(reqwest::Client::new(), server.uri());
        let err = dir
            .room_info(&RoomId::parse("abc").unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"));
        assert_eq!(err.kind(), ErrorKind::TransientNetwork);
    }
}
