use tracing::error;

use crate::errors::ChatError;
use crate::models::{DetailedChatMessage, SendMessageRequest, UserEntry};

/// HTTP client for the marketplace backend. Only the chat-relevant slice of
/// the API surface lives here; everything returns [`ChatError`] so nothing
/// network-shaped escapes to the presentation layer.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// `GET /chats` — the full message set visible to the bearer of `token`,
    /// in the detailed shape with denormalized display fields.
    pub async fn fetch_messages(&self, token: &str) -> Result<Vec<DetailedChatMessage>, ChatError> {
        let endpoint = "/chats";
        let response = self
            .http
            .get(format!("{}{endpoint}", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to fetch chats: {e}");
                ChatError::http(endpoint, e)
            })?;

        if !response.status().is_success() {
            return Err(ChatError::HttpStatus {
                endpoint,
                status: response.status().as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| ChatError::http(endpoint, e))?;
        serde_json::from_str(&body).map_err(|e| ChatError::decode("GET /chats response", e))
    }

    /// `POST /chats` — sends a message; the backend answers with the created
    /// message echo, which the caller feeds back through the merge path.
    pub async fn send_message(
        &self,
        token: &str,
        recipient_id: i64,
        text: &str,
        tool_id: Option<i64>,
    ) -> Result<DetailedChatMessage, ChatError> {
        let endpoint = "/chats";
        let body = SendMessageRequest {
            recipient_id,
            message: text.to_string(),
            tool_id,
        };

        let response = self
            .http
            .post(format!("{}{endpoint}", self.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to send message to {recipient_id}: {e}");
                ChatError::http(endpoint, e)
            })?;

        if !response.status().is_success() {
            return Err(ChatError::HttpStatus {
                endpoint,
                status: response.status().as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| ChatError::http(endpoint, e))?;
        serde_json::from_str(&body).map_err(|e| ChatError::decode("POST /chats response", e))
    }

    /// `GET /users` — the directory used to resolve display names.
    pub async fn fetch_users(&self, token: &str) -> Result<Vec<UserEntry>, ChatError> {
        let endpoint = "/users";
        let response = self
            .http
            .get(format!("{}{endpoint}", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to fetch user directory: {e}");
                ChatError::http(endpoint, e)
            })?;

        if !response.status().is_success() {
            return Err(ChatError::HttpStatus {
                endpoint,
                status: response.status().as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| ChatError::http(endpoint, e))?;
        serde_json::from_str(&body).map_err(|e| ChatError::decode("GET /users response", e))
    }
}
