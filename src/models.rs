use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Messages ─────────────────────────────────────────────────────────────────

/// A single chat message. Immutable once merged; `id` is server-assigned and
/// unique within the backend's message space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub sender_id: i64,
    pub recipient_id: i64,
    #[serde(default)]
    pub tool_id: Option<i64>,
    #[serde(rename = "message")]
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// The other participant from `own_user_id`'s perspective. A message
    /// always has exactly one counterparty.
    pub fn counterparty(&self, own_user_id: i64) -> i64 {
        if self.sender_id == own_user_id {
            self.recipient_id
        } else {
            self.sender_id
        }
    }

    pub fn involves(&self, user_id: i64) -> bool {
        self.sender_id == user_id || self.recipient_id == user_id
    }
}

/// The "detailed" wire shape of `GET /chats`: the plain message plus
/// denormalized user/tool display fields. Collapses into [`ChatMessage`].
#[derive(Debug, Clone, Deserialize)]
pub struct DetailedChatMessage {
    pub id: i64,
    pub sender_id: i64,
    pub recipient_id: i64,
    #[serde(default)]
    pub tool_id: Option<i64>,
    #[serde(rename = "message")]
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sender_username: Option<String>,
    #[serde(default)]
    pub recipient_username: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
}

/// Denormalized display fields the detailed wire shape carries alongside a
/// message. Cache hints only; their absence never blocks a merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageMeta {
    pub sender_username: Option<String>,
    pub recipient_username: Option<String>,
    pub tool_name: Option<String>,
}

impl DetailedChatMessage {
    /// Collapses the detailed shape into the plain message plus its
    /// display-field sidecar.
    pub fn into_parts(self) -> (ChatMessage, MessageMeta) {
        let message = ChatMessage {
            id: self.id,
            sender_id: self.sender_id,
            recipient_id: self.recipient_id,
            tool_id: self.tool_id,
            text: self.text,
            created_at: self.created_at,
        };
        let meta = MessageMeta {
            sender_username: self.sender_username,
            recipient_username: self.recipient_username,
            tool_name: self.tool_name,
        };
        (message, meta)
    }
}

/// Body of `POST /chats`.
#[derive(Debug, Serialize)]
pub struct SendMessageRequest {
    pub recipient_id: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<i64>,
}

/// One entry of the `GET /users` directory, used to resolve display names.
#[derive(Debug, Clone, Deserialize)]
pub struct UserEntry {
    pub id: i64,
    pub username: String,
}

// ── Conversations ────────────────────────────────────────────────────────────

/// The message thread between the authenticated user and exactly one other
/// user, optionally scoped to a tool listing. `other_user_id` doubles as the
/// conversation id: conversations are 1:1 per user pair, no group chats.
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub other_user_id: i64,
    /// Display cache; refreshed when the user directory is re-fetched.
    pub other_username: String,
    pub tool_id: Option<i64>,
    pub tool_name: Option<String>,
    /// Newest-first. No two messages share an `id`.
    pub messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new(other_user_id: i64, other_username: String) -> Self {
        Self {
            other_user_id,
            other_username,
            tool_id: None,
            tool_name: None,
            messages: Vec::new(),
        }
    }

    pub fn contains_message(&self, id: i64) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    /// Inserts `message` at the position consistent with the newest-first
    /// ordering contract, unless a message with the same id already exists.
    /// Returns whether the message was genuinely new.
    pub fn insert_message(&mut self, message: ChatMessage) -> bool {
        if self.contains_message(message.id) {
            return false;
        }
        // Descending (created_at, id); out-of-order poll arrivals land in
        // the right slot instead of the front.
        let at = self
            .messages
            .iter()
            .position(|m| (m.created_at, m.id) < (message.created_at, message.id))
            .unwrap_or(self.messages.len());
        self.messages.insert(at, message);
        true
    }

    pub fn latest_message(&self) -> Option<&ChatMessage> {
        self.messages.first()
    }
}

// ── Connection status ────────────────────────────────────────────────────────

/// Lifecycle of the live transport, surfaced to the UI as a status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    /// Credential failure; terminal until re-login. Never auto-retried.
    AuthFailed,
    /// Backoff ceiling hit; terminal until a manual reset.
    RetryExhausted,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Authenticating => "authenticating",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::AuthFailed => "authentication failed",
            ConnectionStatus::RetryExhausted => "connection lost, retries exhausted",
        }
    }

    /// While an attempt is in flight a second `connect` must be a no-op.
    pub fn is_attempt_in_flight(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connecting
                | ConnectionStatus::Authenticating
                | ConnectionStatus::Connected
        )
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Socket events ────────────────────────────────────────────────────────────

/// Client→server socket events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Auth { token: String },
    Ping,
}

/// Server→client socket events.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    AuthSuccess,
    AuthError,
    NewMessage { data: ChatMessage },
    Pong,
    Error { message: String },
}
