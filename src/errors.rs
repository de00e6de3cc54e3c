use thiserror::Error;

/// Top-level error for the chat synchronization core.
/// All variants carry a human-readable message for display/logging.
#[derive(Debug, Error)]
pub enum ChatError {
    // ── Transport errors ─────────────────────────────────────────────────────
    #[error("Socket transport failure: {message}")]
    Transport { message: String },

    #[error("Chat server rejected authentication")]
    AuthRejected,

    #[error("Reconnect attempts exhausted after {attempts} consecutive failures")]
    RetryExhausted { attempts: u32 },

    // ── HTTP errors ──────────────────────────────────────────────────────────
    #[error("Request to {endpoint} failed")]
    Http {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("Backend returned HTTP {status} for {endpoint}")]
    HttpStatus { endpoint: &'static str, status: u16 },

    // ── Payload errors ───────────────────────────────────────────────────────
    #[error("Malformed server payload in {context}")]
    Decode {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },

    // ── Validation errors ────────────────────────────────────────────────────
    #[error("Message text cannot be empty")]
    EmptyMessage,

    #[error("Message text exceeds max length of {max_length} (actual: {actual_length})")]
    MessageTooLong { max_length: usize, actual_length: usize },

    // ── Session errors ───────────────────────────────────────────────────────
    #[error("No authenticated session")]
    NoSession,
}

impl ChatError {
    pub fn transport(message: impl Into<String>) -> Self {
        ChatError::Transport { message: message.into() }
    }

    pub fn http(endpoint: &'static str, source: reqwest::Error) -> Self {
        ChatError::Http { endpoint, source }
    }

    pub fn decode(context: &'static str, source: serde_json::Error) -> Self {
        ChatError::Decode { context, source }
    }

    /// Transient failures are absorbed by retry machinery (backoff or the
    /// next poll tick) and never surfaced as hard errors.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChatError::Transport { .. } | ChatError::Http { .. } | ChatError::HttpStatus { .. }
        )
    }

    /// Auth failures are terminal for the current transport instance and
    /// must never schedule an automatic retry.
    pub fn is_auth(&self) -> bool {
        matches!(self, ChatError::AuthRejected)
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, ChatError::EmptyMessage | ChatError::MessageTooLong { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_rejection_is_not_transient() {
        let err = ChatError::AuthRejected;
        assert!(err.is_auth());
        assert!(!err.is_transient());
    }

    #[test]
    fn transport_failure_is_transient() {
        let err = ChatError::transport("connection reset by peer");
        assert!(err.is_transient());
        assert!(!err.is_auth());
    }
}
