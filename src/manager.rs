use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::BackendClient;
use crate::config::SyncConfig;
use crate::errors::ChatError;
use crate::merge::{run_mutation_task, MergeCommand, MergeSource, MutationContext};
use crate::models::{ChatMessage, ConnectionStatus, Conversation, MessageMeta};
use crate::poll::spawn_poll_driver;
use crate::reconnect::{ReconnectPolicy, RetryDecision};
use crate::session::Session;
use crate::socket::{SocketTransport, TransportEvent};
use crate::store::{ConversationStore, StoreUpdate};

const MAX_MESSAGE_LENGTH: usize = 2000;

/// The coordinator the presentation layer talks to. Owns the session, the
/// single mutation context, the polling driver, and the transport plus its
/// reconnect supervisor; exposes only observables and calls, never errors
/// from the network interior.
pub struct ChatSyncManager {
    api: BackendClient,
    config: SyncConfig,
    session: Arc<Session>,
    transport: Arc<SocketTransport>,
    merges: mpsc::Sender<MergeCommand>,
    updates: broadcast::Sender<StoreUpdate>,
    status_rx: watch::Receiver<ConnectionStatus>,
    resets: mpsc::Sender<()>,
    poll_cancel: Mutex<Option<CancellationToken>>,
}

impl ChatSyncManager {
    pub fn new(config: SyncConfig) -> Self {
        let session = Arc::new(Session::new());
        let api = BackendClient::new(&config.api_base);

        let (updates, _) = broadcast::channel(64);
        let (merge_tx, merge_rx) = mpsc::channel(256);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let status_tx = Arc::new(status_tx);
        let (event_tx, event_rx) = mpsc::channel(32);
        let (reset_tx, reset_rx) = mpsc::channel(4);

        let store = ConversationStore::new(updates.clone());
        tokio::spawn(run_mutation_task(
            merge_rx,
            MutationContext::new(store, Arc::clone(&session)),
        ));

        let transport = Arc::new(SocketTransport::new(
            config.socket_url.clone(),
            config.ping_interval,
            status_tx,
            event_tx,
            merge_tx.clone(),
        ));

        tokio::spawn(run_supervisor(
            Arc::clone(&transport),
            Arc::clone(&session),
            ReconnectPolicy::new(&config),
            event_rx,
            reset_rx,
        ));

        Self {
            api,
            config,
            session,
            transport,
            merges: merge_tx,
            updates,
            status_rx,
            resets: reset_tx,
            poll_cancel: Mutex::new(None),
        }
    }

    // ── Session lifecycle ────────────────────────────────────────────────────

    /// Establishes the authenticated session: primes the username directory,
    /// starts the polling fallback, and opens the live transport.
    pub async fn login(&self, user_id: i64, token: impl Into<String>) {
        let token = token.into();
        self.session.login(user_id, token.clone());
        info!(user_id, "chat session started");

        // Directory priming is best-effort; unresolved names fall back to
        // placeholders until the next refresh.
        match self.api.fetch_users(&token).await {
            Ok(users) => {
                let users = users.into_iter().map(|u| (u.id, u.username)).collect();
                let _ = self.merges.send(MergeCommand::RefreshDirectory { users }).await;
            }
            Err(e) => warn!("user directory priming failed: {e}"),
        }

        let cancel = CancellationToken::new();
        let _poll = spawn_poll_driver(
            self.api.clone(),
            Arc::clone(&self.session),
            self.merges.clone(),
            self.config.poll_interval,
            cancel.clone(),
        );
        {
            let mut guard = self.poll_cancel.lock().expect("poll lock poisoned");
            if let Some(old) = guard.replace(cancel) {
                old.cancel();
            }
        }

        self.transport.connect(token);
    }

    /// Tears the session down wholesale: poll driver, transport, and store.
    /// Results of requests still in flight are dropped by the mutation
    /// context once the session is cleared.
    pub async fn logout(&self) {
        self.session.logout();
        if let Some(cancel) = self.poll_cancel.lock().expect("poll lock poisoned").take() {
            cancel.cancel();
        }
        self.transport.disconnect();
        // Hard teardown zeroes the reconnect counters; with no session the
        // supervisor resets without attempting a connection.
        let _ = self.resets.send(()).await;
        let _ = self.merges.send(MergeCommand::Clear).await;
        info!("chat session ended");
    }

    // ── Calls exposed to the presentation layer ──────────────────────────────

    /// Sends a message via the HTTP create-call and, on success, merges the
    /// backend's echo through the same dedup path every other source uses,
    /// so the local copy and any later poll/socket copy collapse into one.
    pub async fn send(
        &self,
        text: &str,
        other_user_id: i64,
        tool_id: Option<i64>,
    ) -> Result<(), ChatError> {
        let credentials = self.session.credentials().ok_or(ChatError::NoSession)?;
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if text.len() > MAX_MESSAGE_LENGTH {
            return Err(ChatError::MessageTooLong {
                max_length: MAX_MESSAGE_LENGTH,
                actual_length: text.len(),
            });
        }

        let (message, meta) = self
            .api
            .send_message(&credentials.token, other_user_id, text, tool_id)
            .await?
            .into_parts();
        let _ = self
            .merges
            .send(MergeCommand::Merge { message, source: MergeSource::Echo, meta })
            .await;
        Ok(())
    }

    /// Ensures a conversation with `other_user_id` exists and is visible,
    /// e.g. when the user opens a chat from a tool listing before any
    /// message has been exchanged.
    pub async fn start_or_get_conversation(
        &self,
        other_user_id: i64,
        username: impl Into<String>,
        tool_id: Option<i64>,
        tool_name: Option<String>,
    ) {
        let _ = self
            .merges
            .send(MergeCommand::StartConversation {
                other_user_id,
                username: username.into(),
                tool_id,
                tool_name,
            })
            .await;
    }

    /// Feeds a push-notification payload through the dedup path. Payloads
    /// that duplicate a poll or socket arrival merge to nothing.
    pub async fn ingest_notification(&self, message: ChatMessage) {
        let _ = self
            .merges
            .send(MergeCommand::Merge {
                message,
                source: MergeSource::Notification,
                meta: MessageMeta::default(),
            })
            .await;
    }

    /// Current ordered conversation list (most-recently-active first).
    pub async fn conversations(&self) -> Vec<Conversation> {
        let (reply, rx) = oneshot::channel();
        if self.merges.send(MergeCommand::Snapshot { reply }).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Store change notifications for the presentation layer.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreUpdate> {
        self.updates.subscribe()
    }

    /// Observable connection status for display.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    pub fn status_string(&self) -> String {
        self.status_rx.borrow().to_string()
    }

    /// The typed error behind a terminal connection status, for callers
    /// that want more than the display string. `None` while the transport
    /// is healthy or merely between retries.
    pub fn connection_error(&self) -> Option<ChatError> {
        match *self.status_rx.borrow() {
            ConnectionStatus::AuthFailed => Some(ChatError::AuthRejected),
            ConnectionStatus::RetryExhausted => Some(ChatError::RetryExhausted {
                attempts: self.config.max_reconnect_attempts,
            }),
            _ => None,
        }
    }

    /// Forces the backoff state back to base and immediately attempts a
    /// connection, bypassing any pending wait. Used on app-foreground and to
    /// leave the terminal `RetryExhausted` state.
    pub async fn reset_and_reconnect(&self) {
        let _ = self.resets.send(()).await;
    }
}

/// Reconnect supervisor: consumes transport lifecycle events and drives the
/// backoff policy. Auth rejections deliberately do not touch the policy —
/// only network-level losses are retryable.
async fn run_supervisor(
    transport: Arc<SocketTransport>,
    session: Arc<Session>,
    mut policy: ReconnectPolicy,
    mut events: mpsc::Receiver<TransportEvent>,
    mut resets: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                None => return,
                Some(TransportEvent::Connected) => policy.on_success(),
                Some(TransportEvent::AuthRejected) => {
                    // Terminal until re-login; status already shows AuthFailed.
                    warn!("transport authentication rejected, not retrying");
                }
                Some(TransportEvent::Lost { reason }) => {
                    if !session.is_active() {
                        continue;
                    }
                    warn!("transport lost: {reason}");
                    match policy.on_failure() {
                        RetryDecision::RetryAfter(wait) => {
                            // A manual reset cuts the wait short.
                            let reset_hit = tokio::select! {
                                _ = tokio::time::sleep(wait) => false,
                                reset = resets.recv() => {
                                    if reset.is_none() {
                                        return;
                                    }
                                    true
                                }
                            };
                            if reset_hit {
                                policy.reset();
                            }
                            if let Some(credentials) = session.credentials() {
                                policy.on_attempt();
                                transport.connect(credentials.token);
                            }
                        }
                        RetryDecision::GiveUp => {
                            transport.set_status(ConnectionStatus::RetryExhausted);
                        }
                    }
                }
            },
            reset = resets.recv() => match reset {
                None => return,
                Some(()) => {
                    policy.reset();
                    if let Some(credentials) = session.credentials() {
                        policy.on_attempt();
                        transport.connect(credentials.token);
                    }
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use chrono::{TimeZone, Utc};

    fn message(id: i64, sender: i64, recipient: i64, text: &str) -> ChatMessage {
        ChatMessage {
            id,
            sender_id: sender,
            recipient_id: recipient,
            tool_id: None,
            text: text.to_string(),
            created_at: Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap(),
        }
    }

    fn offline_config() -> SyncConfig {
        // Ports nothing listens on: HTTP calls fail fast and the channel
        // plumbing is exercised without a backend.
        SyncConfig {
            api_base: "http://127.0.0.1:9".to_string(),
            socket_url: "ws://127.0.0.1:9/ws/chat".to_string(),
            ..SyncConfig::default()
        }
    }

    #[tokio::test]
    async fn send_requires_a_session() {
        let manager = ChatSyncManager::new(offline_config());
        let err = manager.send("hi", 7, None).await.unwrap_err();
        assert!(matches!(err, ChatError::NoSession));
    }

    #[tokio::test]
    async fn send_validates_text() {
        let manager = ChatSyncManager::new(offline_config());
        manager.session.login(1, "tok");
        let err = manager.send("   ", 7, None).await.unwrap_err();
        assert!(matches!(err, ChatError::EmptyMessage));
        let long = "x".repeat(MAX_MESSAGE_LENGTH + 1);
        let err = manager.send(&long, 7, None).await.unwrap_err();
        assert!(matches!(err, ChatError::MessageTooLong { .. }));
    }

    #[tokio::test]
    async fn notification_payloads_flow_through_dedup() {
        let manager = ChatSyncManager::new(offline_config());
        manager.session.login(1, "tok");

        manager.ingest_notification(message(5, 7, 1, "hi")).await;
        manager.ingest_notification(message(5, 7, 1, "hi")).await;

        let conversations = manager.conversations().await;
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].messages.len(), 1);
    }

    #[tokio::test]
    async fn logout_tears_down_the_store() {
        let manager = ChatSyncManager::new(offline_config());
        manager.session.login(1, "tok");
        manager.ingest_notification(message(5, 7, 1, "hi")).await;
        assert_eq!(manager.conversations().await.len(), 1);

        manager.logout().await;
        assert!(manager.conversations().await.is_empty());

        // A late-arriving result after logout is silently discarded.
        manager.ingest_notification(message(6, 7, 1, "late")).await;
        assert!(manager.conversations().await.is_empty());
    }

    #[tokio::test]
    async fn start_or_get_conversation_is_visible_and_unique() {
        let manager = ChatSyncManager::new(offline_config());
        manager.session.login(1, "tok");

        manager
            .start_or_get_conversation(7, "dana", Some(3), Some("Cordless drill".into()))
            .await;
        manager.start_or_get_conversation(7, "dana", None, None).await;

        let conversations = manager.conversations().await;
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].other_username, "dana");
        assert_eq!(conversations[0].tool_id, Some(3));
    }

    #[tokio::test]
    async fn status_starts_disconnected() {
        let manager = ChatSyncManager::new(offline_config());
        assert_eq!(*manager.status().borrow(), ConnectionStatus::Disconnected);
        assert_eq!(manager.status_string(), "disconnected");
    }

    #[tokio::test]
    async fn terminal_statuses_map_to_typed_errors() {
        let manager = ChatSyncManager::new(offline_config());
        assert!(manager.connection_error().is_none());

        manager.transport.set_status(ConnectionStatus::AuthFailed);
        assert!(manager.connection_error().unwrap().is_auth());

        manager.transport.set_status(ConnectionStatus::RetryExhausted);
        match manager.connection_error() {
            Some(ChatError::RetryExhausted { attempts }) => {
                assert_eq!(attempts, manager.config.max_reconnect_attempts)
            }
            other => panic!("unexpected mapping: {other:?}"),
        }

        manager.transport.set_status(ConnectionStatus::Connecting);
        assert!(manager.connection_error().is_none());
    }

    #[tokio::test]
    async fn teardown_resets_reconnect_counters() {
        // A listener that accepts sockets but never answers the upgrade:
        // scheduled reconnects park in Connecting without emitting events,
        // so the failure count is driven entirely by this test.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let manager = ChatSyncManager::new(SyncConfig {
            api_base: "http://127.0.0.1:9".to_string(),
            socket_url: format!("ws://{addr}/ws/chat"),
            base_delay_secs: 0.001,
            max_delay_secs: 0.01,
            max_reconnect_attempts: 3,
            ..SyncConfig::default()
        });
        let events = manager.transport.lifecycle_events();
        let lost = || TransportEvent::Lost { reason: "reset by peer".to_string() };

        // First session: two consecutive losses, one short of the ceiling.
        manager.session.login(1, "tok");
        events.send(lost()).await.unwrap();
        events.send(lost()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_ne!(*manager.status().borrow(), ConnectionStatus::RetryExhausted);

        manager.logout().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The next session starts from a clean slate: the same two losses
        // must be tolerated again instead of inheriting the old count.
        manager.session.login(1, "tok2");
        events.send(lost()).await.unwrap();
        events.send(lost()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_ne!(*manager.status().borrow(), ConnectionStatus::RetryExhausted);

        // The ceiling itself still applies within a session.
        events.send(lost()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*manager.status().borrow(), ConnectionStatus::RetryExhausted);
    }
}
