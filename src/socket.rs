use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::errors::ChatError;
use crate::merge::{MergeCommand, MergeSource};
use crate::models::{ClientEvent, ConnectionStatus, MessageMeta, ServerEvent};

/// Transport lifecycle events consumed by the reconnect supervisor.
/// Inbound messages never travel this way; they go straight to the merge
/// engine's command channel.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Auth handshake completed; the connection is usable.
    Connected,
    /// The server rejected the bearer token. Terminal for this transport
    /// instance; must not schedule a retry.
    AuthRejected,
    /// Network-level loss (error, timeout, server close). Retryable.
    Lost { reason: String },
}

struct ConnectionHandle {
    cancel: CancellationToken,
    outbound: mpsc::Sender<ClientEvent>,
    task: JoinHandle<()>,
}

/// Owns the single persistent socket to the backend: auth handshake, ping
/// keepalive, JSON framing. Failures are classified and forwarded to the
/// reconnect supervisor; a local `disconnect` is never reported as one.
pub struct SocketTransport {
    url: String,
    ping_interval: Duration,
    status: Arc<watch::Sender<ConnectionStatus>>,
    events: mpsc::Sender<TransportEvent>,
    merges: mpsc::Sender<MergeCommand>,
    connection: Mutex<Option<ConnectionHandle>>,
}

impl SocketTransport {
    pub fn new(
        url: String,
        ping_interval: Duration,
        status: Arc<watch::Sender<ConnectionStatus>>,
        events: mpsc::Sender<TransportEvent>,
        merges: mpsc::Sender<MergeCommand>,
    ) -> Self {
        Self {
            url,
            ping_interval,
            status,
            events,
            merges,
            connection: Mutex::new(None),
        }
    }

    /// Opens the socket and starts the auth handshake. Idempotent while an
    /// attempt is already in flight: a second call is a no-op, so duplicate
    /// sockets cannot exist.
    pub fn connect(&self, token: String) {
        let mut connection = self.connection.lock().expect("transport lock poisoned");
        if self.status.borrow().is_attempt_in_flight() {
            debug!("connect ignored, attempt already in flight");
            return;
        }
        if let Some(stale) = connection.take() {
            stale.task.abort();
        }

        let cancel = CancellationToken::new();
        let (outbound_tx, outbound_rx) = mpsc::channel(16);
        let _ = self.status.send(ConnectionStatus::Connecting);
        info!(url = %self.url, "opening socket connection");

        let task = tokio::spawn(run_connection(
            self.url.clone(),
            token,
            self.ping_interval,
            Arc::clone(&self.status),
            self.events.clone(),
            self.merges.clone(),
            outbound_rx,
            cancel.clone(),
        ));
        *connection = Some(ConnectionHandle { cancel, outbound: outbound_tx, task });
    }

    /// Hard teardown: cancels the socket task and its timers and moves to
    /// `Disconnected`. Local cancellation is distinguished from network
    /// loss, so this never triggers an automatic reconnect.
    pub fn disconnect(&self) {
        let mut connection = self.connection.lock().expect("transport lock poisoned");
        if let Some(handle) = connection.take() {
            handle.cancel.cancel();
        }
        let _ = self.status.send(ConnectionStatus::Disconnected);
    }

    /// Queues an outbound event for the live connection.
    pub async fn send(&self, event: ClientEvent) -> Result<(), ChatError> {
        let outbound = {
            let connection = self.connection.lock().expect("transport lock poisoned");
            connection.as_ref().map(|c| c.outbound.clone())
        };
        match outbound {
            Some(tx) => tx
                .send(event)
                .await
                .map_err(|_| ChatError::transport("socket task has shut down")),
            None => Err(ChatError::transport("not connected")),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub(crate) fn set_status(&self, status: ConnectionStatus) {
        let _ = self.status.send(status);
    }

    #[cfg(test)]
    pub(crate) fn lifecycle_events(&self) -> mpsc::Sender<TransportEvent> {
        self.events.clone()
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_connection(
    url: String,
    token: String,
    ping_interval: Duration,
    status: Arc<watch::Sender<ConnectionStatus>>,
    events: mpsc::Sender<TransportEvent>,
    merges: mpsc::Sender<MergeCommand>,
    mut outbound: mpsc::Receiver<ClientEvent>,
    cancel: CancellationToken,
) {
    let ws = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = status.send(ConnectionStatus::Disconnected);
            return;
        }
        result = connect_async(url.as_str()) => match result {
            Ok((ws, _response)) => ws,
            Err(e) => {
                report_lost(&status, &events, e.to_string()).await;
                return;
            }
        }
    };

    let (mut sink, mut stream) = ws.split();

    // The connection is not usable until the server confirms the token.
    let _ = status.send(ConnectionStatus::Authenticating);
    if let Err(e) = send_event(&mut sink, &ClientEvent::Auth { token }).await {
        report_lost(&status, &events, e.to_string()).await;
        return;
    }

    let mut ping = tokio::time::interval(ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // interval fires immediately; the first real ping comes one period in
    ping.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(WsMessage::Close(None)).await;
                let _ = status.send(ConnectionStatus::Disconnected);
                debug!("socket closed by local disconnect");
                return;
            }
            _ = ping.tick() => {
                if *status.borrow() == ConnectionStatus::Connected {
                    if let Err(e) = send_event(&mut sink, &ClientEvent::Ping).await {
                        report_lost(&status, &events, e.to_string()).await;
                        return;
                    }
                }
            }
            Some(event) = outbound.recv() => {
                if let Err(e) = send_event(&mut sink, &event).await {
                    report_lost(&status, &events, e.to_string()).await;
                    return;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if let FrameOutcome::AuthRejected =
                        handle_frame(text.as_str(), &status, &events, &merges).await
                    {
                        return;
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    report_lost(&status, &events, "server closed the connection".to_string())
                        .await;
                    return;
                }
                Some(Ok(_)) => {} // non-text frames carry nothing for us
                Some(Err(e)) => {
                    report_lost(&status, &events, e.to_string()).await;
                    return;
                }
            }
        }
    }
}

enum FrameOutcome {
    Continue,
    AuthRejected,
}

async fn handle_frame(
    text: &str,
    status: &watch::Sender<ConnectionStatus>,
    events: &mpsc::Sender<TransportEvent>,
    merges: &mpsc::Sender<MergeCommand>,
) -> FrameOutcome {
    let event: ServerEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            // Malformed payloads are dropped; the connection stays up.
            warn!("Dropping malformed socket frame: {e}");
            return FrameOutcome::Continue;
        }
    };

    match event {
        ServerEvent::AuthSuccess => {
            info!("socket authenticated");
            let _ = status.send(ConnectionStatus::Connected);
            let _ = events.send(TransportEvent::Connected).await;
            FrameOutcome::Continue
        }
        ServerEvent::AuthError => {
            warn!("socket authentication rejected");
            let _ = status.send(ConnectionStatus::AuthFailed);
            let _ = events.send(TransportEvent::AuthRejected).await;
            FrameOutcome::AuthRejected
        }
        ServerEvent::NewMessage { data } => {
            trace!(message_id = data.id, "live message received");
            let _ = merges
                .send(MergeCommand::Merge {
                    message: data,
                    source: MergeSource::Socket,
                    meta: MessageMeta::default(),
                })
                .await;
            FrameOutcome::Continue
        }
        ServerEvent::Pong => {
            // Absence of pong is not treated as fatal; normal socket error
            // detection covers dead connections.
            trace!("pong");
            FrameOutcome::Continue
        }
        ServerEvent::Error { message } => {
            warn!("server error event: {message}");
            FrameOutcome::Continue
        }
    }
}

async fn report_lost(
    status: &watch::Sender<ConnectionStatus>,
    events: &mpsc::Sender<TransportEvent>,
    reason: String,
) {
    warn!("socket connection lost: {reason}");
    let _ = status.send(ConnectionStatus::Disconnected);
    let _ = events.send(TransportEvent::Lost { reason }).await;
}

async fn send_event<S>(sink: &mut S, event: &ClientEvent) -> Result<(), WsError>
where
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    match serde_json::to_string(event) {
        Ok(json) => sink.send(WsMessage::Text(json.into())).await,
        Err(e) => {
            warn!("failed to serialize client event: {e}");
            Ok(())
        }
    }
}
