use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::BackendClient;
use crate::merge::{MergeCommand, MergeSource};
use crate::session::Session;

/// Polling fallback driver: refetches the full message set on a fixed
/// interval and feeds every message involving the authenticated user
/// through the merge engine. This runs regardless of the live transport's
/// state — redundancy is accepted in exchange for consistency, and the
/// idempotent merge makes the overlap harmless.
pub fn spawn_poll_driver(
    api: BackendClient,
    session: Arc<Session>,
    merges: mpsc::Sender<MergeCommand>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("poll driver stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            // Never poll before the authenticated identity is resolved.
            let Some(credentials) = session.credentials() else {
                continue;
            };

            match api.fetch_messages(&credentials.token).await {
                Ok(messages) => {
                    for detailed in messages {
                        let (message, meta) = detailed.into_parts();
                        if !message.involves(credentials.user_id) {
                            continue;
                        }
                        let command = MergeCommand::Merge {
                            message,
                            source: MergeSource::Poll,
                            meta,
                        };
                        if merges.send(command).await.is_err() {
                            debug!("merge channel closed, poll driver exiting");
                            return;
                        }
                    }
                }
                // The request itself is not retried; the next tick is the
                // retry mechanism.
                Err(e) => warn!("poll fetch failed: {e}"),
            }
        }
    })
}
