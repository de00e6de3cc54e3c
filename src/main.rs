use tracing::{info, warn};

use toolshare_chat::{ChatSyncManager, StoreUpdate, SyncConfig};

/// Headless harness around the synchronization core: logs in with
/// credentials from the environment, tails store updates, and keeps the
/// session alive until Ctrl-C. A mobile shell replaces this wiring.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "toolshare_chat=debug".into()),
        )
        .init();

    // ── Session credentials ───────────────────────────────────────────────────
    let user_id: i64 = std::env::var("TOOLSHARE_USER_ID")
        .expect("TOOLSHARE_USER_ID must be set")
        .parse()
        .expect("TOOLSHARE_USER_ID must be an integer");
    let token = std::env::var("TOOLSHARE_TOKEN").expect("TOOLSHARE_TOKEN must be set");

    // ── Core wiring ───────────────────────────────────────────────────────────
    let config = SyncConfig::from_env();
    info!(api = %config.api_base, socket = %config.socket_url, "starting chat sync core");

    let manager = ChatSyncManager::new(config);
    let mut updates = manager.subscribe();
    let mut status = manager.status();
    manager.login(user_id, token).await;

    // ── Observe until shutdown ────────────────────────────────────────────────
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = status.changed() => {
                if changed.is_ok() {
                    info!("connection status: {}", *status.borrow());
                }
            }
            update = updates.recv() => match update {
                Ok(StoreUpdate::MessageMerged { other_user_id, message_id }) => {
                    info!(other_user_id, message_id, "new message merged");
                }
                Ok(StoreUpdate::ConversationStarted { other_user_id }) => {
                    info!(other_user_id, "conversation started");
                }
                Ok(StoreUpdate::Cleared) => info!("conversation store cleared"),
                Err(e) => warn!("update stream lagged: {e}"),
            },
        }
    }

    manager.logout().await;
    info!("shut down cleanly");
    Ok(())
}
