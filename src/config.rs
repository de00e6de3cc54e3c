use std::time::Duration;

/// Tunables for the synchronization core.
///
/// The defaults match the production backend's expectations; the binary
/// overrides endpoints from the environment (see `from_env`).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the REST backend, e.g. `http://localhost:3000`.
    pub api_base: String,
    /// WebSocket endpoint for live message push, e.g. `ws://localhost:3000/ws/chat`.
    pub socket_url: String,
    /// Initial reconnect backoff in seconds.
    pub base_delay_secs: f64,
    /// Backoff cap in seconds.
    pub max_delay_secs: f64,
    /// Consecutive transport failures tolerated before giving up.
    pub max_reconnect_attempts: u32,
    /// How often the polling fallback refetches the full message set.
    pub poll_interval: Duration,
    /// Keepalive ping cadence while the socket is connected.
    pub ping_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:3000".to_string(),
            socket_url: "ws://localhost:3000/ws/chat".to_string(),
            base_delay_secs: 1.0,
            max_delay_secs: 30.0,
            max_reconnect_attempts: 10,
            poll_interval: Duration::from_secs(5),
            ping_interval: Duration::from_secs(60),
        }
    }
}

impl SyncConfig {
    /// Builds a config from `TOOLSHARE_API_BASE` / `TOOLSHARE_SOCKET_URL`,
    /// falling back to the defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(base) = std::env::var("TOOLSHARE_API_BASE") {
            config.api_base = base;
        }
        if let Ok(url) = std::env::var("TOOLSHARE_SOCKET_URL") {
            config.socket_url = url;
        }
        if let Ok(secs) = std::env::var("TOOLSHARE_POLL_INTERVAL_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                config.poll_interval = Duration::from_secs(secs);
            }
        }
        config
    }
}
