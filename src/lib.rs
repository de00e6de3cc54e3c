//! Chat synchronization core for the ToolShare marketplace client.
//!
//! Reconciles a locally cached conversation list against three redundant
//! delivery channels — an HTTP polling fallback, a persistent socket stream,
//! and push-notification payloads — deduplicating messages that arrive more
//! than once and keeping the live transport alive with bounded exponential
//! backoff. The presentation layer observes the conversation store and the
//! connection status; it never sees a network error.

pub mod api;
pub mod config;
pub mod errors;
pub mod manager;
pub mod merge;
pub mod models;
pub mod poll;
pub mod reconnect;
pub mod session;
pub mod socket;
pub mod store;

pub use config::SyncConfig;
pub use errors::ChatError;
pub use manager::ChatSyncManager;
pub use merge::MergeSource;
pub use models::{ChatMessage, ConnectionStatus, Conversation};
pub use store::StoreUpdate;
