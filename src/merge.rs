use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::models::{ChatMessage, Conversation, MessageMeta};
use crate::session::Session;
use crate::store::{ConversationStore, StoreUpdate};

/// Which channel a raw message arrived through. The same message routinely
/// arrives through several of these; the merge must be idempotent across
/// all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeSource {
    Poll,
    Socket,
    /// The backend's echo of a message this client just sent.
    Echo,
    /// A push-notification payload.
    Notification,
}

/// Commands serialized into the single mutation context. Every store
/// mutation in the system travels through this channel.
#[derive(Debug)]
pub enum MergeCommand {
    Merge {
        message: ChatMessage,
        source: MergeSource,
        /// Display fields when the source delivered the detailed shape.
        meta: MessageMeta,
    },
    StartConversation {
        other_user_id: i64,
        username: String,
        tool_id: Option<i64>,
        tool_name: Option<String>,
    },
    RefreshDirectory {
        users: HashMap<i64, String>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<Conversation>>,
    },
    Clear,
}

/// The single logical owner of the conversation store and the username
/// directory. Commands are applied one at a time and to completion
/// (including promotion and change notification) before the next is read,
/// so two merges for the same conversation can never interleave.
pub struct MutationContext {
    store: ConversationStore,
    directory: HashMap<i64, String>,
    session: Arc<Session>,
}

impl MutationContext {
    pub fn new(store: ConversationStore, session: Arc<Session>) -> Self {
        Self { store, directory: HashMap::new(), session }
    }

    /// Display name for `user_id`: the directory wins, then a payload hint,
    /// then a placeholder.
    fn resolve_username(&self, user_id: i64, hint: Option<&str>) -> String {
        self.directory
            .get(&user_id)
            .cloned()
            .or_else(|| hint.map(str::to_string))
            .unwrap_or_else(|| format!("user {user_id}"))
    }

    /// Merges one raw message into the store exactly once.
    fn merge(&mut self, message: ChatMessage, source: MergeSource, meta: MessageMeta) {
        // A cleared session means logout already happened; late results
        // must not revive stale state.
        let Some(own_user_id) = self.session.user_id() else {
            debug!(message_id = message.id, ?source, "dropping merge after logout");
            return;
        };
        if !message.involves(own_user_id) {
            trace!(message_id = message.id, "message does not involve this user");
            return;
        }

        let other_user_id = message.counterparty(own_user_id);
        let hint = if other_user_id == message.sender_id {
            meta.sender_username.as_deref()
        } else {
            meta.recipient_username.as_deref()
        };
        let username = self.resolve_username(other_user_id, hint);
        let message_id = message.id;
        let tool_id = message.tool_id;
        let tool_name = meta.tool_name;

        let (inserted, created) = {
            let (conversation, created) = self.store.upsert(other_user_id, &username);
            if conversation.tool_id.is_none() && tool_id.is_some() {
                conversation.tool_id = tool_id;
            }
            if conversation.tool_name.is_none() && tool_name.is_some() {
                conversation.tool_name = tool_name;
            }
            (conversation.insert_message(message), created)
        };

        if created {
            self.store.notify(StoreUpdate::ConversationStarted { other_user_id });
        }
        if inserted {
            self.store.promote(other_user_id);
            self.store
                .notify(StoreUpdate::MessageMerged { other_user_id, message_id });
            debug!(message_id, other_user_id, ?source, "merged new message");
        } else {
            trace!(message_id, other_user_id, ?source, "duplicate discarded");
        }
    }

    /// Ensures a conversation exists for `other_user_id` (used when the UI
    /// opens a chat from a listing before any message has been exchanged).
    fn start_conversation(
        &mut self,
        other_user_id: i64,
        username: String,
        tool_id: Option<i64>,
        tool_name: Option<String>,
    ) {
        if self.session.user_id().is_none() {
            return;
        }
        let created = {
            let (conversation, created) = self.store.upsert(other_user_id, &username);
            if tool_id.is_some() {
                conversation.tool_id = tool_id;
                conversation.tool_name = tool_name;
            }
            created
        };
        if created {
            self.store.promote(other_user_id);
            self.store.notify(StoreUpdate::ConversationStarted { other_user_id });
        }
    }

    pub fn apply(&mut self, command: MergeCommand) {
        match command {
            MergeCommand::Merge { message, source, meta } => self.merge(message, source, meta),
            MergeCommand::StartConversation { other_user_id, username, tool_id, tool_name } => {
                self.start_conversation(other_user_id, username, tool_id, tool_name)
            }
            MergeCommand::RefreshDirectory { users } => {
                self.directory = users;
                self.store.refresh_usernames(&self.directory);
            }
            MergeCommand::Snapshot { reply } => {
                let _ = reply.send(self.store.snapshot());
            }
            MergeCommand::Clear => {
                self.directory.clear();
                self.store.clear();
            }
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }
}

/// Runs the mutation context until every command sender is dropped.
pub async fn run_mutation_task(mut commands: mpsc::Receiver<MergeCommand>, mut ctx: MutationContext) {
    while let Some(command) = commands.recv().await {
        ctx.apply(command);
    }
    debug!("mutation context shut down");
}
