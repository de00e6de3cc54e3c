use std::collections::HashMap;

use tokio::sync::broadcast;
use tracing::debug;

use crate::models::Conversation;

/// Change notifications published to presentation-layer subscribers. The
/// store's single writer (the merge engine) is the only producer; readers
/// subscribe and re-query snapshots, they never mutate.
#[derive(Debug, Clone)]
pub enum StoreUpdate {
    /// A genuinely new message was merged into `other_user_id`'s conversation.
    MessageMerged { other_user_id: i64, message_id: i64 },
    /// A conversation now exists that did not before.
    ConversationStarted { other_user_id: i64 },
    /// The session ended and the store was torn down wholesale.
    Cleared,
}

/// In-memory authoritative conversation state: most-recently-active first,
/// at most one conversation per `other_user_id` by construction. Pure data
/// holder; all business logic lives in the merge engine.
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    updates: broadcast::Sender<StoreUpdate>,
}

impl ConversationStore {
    pub fn new(updates: broadcast::Sender<StoreUpdate>) -> Self {
        Self { conversations: Vec::new(), updates }
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn snapshot(&self) -> Vec<Conversation> {
        self.conversations.clone()
    }

    pub fn get(&self, other_user_id: i64) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.other_user_id == other_user_id)
    }

    /// Get-or-create. Returns the conversation and whether it was created.
    pub fn upsert(&mut self, other_user_id: i64, username: &str) -> (&mut Conversation, bool) {
        match self.conversations.iter().position(|c| c.other_user_id == other_user_id) {
            Some(idx) => (&mut self.conversations[idx], false),
            None => {
                debug!(other_user_id, username, "creating conversation");
                self.conversations
                    .push(Conversation::new(other_user_id, username.to_string()));
                let last = self.conversations.len() - 1;
                (&mut self.conversations[last], true)
            }
        }
    }

    /// Moves `other_user_id`'s conversation to the front of the list.
    pub fn promote(&mut self, other_user_id: i64) {
        if let Some(idx) = self
            .conversations
            .iter()
            .position(|c| c.other_user_id == other_user_id)
        {
            if idx > 0 {
                let conversation = self.conversations.remove(idx);
                self.conversations.insert(0, conversation);
            }
        }
    }

    /// Refreshes cached display names from a re-fetched user directory.
    pub fn refresh_usernames(&mut self, directory: &HashMap<i64, String>) {
        for conversation in &mut self.conversations {
            if let Some(name) = directory.get(&conversation.other_user_id) {
                if &conversation.other_username != name {
                    conversation.other_username = name.clone();
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.conversations.clear();
        self.notify(StoreUpdate::Cleared);
    }

    pub fn notify(&self, update: StoreUpdate) {
        // A send error only means nobody is subscribed right now.
        let _ = self.updates.send(update);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreUpdate> {
        self.updates.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConversationStore {
        let (tx, _rx) = broadcast::channel(16);
        ConversationStore::new(tx)
    }

    #[test]
    fn upsert_never_duplicates() {
        let mut store = store();
        let (_, created) = store.upsert(7, "dana");
        assert!(created);
        let (_, created) = store.upsert(7, "dana");
        assert!(!created);
        assert_eq!(store.conversations().len(), 1);
    }

    #[test]
    fn promote_moves_to_front() {
        let mut store = store();
        store.upsert(7, "dana");
        store.upsert(9, "miguel");
        assert_eq!(store.conversations()[0].other_user_id, 7);
        store.promote(9);
        assert_eq!(store.conversations()[0].other_user_id, 9);
        assert_eq!(store.conversations()[1].other_user_id, 7);
        // Promoting the front element is a no-op.
        store.promote(9);
        assert_eq!(store.conversations()[0].other_user_id, 9);
    }

    #[test]
    fn refresh_usernames_updates_stale_caches() {
        let mut store = store();
        store.upsert(7, "user 7");
        let directory = HashMap::from([(7, "dana".to_string())]);
        store.refresh_usernames(&directory);
        assert_eq!(store.get(7).unwrap().other_username, "dana");
    }
}
