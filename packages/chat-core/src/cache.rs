//! Local message cache.
//!
//! The cache holds, per conversation, the ordered messages currently known to
//! the client: fetched history plus anything inserted optimistically. It is an
//! explicit store object owned by the session that created it; background send
//! tasks hold a [`WeakMessageCache`] so that once the session drops the store
//! their remaining writes turn into no-ops.
//!
//! The store is single-threaded (`Rc` + `RefCell`). Mutual exclusion comes from
//! cooperative scheduling: a `replace` runs to completion before any other task
//! on the thread can observe or touch the same conversation.

use crate::ids::is_local_id;
use crate::types::Message;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

/// Callback invoked after every `replace` on a subscribed conversation.
pub type Observer = Rc<dyn Fn(&str, &[Message])>;

/// Handle returned by [`MessageCache::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

#[derive(Debug, Default)]
struct ConversationEntry {
    messages: Vec<Message>,
    /// A send is in flight for this conversation
    pending: bool,
    /// History has been loaded into this entry
    seeded: bool,
}

#[derive(Default)]
struct Store {
    conversations: RefCell<HashMap<String, ConversationEntry>>,
    observers: RefCell<Vec<(Subscription, String, Observer)>>,
    next_subscription: Cell<u64>,
}

/// Shared handle to the message store. Cloning shares the same store.
#[derive(Clone, Default)]
pub struct MessageCache {
    store: Rc<Store>,
}

impl fmt::Debug for MessageCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageCache")
            .field("conversations", &self.store.conversations.borrow().len())
            .field("observers", &self.store.observers.borrow().len())
            .finish()
    }
}

impl MessageCache {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that does not keep the store alive.
    pub fn downgrade(&self) -> WeakMessageCache {
        WeakMessageCache {
            store: Rc::downgrade(&self.store),
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Current messages of a conversation. Unknown conversations are empty.
    pub fn get(&self, conversation_id: &str) -> Vec<Message> {
        self.store
            .conversations
            .borrow()
            .get(conversation_id)
            .map(|entry| entry.messages.clone())
            .unwrap_or_default()
    }

    /// Number of messages in a conversation.
    pub fn len(&self, conversation_id: &str) -> usize {
        self.store
            .conversations
            .borrow()
            .get(conversation_id)
            .map(|entry| entry.messages.len())
            .unwrap_or(0)
    }

    /// Ids of every conversation the cache has an entry for.
    pub fn conversation_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.store.conversations.borrow().keys().cloned().collect();
        ids.sort();
        ids
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Apply `transform` to the current messages and store the result.
    ///
    /// This is the only way messages change. Observers of the conversation are
    /// called synchronously once the new sequence is in place; the store is
    /// not borrowed at that point, so they may read it freely. `transform`
    /// itself must not call back into the cache.
    pub fn replace<F>(&self, conversation_id: &str, transform: F)
    where
        F: FnOnce(Vec<Message>) -> Vec<Message>,
    {
        let observers = self.observers_for(conversation_id);

        let snapshot = {
            let mut conversations = self.store.conversations.borrow_mut();
            let entry = conversations.entry(conversation_id.to_string()).or_default();
            let current = std::mem::take(&mut entry.messages);
            entry.messages = transform(current);
            if observers.is_empty() {
                None
            } else {
                Some(entry.messages.clone())
            }
        };

        if let Some(messages) = snapshot {
            for observer in observers {
                observer(conversation_id, &messages);
            }
        }
    }

    /// Store fetched history for a conversation, once.
    ///
    /// Returns `false` if history was already seeded. The history replaces
    /// what is cached, except for an exchange still in flight (the streaming
    /// placeholder and the user message before it), which stays after it.
    /// Finished local exchanges are already part of the fetched history.
    pub fn seed(&self, conversation_id: &str, history: Vec<Message>) -> bool {
        {
            let mut conversations = self.store.conversations.borrow_mut();
            let entry = conversations.entry(conversation_id.to_string()).or_default();
            if entry.seeded {
                return false;
            }
            entry.seeded = true;
        }

        self.replace(conversation_id, move |local| {
            let mut messages = history;
            for msg in in_flight(local) {
                if !messages.iter().any(|m| m.id == msg.id) {
                    messages.push(msg);
                }
            }
            messages
        });
        true
    }

    pub fn is_seeded(&self, conversation_id: &str) -> bool {
        self.store
            .conversations
            .borrow()
            .get(conversation_id)
            .map(|entry| entry.seeded)
            .unwrap_or(false)
    }

    // ========================================================================
    // Pending flag
    // ========================================================================

    pub fn is_pending(&self, conversation_id: &str) -> bool {
        self.store
            .conversations
            .borrow()
            .get(conversation_id)
            .map(|entry| entry.pending)
            .unwrap_or(false)
    }

    pub fn set_pending(&self, conversation_id: &str, pending: bool) {
        self.store
            .conversations
            .borrow_mut()
            .entry(conversation_id.to_string())
            .or_default()
            .pending = pending;
    }

    /// Mark a send as in flight unless one already is.
    ///
    /// Returns `true` if the caller now owns the send slot.
    pub fn try_begin_send(&self, conversation_id: &str) -> bool {
        let mut conversations = self.store.conversations.borrow_mut();
        let entry = conversations.entry(conversation_id.to_string()).or_default();
        if entry.pending {
            return false;
        }
        entry.pending = true;
        true
    }

    // ========================================================================
    // Observers
    // ========================================================================

    /// Call `observer` after every `replace` on `conversation_id`.
    pub fn subscribe<F>(&self, conversation_id: &str, observer: F) -> Subscription
    where
        F: Fn(&str, &[Message]) + 'static,
    {
        let id = self.store.next_subscription.get();
        self.store.next_subscription.set(id + 1);
        let subscription = Subscription(id);
        self.store.observers.borrow_mut().push((
            subscription,
            conversation_id.to_string(),
            Rc::new(observer),
        ));
        subscription
    }

    /// Stop notifying a subscriber. Unknown handles are ignored.
    pub fn unsubscribe(&self, subscription: Subscription) {
        self.store
            .observers
            .borrow_mut()
            .retain(|(sub, _, _)| *sub != subscription);
    }

    fn observers_for(&self, conversation_id: &str) -> Vec<Observer> {
        self.store
            .observers
            .borrow()
            .iter()
            .filter(|(_, id, _)| id == conversation_id)
            .map(|(_, _, observer)| observer.clone())
            .collect()
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Forget every conversation and observer.
    pub fn clear(&self) {
        self.store.conversations.borrow_mut().clear();
        self.store.observers.borrow_mut().clear();
    }
}

/// The tail of `messages` that belongs to a send still streaming.
fn in_flight(mut messages: Vec<Message>) -> Vec<Message> {
    let Some(mut start) = messages.iter().position(|m| m.streaming) else {
        return Vec::new();
    };
    if start > 0 {
        let prev = &messages[start - 1];
        if prev.is_user() && is_local_id(&prev.id) {
            start -= 1;
        }
    }
    messages.split_off(start)
}

/// Non-owning handle to a [`MessageCache`].
///
/// Writes through a handle whose store has been dropped do nothing.
#[derive(Clone, Debug)]
pub struct WeakMessageCache {
    store: Weak<Store>,
}

impl WeakMessageCache {
    pub fn upgrade(&self) -> Option<MessageCache> {
        self.store.upgrade().map(|store| MessageCache { store })
    }

    pub fn is_alive(&self) -> bool {
        self.store.strong_count() > 0
    }

    /// [`MessageCache::replace`] if the store is alive. Returns whether it was.
    pub fn replace<F>(&self, conversation_id: &str, transform: F) -> bool
    where
        F: FnOnce(Vec<Message>) -> Vec<Message>,
    {
        match self.upgrade() {
            Some(cache) => {
                cache.replace(conversation_id, transform);
                true
            }
            None => false,
        }
    }

    /// [`MessageCache::set_pending`] if the store is alive.
    pub fn set_pending(&self, conversation_id: &str, pending: bool) -> bool {
        match self.upgrade() {
            Some(cache) => {
                cache.set_pending(conversation_id, pending);
                true
            }
            None => false,
        }
    }

    /// Current messages, or empty once the store is gone.
    pub fn get(&self, conversation_id: &str) -> Vec<Message> {
        self.upgrade()
            .map(|cache| cache.get(conversation_id))
            .unwrap_or_default()
    }
}
