//! Chat session: the state behind one open conversation view.
//!
//! Wraps authorization, first-load history seeding and the submit guard around
//! a [`SendController`]. Several sessions may share one [`MessageCache`].

use std::rc::Rc;

use tokio::task::JoinHandle;

use chat_core::{Character, Message, MessageCache, Subscription, User};

use crate::api::ChatBackend;
use crate::controller::{SendController, SendOutcome};

/// Errors surfaced to whoever drives a chat session
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("not signed in")]
    Unauthorized,

    #[error("character not found: {0}")]
    CharacterNotFound(String),

    #[error("message is empty")]
    EmptyMessage,

    #[error("a message is already being sent")]
    SendInFlight,

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub struct ChatSession<B> {
    backend: Rc<B>,
    cache: MessageCache,
    controller: SendController<B>,
    conversation_id: String,
    user: Option<User>,
    character: Option<Character>,
}

impl<B: ChatBackend + 'static> ChatSession<B> {
    pub fn new(backend: Rc<B>, cache: MessageCache, conversation_id: &str) -> Self {
        let controller = SendController::new(backend.clone(), &cache);
        Self {
            backend,
            cache,
            controller,
            conversation_id: conversation_id.to_string(),
            user: None,
            character: None,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn character(&self) -> Option<&Character> {
        self.character.as_ref()
    }

    pub fn is_authorized(&self) -> bool {
        self.user.is_some()
    }

    /// Ask the backend who is signed in. Nothing else works until this succeeds.
    pub async fn authorize(&mut self) -> Result<&User, ChatError> {
        match self.backend.current_user().await? {
            Some(user) => {
                tracing::info!("Signed in as {}", user.id);
                Ok(&*self.user.insert(user))
            }
            None => {
                self.user = None;
                Err(ChatError::Unauthorized)
            }
        }
    }

    /// Load the character header and, on first load only, the message history.
    pub async fn load(&mut self) -> Result<(), ChatError> {
        if !self.is_authorized() {
            return Err(ChatError::Unauthorized);
        }

        let character = self
            .backend
            .get_character(&self.conversation_id)
            .await
            .map_err(|e| {
                tracing::warn!("Character lookup failed: {:#}", e);
                ChatError::CharacterNotFound(self.conversation_id.clone())
            })?;
        self.character = Some(character);

        if self.cache.is_seeded(&self.conversation_id) {
            tracing::debug!("History for {} already cached", self.conversation_id);
            return Ok(());
        }
        if self.cache.is_pending(&self.conversation_id) {
            tracing::debug!("Send in flight for {}, skipping history fetch", self.conversation_id);
            return Ok(());
        }

        let history = self.backend.get_messages(&self.conversation_id).await?;
        tracing::debug!("Loaded {} messages for {}", history.len(), self.conversation_id);
        self.cache.seed(&self.conversation_id, history);
        Ok(())
    }

    /// Current messages of this conversation
    pub fn messages(&self) -> Vec<Message> {
        self.cache.get(&self.conversation_id)
    }

    pub fn is_pending(&self) -> bool {
        self.cache.is_pending(&self.conversation_id)
    }

    /// Be called after every change to this conversation's messages.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&str, &[Message]) + 'static,
    {
        self.cache.subscribe(&self.conversation_id, observer)
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.cache.unsubscribe(subscription);
    }

    /// Start sending `text` unless it is blank or a send is already running.
    ///
    /// The send runs on the current `LocalSet` and completes even if the
    /// returned handle, or the session itself, is dropped.
    pub fn submit(&self, text: &str) -> Result<JoinHandle<SendOutcome>, ChatError> {
        if !self.is_authorized() {
            return Err(ChatError::Unauthorized);
        }
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if !self.cache.try_begin_send(&self.conversation_id) {
            tracing::debug!("Ignoring submit for {}: send in flight", self.conversation_id);
            return Err(ChatError::SendInFlight);
        }

        Ok(self.controller.spawn(&self.conversation_id, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::tests::{Script, ScriptedBackend};
    use tokio::task::LocalSet;

    fn session(backend: ScriptedBackend) -> (MessageCache, ChatSession<ScriptedBackend>) {
        let cache = MessageCache::new();
        let session = ChatSession::new(Rc::new(backend), cache.clone(), "C1");
        (cache, session)
    }

    #[tokio::test]
    async fn test_unauthenticated_session_cannot_send() {
        let mut backend = ScriptedBackend::chunks(&[b"Hi"]);
        backend.user = None;
        let (_cache, mut session) = session(backend);

        assert!(matches!(session.authorize().await, Err(ChatError::Unauthorized)));
        assert!(matches!(session.load().await, Err(ChatError::Unauthorized)));
        assert!(matches!(session.submit("hello"), Err(ChatError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_load_seeds_history_once() {
        let mut backend = ScriptedBackend::chunks(&[b"Hi"]);
        backend.history = vec![Message::assistant("1", "Hello, traveler.")];
        let (cache, mut session) = session(backend);

        session.authorize().await.unwrap();
        session.load().await.unwrap();
        assert_eq!(session.character().map(|c| c.name.as_str()), Some("Ada"));
        assert_eq!(session.messages().len(), 1);

        cache.replace("C1", chat_core::transform::append(Message::user("local-x", "more")));
        session.load().await.unwrap();
        assert_eq!(session.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_history_loaded_after_send_has_no_duplicates() {
        let mut backend = ScriptedBackend::chunks(&[b"Hi", b" there"]);
        backend.history = vec![Message::user("101", "hello"), Message::assistant("102", "Hi there")];
        let (cache, mut session) = session(backend);
        session.authorize().await.unwrap();

        let local = LocalSet::new();
        local
            .run_until(async { session.submit("hello").unwrap().await.unwrap() })
            .await;
        session.load().await.unwrap();

        let ids: Vec<String> = cache.get("C1").into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["101", "102"]);
    }

    #[tokio::test]
    async fn test_blank_submit_is_ignored() {
        let (cache, mut session) = session(ScriptedBackend::chunks(&[b"Hi"]));
        session.authorize().await.unwrap();

        assert!(matches!(session.submit("   \n"), Err(ChatError::EmptyMessage)));
        assert!(!cache.is_pending("C1"));
        assert!(cache.get("C1").is_empty());
    }

    #[tokio::test]
    async fn test_second_submit_rejected_while_pending() {
        let (cache, mut session) = session(ScriptedBackend::chunks(&[b"Hi", b" there"]));
        session.authorize().await.unwrap();

        let local = LocalSet::new();
        local
            .run_until(async {
                let handle = session.submit("hello").unwrap();
                assert!(session.is_pending());
                assert!(matches!(session.submit("again"), Err(ChatError::SendInFlight)));

                let outcome = handle.await.unwrap();
                assert!(outcome.is_finalized());
            })
            .await;

        assert!(!cache.is_pending("C1"));
        let messages = cache.get("C1");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "Hi there");
    }

    #[tokio::test]
    async fn test_failed_send_reenables_submit() {
        let (cache, mut session) = session(ScriptedBackend::new(Script::Status(500)));
        session.authorize().await.unwrap();

        let local = LocalSet::new();
        let outcome = local
            .run_until(async { session.submit("hello").unwrap().await.unwrap() })
            .await;

        assert!(!outcome.is_finalized());
        assert!(!session.is_pending());
        let messages = cache.get("C1");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hello");
    }

    #[tokio::test]
    async fn test_send_outlives_session() {
        let (cache, mut session) = session(ScriptedBackend::chunks(&[b"late ", b"reply"]));
        session.authorize().await.unwrap();

        let local = LocalSet::new();
        let outcome = local
            .run_until(async move {
                let handle = session.submit("hello").unwrap();
                drop(session);
                handle.await.unwrap()
            })
            .await;

        assert_eq!(outcome.reply().map(|m| m.content.as_str()), Some("late reply"));
        assert_eq!(cache.get("C1")[1].content, "late reply");
    }
}
