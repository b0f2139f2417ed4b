//! Optimistic send controller
//!
//! Runs one "send message" end to end: the user's message and an empty
//! assistant placeholder go into the cache straight away, the reply body is
//! decoded chunk by chunk into the placeholder, and the placeholder is then
//! either finalized or removed. Failures never leave this module; the caller
//! learns what happened from the returned [`SendOutcome`] and from the cache.

use std::rc::Rc;

use futures::StreamExt;
use tokio::task::JoinHandle;

use chat_core::{
    local_message_id, placeholder_id, transform, Message, MessageCache, SendPhase,
    Utf8StreamDecoder, WeakMessageCache,
};

use crate::api::ChatBackend;

/// Why a send was rolled back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The request could not be issued or returned a non-success status
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// The backend answered without a body to read
    #[error("reply had no readable body")]
    StreamUnavailable,

    /// Reading a chunk failed after the reply started
    #[error("reply stream failed: {0}")]
    ReadFailed(String),
}

/// How a send ended. Always produced, success or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The reply now sits in the cache as this message
    Finalized(Message),
    /// The placeholder was removed; the user's message stays
    RolledBack(SendError),
}

impl SendOutcome {
    pub fn is_finalized(&self) -> bool {
        matches!(self, SendOutcome::Finalized(_))
    }

    pub fn reply(&self) -> Option<&Message> {
        match self {
            SendOutcome::Finalized(message) => Some(message),
            SendOutcome::RolledBack(_) => None,
        }
    }
}

/// Drives sends against a backend and a message cache.
///
/// The controller only holds a weak handle to the cache: a send that outlives
/// the session keeps reading its reply to the end, and its writes are dropped.
/// It does not serialize overlapping sends; callers check the cache's pending
/// flag first (see [`MessageCache::try_begin_send`]).
pub struct SendController<B> {
    backend: Rc<B>,
    cache: WeakMessageCache,
}

impl<B> Clone for SendController<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl<B: ChatBackend + 'static> SendController<B> {
    pub fn new(backend: Rc<B>, cache: &MessageCache) -> Self {
        Self {
            backend,
            cache: cache.downgrade(),
        }
    }

    /// Run [`send`](Self::send) as a task on the current `LocalSet`.
    ///
    /// The task keeps running if the returned handle is dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a `tokio::task::LocalSet`.
    pub fn spawn(&self, conversation_id: &str, content: &str) -> JoinHandle<SendOutcome> {
        let controller = self.clone();
        let conversation_id = conversation_id.to_string();
        let content = content.to_string();
        tokio::task::spawn_local(async move { controller.send(&conversation_id, &content).await })
    }

    /// Send `content` to `conversation_id` and stream the reply into the cache.
    ///
    /// Clears the conversation's pending flag before returning, whichever way
    /// the send ended.
    pub async fn send(&self, conversation_id: &str, content: &str) -> SendOutcome {
        let mut phase = SendPhase::Idle;
        self.cache.set_pending(conversation_id, true);

        let user_id = local_message_id();
        self.write(conversation_id, transform::append(Message::user(&user_id, content)));
        step(&mut phase, SendPhase::UserAppended);

        let placeholder = placeholder_id();
        self.write(conversation_id, transform::append(Message::placeholder(&placeholder)));
        step(&mut phase, SendPhase::PlaceholderAppended);

        tracing::debug!(
            "Sending message {} to {} (placeholder {})",
            user_id,
            conversation_id,
            placeholder
        );

        let outcome = match self
            .stream_reply(conversation_id, content, &placeholder, &mut phase)
            .await
        {
            Ok(reply) => {
                let final_id = local_message_id();
                self.write(
                    conversation_id,
                    transform::finalize(&placeholder, &final_id, &reply),
                );
                step(&mut phase, SendPhase::Finalized);
                tracing::debug!("Reply {} finalized ({} bytes)", final_id, reply.len());
                SendOutcome::Finalized(Message::assistant(final_id, reply))
            }
            Err(e) => {
                tracing::warn!("Send to {} failed, rolling back: {}", conversation_id, e);
                self.write(conversation_id, transform::remove_by_id(&placeholder));
                step(&mut phase, SendPhase::RolledBack);
                SendOutcome::RolledBack(e)
            }
        };

        self.cache.set_pending(conversation_id, false);
        step(&mut phase, SendPhase::Idle);
        outcome
    }

    /// Open the reply and merge it into the placeholder. Returns the full text.
    async fn stream_reply(
        &self,
        conversation_id: &str,
        content: &str,
        placeholder: &str,
        phase: &mut SendPhase,
    ) -> Result<String, SendError> {
        let reply = self
            .backend
            .open_reply(conversation_id, content)
            .await
            .map_err(|e| SendError::RequestFailed(format!("{:#}", e)))?;
        let mut stream = reply.ok_or(SendError::StreamUnavailable)?;

        let mut decoder = Utf8StreamDecoder::new();
        let mut accumulated = String::new();

        // Each chunk is written before the next read is issued.
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| SendError::ReadFailed(format!("{:#}", e)))?;
            accumulated.push_str(&decoder.decode(&bytes, false));
            step(phase, SendPhase::Streaming);
            self.write(
                conversation_id,
                transform::set_streaming_content(placeholder, accumulated.as_str()),
            );
        }

        accumulated.push_str(&decoder.finish());
        Ok(accumulated)
    }

    fn write<F>(&self, conversation_id: &str, edit: F)
    where
        F: FnOnce(Vec<Message>) -> Vec<Message>,
    {
        if !self.cache.replace(conversation_id, edit) {
            tracing::trace!("Cache for {} is gone, dropping write", conversation_id);
        }
    }
}

fn step(phase: &mut SendPhase, next: SendPhase) {
    match phase.advance(next) {
        Ok(advanced) => *phase = advanced,
        Err(e) => tracing::error!("{}", e),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::ReplyStream;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use bytes::Bytes;
    use chat_core::{Character, Role, User};
    use std::cell::RefCell;

    /// What the scripted backend answers to `open_reply`
    pub(crate) enum Script {
        Chunks(Vec<Result<Vec<u8>>>),
        Status(u16),
        NoBody,
    }

    pub(crate) struct ScriptedBackend {
        pub(crate) user: Option<User>,
        pub(crate) history: Vec<Message>,
        pub(crate) script: RefCell<Option<Script>>,
        pub(crate) sent: RefCell<Vec<(String, String)>>,
    }

    impl ScriptedBackend {
        pub(crate) fn new(script: Script) -> Self {
            Self {
                user: Some(User {
                    id: "user-1".to_string(),
                    ..Default::default()
                }),
                history: Vec::new(),
                script: RefCell::new(Some(script)),
                sent: RefCell::new(Vec::new()),
            }
        }

        pub(crate) fn chunks(chunks: &[&[u8]]) -> Self {
            Self::new(Script::Chunks(
                chunks.iter().map(|c| Ok(c.to_vec())).collect(),
            ))
        }
    }

    #[async_trait(?Send)]
    impl ChatBackend for ScriptedBackend {
        async fn current_user(&self) -> Result<Option<User>> {
            Ok(self.user.clone())
        }

        async fn list_characters(&self) -> Result<Vec<Character>> {
            Ok(vec![self.get_character("C1").await?])
        }

        async fn get_character(&self, character_id: &str) -> Result<Character> {
            Ok(Character {
                id: character_id.to_string(),
                name: "Ada".to_string(),
                ..Default::default()
            })
        }

        async fn get_messages(&self, _conversation_id: &str) -> Result<Vec<Message>> {
            Ok(self.history.clone())
        }

        async fn open_reply(&self, conversation_id: &str, content: &str) -> Result<Option<ReplyStream>> {
            self.sent
                .borrow_mut()
                .push((conversation_id.to_string(), content.to_string()));

            match self.script.borrow_mut().take() {
                Some(Script::Chunks(chunks)) => {
                    let items: Vec<Result<Bytes>> =
                        chunks.into_iter().map(|c| c.map(Bytes::from)).collect();
                    let stream: ReplyStream = Box::pin(futures::stream::iter(items));
                    Ok(Some(stream))
                }
                Some(Script::Status(code)) => Err(anyhow!("Request failed: {}", code)),
                Some(Script::NoBody) => Ok(None),
                None => Err(anyhow!("no script left")),
            }
        }
    }

    fn setup(backend: ScriptedBackend) -> (MessageCache, SendController<ScriptedBackend>) {
        let cache = MessageCache::new();
        let controller = SendController::new(Rc::new(backend), &cache);
        (cache, controller)
    }

    #[tokio::test]
    async fn test_successful_send_finalizes_reply() {
        let (cache, controller) = setup(ScriptedBackend::chunks(&[b"Hi", b" there"]));

        let outcome = controller.send("C1", "hello").await;

        let messages = cache.get("C1");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hi there");
        assert!(!messages[1].streaming);
        assert!(!messages[1].id.ends_with("-streaming"));
        assert_eq!(outcome.reply(), Some(&messages[1]));
        assert!(!cache.is_pending("C1"));
    }

    #[tokio::test]
    async fn test_request_failure_rolls_back() {
        let (cache, controller) = setup(ScriptedBackend::new(Script::Status(500)));
        cache.set_pending("C1", true);

        let outcome = controller.send("C1", "hello").await;

        assert!(matches!(outcome, SendOutcome::RolledBack(SendError::RequestFailed(_))));
        let messages = cache.get("C1");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hello");
        assert!(messages[0].is_user());
        assert!(!cache.is_pending("C1"));
    }

    #[tokio::test]
    async fn test_missing_body_rolls_back() {
        let (cache, controller) = setup(ScriptedBackend::new(Script::NoBody));

        let outcome = controller.send("C1", "hello").await;

        assert_eq!(outcome, SendOutcome::RolledBack(SendError::StreamUnavailable));
        assert_eq!(cache.len("C1"), 1);
    }

    #[tokio::test]
    async fn test_mid_stream_failure_discards_partial_reply() {
        let backend = ScriptedBackend::new(Script::Chunks(vec![
            Ok(b"partial ".to_vec()),
            Err(anyhow!("connection reset")),
            Ok(b"never read".to_vec()),
        ]));
        let (cache, controller) = setup(backend);
        let placeholder_ids = Rc::new(RefCell::new(Vec::new()));

        let sink = placeholder_ids.clone();
        cache.subscribe("C1", move |_, messages| {
            for msg in messages.iter().filter(|m| m.streaming) {
                sink.borrow_mut().push(msg.id.clone());
            }
        });

        let outcome = controller.send("C1", "hello").await;

        assert!(matches!(outcome, SendOutcome::RolledBack(SendError::ReadFailed(_))));
        let messages = cache.get("C1");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hello");
        for id in placeholder_ids.borrow().iter() {
            assert!(messages.iter().all(|m| &m.id != id));
        }
    }

    #[tokio::test]
    async fn test_split_multibyte_character_is_reconstructed() {
        // "世" (E4 B8 96) split across chunks
        let (cache, controller) = setup(ScriptedBackend::chunks(&[
            b"A \xE4\xB8",
            b"\x96 B",
        ]));

        controller.send("C1", "hello").await;

        let reply = &cache.get("C1")[1];
        assert_eq!(reply.content, "A 世 B");
        assert!(!reply.content.contains('\u{FFFD}'));
    }

    #[tokio::test]
    async fn test_invalid_bytes_are_replaced_not_rolled_back() {
        let (cache, controller) = setup(ScriptedBackend::chunks(&[b"o\xFFk", b" \xE4\xB8"]));

        let outcome = controller.send("C1", "hello").await;

        assert!(outcome.is_finalized());
        let reply = &cache.get("C1")[1];
        assert_eq!(reply.content, "o\u{FFFD}k \u{FFFD}");
        assert!(!reply.streaming);
        assert!(!cache.is_pending("C1"));
    }

    #[tokio::test]
    async fn test_every_write_keeps_order_and_single_stream() {
        let history = vec![Message::assistant("1", "Welcome."), Message::user("2", "hey")];
        let mut backend = ScriptedBackend::chunks(&[b"a", b"b", b"c"]);
        backend.history = history.clone();
        let (cache, controller) = setup(backend);
        cache.seed("C1", history);

        let snapshots: Rc<RefCell<Vec<Vec<Message>>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = snapshots.clone();
        cache.subscribe("C1", move |_, messages| sink.borrow_mut().push(messages.to_vec()));

        controller.send("C1", "go").await;

        let snapshots = snapshots.borrow();
        // user, placeholder, three chunks, finalize
        assert_eq!(snapshots.len(), 6);
        for snapshot in snapshots.iter() {
            assert!(transform::streaming_count(snapshot) <= 1);
            assert_eq!(snapshot[0].id, "1");
            assert_eq!(snapshot[1].id, "2");
            assert_eq!(snapshot[2].content, "go");
            if snapshot.len() == 4 {
                assert!(snapshot[3].is_assistant());
            }
        }

        let contents: Vec<&str> = snapshots[1..].iter().map(|s| s[3].content.as_str()).collect();
        assert_eq!(contents, vec!["", "a", "ab", "abc", "abc"]);
        assert_eq!(transform::streaming_count(&snapshots[5]), 0);
    }

    #[tokio::test]
    async fn test_request_carries_content() {
        let backend = Rc::new(ScriptedBackend::chunks(&[b"ok"]));
        let cache = MessageCache::new();
        let controller = SendController::new(backend.clone(), &cache);

        controller.send("C7", "what's up").await;

        assert_eq!(
            backend.sent.borrow().as_slice(),
            [("C7".to_string(), "what's up".to_string())]
        );
    }

    #[tokio::test]
    async fn test_send_survives_dropped_cache() {
        let (cache, controller) = setup(ScriptedBackend::chunks(&[b"still ", b"here"]));
        drop(cache);

        let outcome = controller.send("C1", "hello").await;

        assert_eq!(outcome.reply().map(|m| m.content.as_str()), Some("still here"));
    }

    #[tokio::test]
    async fn test_spawned_send_runs_on_local_set() {
        let (cache, controller) = setup(ScriptedBackend::chunks(&[b"Hi"]));
        let local = tokio::task::LocalSet::new();

        let outcome = local
            .run_until(async move { controller.spawn("C1", "hello").await })
            .await
            .unwrap();

        assert!(outcome.is_finalized());
        assert_eq!(cache.get("C1")[1].content, "Hi");
    }
}
