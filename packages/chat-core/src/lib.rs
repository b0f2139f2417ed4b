//! Chat Core - conversation state for the character chat client.
//!
//! This crate holds everything about a conversation that does not touch the
//! network:
//!
//! - **Message cache**: ordered, per-conversation message logs with a single
//!   `replace` mutation primitive and synchronous observers
//! - **Transforms**: the pure `Vec<Message> -> Vec<Message>` edits used for
//!   optimistic sends, streaming updates, finalization and rollback
//! - **Stream decoder**: incremental UTF-8 decoding of reply chunks
//! - **Send state machine**: the lifecycle of a single send
//!
//! # Example
//!
//! ```rust
//! use chat_core::{transform, Message, MessageCache};
//!
//! let cache = MessageCache::new();
//! cache.replace("c1", transform::append(Message::user("local-1", "hello")));
//! cache.replace("c1", transform::append(Message::placeholder("local-2-streaming")));
//! cache.replace("c1", transform::set_streaming_content("local-2-streaming", "Hi"));
//!
//! let messages = cache.get("c1");
//! assert_eq!(messages.len(), 2);
//! assert_eq!(messages[1].content, "Hi");
//! assert!(messages[1].streaming);
//! ```

pub mod cache;
pub mod decoder;
pub mod ids;
pub mod state;
pub mod transform;
pub mod types;

// Re-export commonly used types
pub use cache::{MessageCache, Observer, Subscription, WeakMessageCache};
pub use decoder::{Utf8StreamDecoder, REPLACEMENT_CHARACTER};
pub use ids::{is_local_id, local_message_id, placeholder_id};
pub use state::SendPhase;
pub use types::{Character, Message, Role, User};

/// Error types for chat-core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unknown message role: {0}")]
    UnknownRole(String),

    #[error("Invalid send transition: {from:?} -> {to:?}")]
    InvalidTransition { from: SendPhase, to: SendPhase },
}

/// Result type for chat-core operations.
pub type Result<T> = std::result::Result<T, Error>;
