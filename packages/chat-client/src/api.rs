//! HTTP client for the chat backend API
//!
//! The backend owns persistence, reply generation and authentication; this
//! module only speaks its HTTP contract. [`ChatBackend`] is the seam the rest
//! of the client is written against.

pub mod client;
pub mod types;

pub use client::*;
pub use types::*;

use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use chat_core::{Character, Message, User};

/// Body of a streamed reply: raw UTF-8 bytes with arbitrary chunk boundaries
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<Bytes>>>>;

/// Operations the chat client needs from the backend.
///
/// In this product a conversation is keyed by the id of the character it is
/// held with, so `character_id` and `conversation_id` share one id space.
#[async_trait(?Send)]
pub trait ChatBackend {
    /// The signed-in user, or `None` if unauthenticated
    async fn current_user(&self) -> Result<Option<User>>;

    /// Every character the user can open a conversation with
    async fn list_characters(&self) -> Result<Vec<Character>>;

    async fn get_character(&self, character_id: &str) -> Result<Character>;

    /// Historical messages, oldest first
    async fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// Post `content` and open the reply body.
    ///
    /// A non-success status is an error; a success without a readable body
    /// is `Ok(None)`.
    async fn open_reply(&self, conversation_id: &str, content: &str) -> Result<Option<ReplyStream>>;
}
