//! Chat Client - streaming conversations with characters.
//!
//! Talks to the chat backend over HTTP and keeps a local, optimistic view of
//! each conversation in a [`chat_core::MessageCache`]:
//!
//! - **api**: backend HTTP contract and the [`ChatBackend`] seam
//! - **controller**: one send end to end, with streaming and rollback
//! - **chat**: per-conversation session with the submit guard
//! - **config**: file, environment and flag based settings
//!
//! Everything here runs on a single thread. Sends are spawned with
//! `tokio::task::spawn_local`, so callers drive them from a `LocalSet`.

pub mod api;
pub mod chat;
pub mod config;
pub mod controller;

pub use api::{BackendClient, ChatBackend, ReplyStream};
pub use chat::{ChatError, ChatSession};
pub use config::ClientConfig;
pub use controller::{SendController, SendError, SendOutcome};
