//! Pure edits over a conversation's message sequence.
//!
//! Every change to the cache is one of these, applied through
//! [`MessageCache::replace`](crate::MessageCache::replace). Each function
//! returns the edit as a closure so it can be built in one place and applied
//! in another, or tested directly against a plain `Vec`.

use crate::types::{Message, Role};

/// Append a message at the end of the conversation.
pub fn append(message: Message) -> impl FnOnce(Vec<Message>) -> Vec<Message> {
    move |mut messages| {
        messages.push(message);
        messages
    }
}

/// Overwrite the content of the streaming message `id` with `content`.
///
/// The new value supersedes the old one outright, so writing the same
/// accumulated text twice leaves the message unchanged.
pub fn set_streaming_content(
    id: impl Into<String>,
    content: impl Into<String>,
) -> impl FnOnce(Vec<Message>) -> Vec<Message> {
    let id = id.into();
    let content = content.into();
    move |messages| {
        messages
            .into_iter()
            .map(|msg| {
                if msg.id == id {
                    Message {
                        content: content.clone(),
                        streaming: true,
                        ..msg
                    }
                } else {
                    msg
                }
            })
            .collect()
    }
}

/// Swap the placeholder `id` for a finished assistant message.
pub fn finalize(
    id: impl Into<String>,
    final_id: impl Into<String>,
    content: impl Into<String>,
) -> impl FnOnce(Vec<Message>) -> Vec<Message> {
    let id = id.into();
    let final_id = final_id.into();
    let content = content.into();
    move |messages| {
        messages
            .into_iter()
            .map(|msg| {
                if msg.id == id {
                    Message {
                        id: final_id.clone(),
                        content: content.clone(),
                        role: Role::Assistant,
                        streaming: false,
                    }
                } else {
                    msg
                }
            })
            .collect()
    }
}

/// Drop the message `id`, leaving everything else in place.
pub fn remove_by_id(id: impl Into<String>) -> impl FnOnce(Vec<Message>) -> Vec<Message> {
    let id = id.into();
    move |mut messages| {
        messages.retain(|msg| msg.id != id);
        messages
    }
}

/// Number of messages still marked as streaming.
pub fn streaming_count(messages: &[Message]) -> usize {
    messages.iter().filter(|msg| msg.streaming).count()
}
