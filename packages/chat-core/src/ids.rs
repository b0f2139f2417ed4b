//! Locally generated message ids.
//!
//! Server-issued ids never carry the `local-` prefix, so ids minted here
//! cannot collide with them within a session.

use uuid::Uuid;

const LOCAL_PREFIX: &str = "local-";
const PLACEHOLDER_SUFFIX: &str = "-streaming";

/// A fresh id for an optimistic user message or a finalized reply.
pub fn local_message_id() -> String {
    format!("{}{}", LOCAL_PREFIX, Uuid::new_v4())
}

/// A fresh id for a streaming reply placeholder.
pub fn placeholder_id() -> String {
    format!("{}{}{}", LOCAL_PREFIX, Uuid::new_v4(), PLACEHOLDER_SUFFIX)
}

pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_PREFIX)
}
