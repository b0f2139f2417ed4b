//! Wire types for the chat backend API

use chat_core::{Character, Message, User};
use serde::{Deserialize, Serialize};

// ============================================================================
// Requests
// ============================================================================

/// Body of `POST /chat/{id}/send`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendMessageRequest {
    pub content: String,
}

// ============================================================================
// Responses
// ============================================================================

/// `GET /auth/me`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionResponse {
    #[serde(default)]
    pub user: Option<User>,
}

/// `GET /character/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterResponse {
    pub character: Character,
}

/// `GET /character/bulk`
///
/// The backend sends the list under the singular `character` key.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CharactersResponse {
    #[serde(rename = "character", alias = "characters", default)]
    pub characters: Vec<Character>,
}

/// `GET /chat/{id}/messages`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessagesResponse {
    #[serde(default)]
    pub messages: Vec<Message>,
}
