//! Chat backend HTTP client with streaming reply support

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, COOKIE};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use chat_core::{Character, Message, User};

use super::types::*;
use super::{ChatBackend, ReplyStream};
use crate::config::ClientConfig;

/// HTTP client for the chat backend.
///
/// Requests carry credentials: cookies set by the backend are kept in the
/// client's cookie store, and a configured session cookie is sent up front.
#[derive(Debug, Clone)]
pub struct BackendClient {
    base_url: String,
    client: Client,
}

impl BackendClient {
    /// Create a client for `backend_url` with default settings
    pub fn new(backend_url: &str) -> Result<Self> {
        Self::from_config(&ClientConfig {
            backend_url: backend_url.to_string(),
            ..ClientConfig::default()
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(ref cookie) = config.session_cookie {
            headers.insert(
                COOKIE,
                HeaderValue::from_str(cookie).context("Invalid session cookie")?,
            );
        }

        let client = Client::builder()
            .cookie_store(true)
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: config.api_base(),
            client,
        })
    }

    /// The API base URL, e.g. `http://127.0.0.1:3000/api`
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ========================================================================
    // Internal HTTP Methods
    // ========================================================================

    /// Make a GET request
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Request failed: {} {}",
                response.status(),
                response.text().await.unwrap_or_default()
            ));
        }

        Ok(response.json().await?)
    }

    /// Make a POST request whose body is consumed as a stream
    async fn post_stream<B: Serialize>(&self, path: &str, body: &B) -> Result<Response> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Request failed: {} {}",
                response.status(),
                response.text().await.unwrap_or_default()
            ));
        }

        Ok(response)
    }

    // ========================================================================
    // Auth API
    // ========================================================================

    /// The signed-in user, or `None` when the session is not authenticated
    pub async fn current_user(&self) -> Result<Option<User>> {
        match self.get::<SessionResponse>("/auth/me").await {
            Ok(session) => Ok(session.user),
            Err(e) => {
                tracing::debug!("Session lookup failed, treating as signed out: {}", e);
                Ok(None)
            }
        }
    }

    // ========================================================================
    // Character API
    // ========================================================================

    /// List the characters available to the signed-in user
    pub async fn list_characters(&self) -> Result<Vec<Character>> {
        let response: CharactersResponse = self.get("/character/bulk").await?;
        Ok(response.characters)
    }

    /// Get a character by ID
    pub async fn get_character(&self, id: &str) -> Result<Character> {
        let response: CharacterResponse = self.get(&format!("/character/{}", id)).await?;
        Ok(response.character)
    }

    // ========================================================================
    // Message API
    // ========================================================================

    /// Get the message history of a conversation
    pub async fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let response: MessagesResponse = self
            .get(&format!("/chat/{}/messages", conversation_id))
            .await?;
        Ok(response.messages)
    }

    /// Send a message and open the streamed reply.
    ///
    /// Returns `Ok(None)` when the backend accepted the message but sent no
    /// body to read.
    pub async fn send_message_stream(
        &self,
        conversation_id: &str,
        request: SendMessageRequest,
    ) -> Result<Option<ReplyStream>> {
        let response = self
            .post_stream(&format!("/chat/{}/send", conversation_id), &request)
            .await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        Ok(Some(Box::pin(reply_bytes(response))))
    }
}

#[async_trait(?Send)]
impl ChatBackend for BackendClient {
    async fn current_user(&self) -> Result<Option<User>> {
        BackendClient::current_user(self).await
    }

    async fn list_characters(&self) -> Result<Vec<Character>> {
        BackendClient::list_characters(self).await
    }

    async fn get_character(&self, character_id: &str) -> Result<Character> {
        BackendClient::get_character(self, character_id).await
    }

    async fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        BackendClient::get_messages(self, conversation_id).await
    }

    async fn open_reply(&self, conversation_id: &str, content: &str) -> Result<Option<ReplyStream>> {
        let request = SendMessageRequest {
            content: content.to_string(),
        };
        self.send_message_stream(conversation_id, request).await
    }
}

// ============================================================================
// Stream Reading
// ============================================================================

/// Raw body chunks of a reply, ending at the first transport error
fn reply_bytes(response: Response) -> impl Stream<Item = Result<Bytes>> {
    async_stream::stream! {
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    tracing::trace!("Reply chunk: {} bytes", bytes.len());
                    yield Ok(bytes);
                }
                Err(e) => {
                    yield Err(anyhow!("Stream error: {}", e));
                    break;
                }
            }
        }
    }
}
