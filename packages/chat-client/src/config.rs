//! Client configuration.
//!
//! Settings come from a TOML file, then environment variables, then command
//! line flags, each layer overriding the previous one.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:3000";

/// Connection settings for the chat backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend origin; the API lives under `/api`
    pub backend_url: String,
    /// Raw `Cookie` header value identifying the signed-in session
    pub session_cookie: Option<String>,
    pub connect_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            session_cookie: None,
            connect_timeout_secs: 10,
        }
    }
}

impl ClientConfig {
    /// Config file location: `CHAT_CLIENT_CONFIG`, else the platform config dir.
    pub fn default_path() -> PathBuf {
        if let Ok(path) = env::var("CHAT_CLIENT_CONFIG") {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        directories::ProjectDirs::from("", "", "character-chat")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("chat-client.toml"))
    }

    /// Load from the default path with environment overrides applied.
    pub fn load() -> Result<Self> {
        Ok(Self::load_from_path(&Self::default_path())?.with_env_overrides())
    }

    /// Load from a file. A missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    /// Apply `CHAT_BACKEND_URL` and `CHAT_SESSION_COOKIE` when set.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(
            env::var("CHAT_BACKEND_URL").ok(),
            env::var("CHAT_SESSION_COOKIE").ok(),
        )
    }

    /// Replace fields with any non-blank value given.
    pub fn with_overrides(mut self, backend_url: Option<String>, session_cookie: Option<String>) -> Self {
        if let Some(url) = backend_url.filter(|v| !v.trim().is_empty()) {
            self.backend_url = url;
        }
        if let Some(cookie) = session_cookie.filter(|v| !v.trim().is_empty()) {
            self.session_cookie = Some(cookie);
        }
        self
    }

    /// Base URL for API routes
    pub fn api_base(&self) -> String {
        format!("{}/api", self.backend_url.trim_end_matches('/'))
    }
}
