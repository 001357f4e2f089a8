use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Result, anyhow};
use reqwest::Url;

use crate::error::ChatError;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant!";

/// Connection and pacing settings for a chat session.
///
/// Built once at startup and handed to [`crate::ChatClient::new`] by reference.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ChatConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub system_prompt: String,
    pub typing_interval_ms: u64,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "gemini-2.0-pro-exp-02-05".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            typing_interval_ms: 20,
            request_timeout_secs: 120,
            max_retries: 2,
            retry_backoff_ms: 500,
        }
    }
}

impl ChatConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from the user config directory, falling back to defaults when
    /// no file exists yet. Environment overrides are applied on top.
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        let config = Self::load_from(&config_path)?;
        Ok(config.with_env_overrides())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(path)?;
        let config: ChatConfig = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(path, config_content)?;
        Ok(())
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `AZCHAT_BASE_URL`, `AZCHAT_API_KEY` and `AZCHAT_MODEL` from `lookup`.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("AZCHAT_BASE_URL") {
            self.base_url = url;
        }
        if let Some(key) = non_empty("AZCHAT_API_KEY") {
            self.api_key = key;
        }
        if let Some(model) = non_empty("AZCHAT_MODEL") {
            self.model = model;
        }
        self
    }

    /// Check the settings that would otherwise only fail at request time.
    pub fn validate(&self) -> std::result::Result<Url, ChatError> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| ChatError::Config(format!("invalid base URL {:?}: {}", self.base_url, e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ChatError::Config(format!(
                "unsupported URL scheme {:?}, expected http or https",
                url.scheme()
            )));
        }
        if self.model.trim().is_empty() {
            return Err(ChatError::Config("model must not be empty".to_string()));
        }
        if self.typing_interval_ms == 0 {
            return Err(ChatError::Config("typing interval must be at least 1ms".to_string()));
        }
        Ok(url)
    }

    pub fn typing_interval(&self) -> Duration {
        Duration::from_millis(self.typing_interval_ms)
    }

    /// Stall limit for connecting, response headers and each body read.
    /// `None` when timeouts are disabled.
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("azchat"))
    }

    fn get_config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }
}
