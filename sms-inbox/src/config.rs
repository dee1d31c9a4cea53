//! Configuration management for the inbox.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sms_provider::{Credentials, API_BASE_URL};

use crate::constants::{conversations, polling, storage};
use crate::error::{InboxError, Result};

/// Inbox configuration stored as TOML in the user's config directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Provider account identifier
    pub account_sid: String,
    /// Provider auth token
    pub auth_token: String,
    /// Provider API host
    pub api_base_url: String,
    /// Base URL of the flag overlay backend (overlay disabled when unset)
    pub flag_api_url: Option<String>,
    /// Bearer token for the flag overlay backend
    pub flag_api_token: Option<String>,
    /// Number of conversations to load per page/request
    pub conversations_per_page: usize,
    /// Number of messages requested per provider feed page
    pub feed_page_size: u32,
    /// Interval between activity polls in milliseconds
    pub poll_interval_ms: u64,
    /// Pages walked per feed when reconstructing missed activity
    pub catch_up_page_limit: usize,
    /// Owned numbers that are also reachable over WhatsApp
    pub whatsapp_numbers: Vec<String>,
    /// Enable desktop notifications for incoming messages
    pub notifications: bool,
    /// Show message content in notifications (privacy)
    pub notification_show_content: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            api_base_url: API_BASE_URL.to_string(),
            flag_api_url: None,
            flag_api_token: None,
            conversations_per_page: conversations::CONVERSATIONS_PER_PAGE,
            feed_page_size: conversations::FEED_PAGE_SIZE,
            poll_interval_ms: polling::POLL_INTERVAL_MS,
            catch_up_page_limit: polling::CATCH_UP_PAGE_LIMIT,
            whatsapp_numbers: Vec::new(),
            notifications: true,
            notification_show_content: true,
        }
    }
}

impl Config {
    /// Default config file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(storage::APP_DIR).join(storage::CONFIG_FILE))
    }

    /// Load configuration from disk, falling back to defaults if not found.
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            tracing::error!("No config directory available, using defaults");
            return Self::default();
        };

        match Self::load_from(&path) {
            Ok(config) => {
                tracing::info!("Loaded config from {}", path.display());
                config
            }
            Err(err) => {
                tracing::error!(?err, "Failed to load config, using defaults");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| InboxError::Config(e.to_string()))
    }

    /// Save configuration to disk.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| InboxError::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        tracing::info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Account credentials, if both parts are present.
    pub fn credentials(&self) -> Result<Credentials> {
        if self.account_sid.trim().is_empty() || self.auth_token.trim().is_empty() {
            return Err(InboxError::Config(
                "account_sid and auth_token must be set".to_string(),
            ));
        }

        Ok(Credentials {
            account_sid: self.account_sid.trim().to_string(),
            auth_token: self.auth_token.trim().to_string(),
        })
    }
}
