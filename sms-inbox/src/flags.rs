//! Moderation flags from the overlay backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::constants::flags::{FLAGGED_PATH, REQUEST_TIMEOUT_SECS};
use crate::conversations::{Conversation, FlagStatus};
use crate::error::{InboxError, Result};

/// One flagged conversation as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagRecord {
    /// Conversation id (owned address followed by counterparty).
    pub chat_code: String,
    #[serde(default)]
    pub is_flagged: bool,
    #[serde(default)]
    pub flagged_reason: Option<String>,
    #[serde(default)]
    pub flagged_message: Option<String>,
}

impl From<&FlagRecord> for FlagStatus {
    fn from(record: &FlagRecord) -> Self {
        Self {
            is_flagged: record.is_flagged,
            reason: record.flagged_reason.clone(),
            sample: record.flagged_message.clone(),
        }
    }
}

#[async_trait]
pub trait FlagSource: Send + Sync {
    async fn flagged_conversations(&self) -> Result<Vec<FlagRecord>>;
}

#[derive(Debug, Deserialize)]
struct FlagResponse {
    #[serde(default)]
    data: Vec<FlagRecord>,
}

/// Flag backend reached over HTTP with a bearer token.
#[derive(Debug, Clone)]
pub struct HttpFlagSource {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpFlagSource {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| InboxError::FlagOverlay(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn flagged_url(&self) -> String {
        format!("{}{}", self.base_url, FLAGGED_PATH)
    }
}

#[async_trait]
impl FlagSource for HttpFlagSource {
    async fn flagged_conversations(&self) -> Result<Vec<FlagRecord>> {
        let mut request = self.http.get(self.flagged_url());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| InboxError::FlagOverlay(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(InboxError::FlagOverlay(format!(
                "backend returned {status}"
            )));
        }

        let body: FlagResponse = response
            .json()
            .await
            .map_err(|e| InboxError::FlagOverlay(e.to_string()))?;
        Ok(body.data)
    }
}

/// Decorates conversations with flag status. Never fails.
#[derive(Clone, Default)]
pub struct FlagOverlayMerger {
    source: Option<Arc<dyn FlagSource>>,
}

impl FlagOverlayMerger {
    pub fn new(source: Arc<dyn FlagSource>) -> Self {
        Self {
            source: Some(source),
        }
    }

    /// Merger with no backend; conversations pass through untouched.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Attach flags to matching conversations.
    ///
    /// Backend failures are logged and the conversations are returned as-is.
    pub async fn apply(&self, conversations: Vec<Conversation>) -> Vec<Conversation> {
        let Some(source) = &self.source else {
            return conversations;
        };

        match source.flagged_conversations().await {
            Ok(records) => merge(conversations, &records),
            Err(err) => {
                tracing::warn!(?err, "Flag overlay unavailable, showing conversations unflagged");
                conversations
            }
        }
    }
}

/// Attach each record to the conversation with the same id.
pub fn merge(mut conversations: Vec<Conversation>, records: &[FlagRecord]) -> Vec<Conversation> {
    let by_code: HashMap<&str, &FlagRecord> =
        records.iter().map(|r| (r.chat_code.as_str(), r)).collect();

    for conversation in &mut conversations {
        if let Some(record) = by_code.get(conversation.id.as_str()) {
            conversation.flag = Some(FlagStatus::from(*record));
        }
    }
    conversations
}
