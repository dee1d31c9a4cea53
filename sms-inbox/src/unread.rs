//! Unread state, derived from last-seen markers.
//!
//! A conversation is unread when the newest incoming message of the pair is
//! not the message the user last acknowledged.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::future::try_join_all;
use sms_provider::{Message, MessageProvider, MessageQuery};

use crate::constants::conversations::NEWEST_ONLY_PAGE_SIZE;
use crate::constants::storage;
use crate::conversations::Conversation;
use crate::error::Result;

/// Durable map of conversation id to last acknowledged incoming message id.
pub trait LastSeenStore: Send + Sync {
    fn last_seen(&self, conversation_id: &str) -> Option<String>;

    fn mark_seen(&self, conversation_id: &str, message_id: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LastSeenStore for MemoryStore {
    fn last_seen(&self, conversation_id: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(conversation_id)
            .cloned()
    }

    fn mark_seen(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(conversation_id.to_string(), message_id.to_string());
        Ok(())
    }
}

/// Markers kept in a JSON file, rewritten on every change.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, String>>,
}

impl JsonFileStore {
    /// Default marker file in the user's data directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join(storage::APP_DIR).join(storage::LAST_SEEN_FILE))
    }

    /// Open the store at `path`; a missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        tracing::debug!(
            "Loaded {} last-seen marker(s) from {}",
            entries.len(),
            path.display()
        );

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl LastSeenStore for JsonFileStore {
    fn last_seen(&self, conversation_id: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(conversation_id)
            .cloned()
    }

    fn mark_seen(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.get(conversation_id).map(String::as_str) == Some(message_id) {
            return Ok(());
        }
        entries.insert(conversation_id.to_string(), message_id.to_string());
        self.persist(&entries)
    }
}

/// Computes and records unread state for conversations.
#[derive(Clone)]
pub struct UnreadTracker {
    provider: Arc<dyn MessageProvider>,
    store: Arc<dyn LastSeenStore>,
}

impl UnreadTracker {
    pub fn new(provider: Arc<dyn MessageProvider>, store: Arc<dyn LastSeenStore>) -> Self {
        Self { provider, store }
    }

    /// Whether the newest incoming message of the conversation is unacknowledged.
    ///
    /// A conversation with no incoming messages is read.
    pub async fn is_unread(&self, conversation: &Conversation) -> Result<bool> {
        let query = MessageQuery::between(
            &conversation.counterparty,
            &conversation.owned_address,
            NEWEST_ONLY_PAGE_SIZE,
        );
        let page = self.provider.fetch_messages(&query, None).await?;

        let Some(newest) = page.messages.first() else {
            return Ok(false);
        };
        let seen = self.store.last_seen(&conversation.id);
        Ok(seen.as_deref() != Some(newest.id.as_str()))
    }

    /// Unread state for each conversation, in input order.
    ///
    /// Issues one provider query per conversation, all concurrently.
    pub async fn compute_unread(&self, conversations: &[Conversation]) -> Result<Vec<bool>> {
        try_join_all(conversations.iter().map(|c| self.is_unread(c))).await
    }

    /// Record `message_id` as the last incoming message the user has seen.
    pub fn acknowledge(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        self.store.mark_seen(conversation_id, message_id)
    }

    /// Acknowledge the newest incoming message among `messages`, if any.
    pub fn acknowledge_thread(&self, conversation_id: &str, messages: &[Message]) -> Result<()> {
        let newest_incoming = messages
            .iter()
            .filter(|m| m.is_incoming())
            .max_by_key(|m| m.sent_at);

        match newest_incoming {
            Some(msg) => self.acknowledge(conversation_id, &msg.id),
            None => Ok(()),
        }
    }
}
