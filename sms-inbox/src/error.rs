//! Error type for inbox operations.

use sms_provider::ProviderError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, InboxError>;

#[derive(Debug, Error)]
pub enum InboxError {
    /// Network or provider failure. Never retried internally; the caller
    /// decides between showing stale data and an error state.
    #[error("transient fetch failure: {0}")]
    TransientFetch(#[from] ProviderError),

    /// `next_page` was called on a page without a continuation token.
    #[error("feed has no further pages")]
    FeedExhausted,

    /// The poller walked its page budget without reaching the last known message.
    #[error("catch-up walk exceeded {pages} page(s) without reaching message {last_known}")]
    CatchUpOverflow { last_known: String, pages: usize },

    #[error("flag overlay unavailable: {0}")]
    FlagOverlay(String),

    #[error("local storage failed: {0}")]
    Storage(#[from] std::io::Error),

    #[error("failed to encode local state: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl InboxError {
    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, InboxError::TransientFetch(e) if e.is_transient())
    }
}
