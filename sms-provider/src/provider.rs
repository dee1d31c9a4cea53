//! The provider seam used by the inbox engine.

use async_trait::async_trait;

use crate::error::Result;
use crate::message::Message;

/// Filter for one directional feed query.
///
/// `from` selects messages sent by an address, `to` messages received by it.
/// Both may be set to narrow the feed to a single pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub page_size: u32,
}

impl MessageQuery {
    /// Messages sent by `address`.
    pub fn sent_by(address: &str, page_size: u32) -> Self {
        Self {
            from: Some(address.to_string()),
            to: None,
            page_size,
        }
    }

    /// Messages received by `address`.
    pub fn received_by(address: &str, page_size: u32) -> Self {
        Self {
            from: None,
            to: Some(address.to_string()),
            page_size,
        }
    }

    /// Messages sent by `from` to `to`.
    pub fn between(from: &str, to: &str, page_size: u32) -> Self {
        Self {
            from: Some(from.to_string()),
            to: Some(to.to_string()),
            page_size,
        }
    }
}

/// One page of a feed, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    /// Continuation token; `None` when the feed is exhausted.
    pub next_cursor: Option<String>,
}

/// Remote messaging provider.
#[async_trait]
pub trait MessageProvider: Send + Sync {
    /// Fetch one page of the feed described by `query`.
    ///
    /// `cursor` is the `next_cursor` of the previous page, or `None` for the
    /// first page.
    async fn fetch_messages(&self, query: &MessageQuery, cursor: Option<&str>)
        -> Result<MessagePage>;

    /// Addresses owned by the account.
    async fn list_addresses(&self) -> Result<Vec<String>>;

    /// Send a text message; returns the provider's message id once accepted.
    async fn send_message(&self, from: &str, to: &str, body: &str) -> Result<String>;
}
