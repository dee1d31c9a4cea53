//! Cursor-paginated access to one directional message feed.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sms_provider::{Message, MessageProvider, MessageQuery};

use crate::error::{InboxError, Result};

/// The most recently fetched page of a feed plus its continuation token.
///
/// Items are newest-first, as the provider returns them.
#[derive(Clone)]
pub struct Page {
    provider: Arc<dyn MessageProvider>,
    query: MessageQuery,
    items: Vec<Message>,
    next_cursor: Option<String>,
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("query", &self.query)
            .field("items", &self.items.len())
            .field("next_cursor", &self.next_cursor)
            .finish()
    }
}

/// Fetch the newest page of the feed described by `query`.
pub async fn fetch_first_page(
    provider: &Arc<dyn MessageProvider>,
    query: MessageQuery,
) -> Result<Page> {
    let page = provider.fetch_messages(&query, None).await?;
    Ok(Page {
        provider: Arc::clone(provider),
        query,
        items: page.messages,
        next_cursor: page.next_cursor,
    })
}

impl Page {
    pub fn items(&self) -> &[Message] {
        &self.items
    }

    pub fn query(&self) -> &MessageQuery {
        &self.query
    }

    pub fn has_more(&self) -> bool {
        self.next_cursor.is_some()
    }

    /// Fetch the page that follows this one.
    ///
    /// Provider failures surface as [`InboxError::TransientFetch`] and are
    /// never retried here.
    pub async fn next_page(&self) -> Result<Page> {
        let Some(cursor) = self.next_cursor.as_deref() else {
            return Err(InboxError::FeedExhausted);
        };

        let page = self.provider.fetch_messages(&self.query, Some(cursor)).await?;
        tracing::debug!(
            "Advanced feed (from: {:?}, to: {:?}) by {} message(s)",
            self.query.from,
            self.query.to,
            page.messages.len()
        );

        Ok(Page {
            provider: Arc::clone(&self.provider),
            query: self.query.clone(),
            items: page.messages,
            next_cursor: page.next_cursor,
        })
    }

    /// Send time of the page's last (oldest) item.
    pub fn oldest(&self) -> Option<DateTime<Utc>> {
        self.items.last().map(|m| m.sent_at)
    }

    /// Send time of the page's first (newest) item.
    pub fn newest(&self) -> Option<DateTime<Utc>> {
        self.items.first().map(|m| m.sent_at)
    }
}
