//! Direct lookup of a single conversation by counterparty.

use std::sync::Arc;

use sms_provider::{canonicalize_address, MessageProvider, MessageQuery};

use super::merge::newest_of;
use super::Conversation;
use crate::constants::conversations::NEWEST_ONLY_PAGE_SIZE;
use crate::error::Result;

/// Find the conversation between `active_address` and `counterparty`.
///
/// Fetches the single newest message in each direction for the pair and
/// keeps the newer one. Returns `None` when the pair never exchanged a message.
pub async fn find_conversation(
    provider: &Arc<dyn MessageProvider>,
    active_address: &str,
    counterparty: &str,
) -> Result<Option<Conversation>> {
    let counterparty = canonicalize_address(counterparty);

    let received = MessageQuery::between(&counterparty, active_address, NEWEST_ONLY_PAGE_SIZE);
    let sent = MessageQuery::between(active_address, &counterparty, NEWEST_ONLY_PAGE_SIZE);

    let (received, sent) = tokio::try_join!(
        provider.fetch_messages(&received, None),
        provider.fetch_messages(&sent, None),
    )?;

    let found = newest_of(received.messages.first(), sent.messages.first())
        .map(Conversation::from_message);
    tracing::debug!(
        "Search for {} on {}: {}",
        counterparty,
        active_address,
        if found.is_some() { "found" } else { "no messages" }
    );
    Ok(found)
}
