//! Message history of a single conversation.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use futures_util::stream::{self, Stream};
use sms_provider::{canonicalize_address, conversation_id, Message, MessageProvider, MessageQuery};

use crate::conversations::merge::{merge_feeds, UpperBound};
use crate::error::Result;
use crate::poller::Clock;
use crate::unread::UnreadTracker;

/// Fetch the most recent messages exchanged between `active_address` and
/// `counterparty`, oldest first.
///
/// Up to `page_size` messages are read in each direction; the merged result
/// is trimmed to the newest `page_size`.
pub async fn fetch_thread(
    provider: &Arc<dyn MessageProvider>,
    active_address: &str,
    counterparty: &str,
    page_size: u32,
) -> Result<Vec<Message>> {
    let counterparty = canonicalize_address(counterparty);
    let received = MessageQuery::between(&counterparty, active_address, page_size);
    let sent = MessageQuery::between(active_address, &counterparty, page_size);

    let (received, sent) = tokio::try_join!(
        provider.fetch_messages(&received, None),
        provider.fetch_messages(&sent, None),
    )?;

    let mut thread: Vec<Message> = merge_feeds(
        &received.messages,
        &sent.messages,
        None,
        UpperBound::Unbounded,
    )
    .into_iter()
    .take(page_size.max(1) as usize)
    .cloned()
    .collect();
    thread.reverse();

    tracing::debug!(
        "Loaded {} message(s) between {} and {}",
        thread.len(),
        active_address,
        counterparty
    );
    Ok(thread)
}

/// An open conversation kept current by repeated refreshes.
///
/// Each refresh moves the last-seen marker to the newest incoming message,
/// so a thread the user is looking at never turns unread.
pub struct ThreadWatcher {
    provider: Arc<dyn MessageProvider>,
    tracker: UnreadTracker,
    active_address: String,
    counterparty: String,
    conversation_id: String,
    page_size: u32,
    /// Ids in the window returned by the previous refresh.
    shown: HashSet<String>,
}

impl ThreadWatcher {
    pub fn new(
        provider: Arc<dyn MessageProvider>,
        tracker: UnreadTracker,
        active_address: impl Into<String>,
        counterparty: &str,
        page_size: u32,
    ) -> Self {
        let active_address = active_address.into();
        let counterparty = canonicalize_address(counterparty);
        Self {
            conversation_id: conversation_id(&active_address, &counterparty),
            provider,
            tracker,
            active_address,
            counterparty,
            page_size,
            shown: HashSet::new(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Refetch the thread and return messages not returned before, oldest
    /// first. The first refresh returns the whole window.
    pub async fn refresh(&mut self) -> Result<Vec<Message>> {
        let thread = fetch_thread(
            &self.provider,
            &self.active_address,
            &self.counterparty,
            self.page_size,
        )
        .await?;

        let fresh: Vec<Message> = thread
            .iter()
            .filter(|m| !self.shown.contains(&m.id))
            .cloned()
            .collect();
        if fresh.iter().any(Message::is_incoming) {
            self.tracker.acknowledge_thread(&self.conversation_id, &fresh)?;
        }

        self.shown = thread.into_iter().map(|m| m.id).collect();
        Ok(fresh)
    }
}

/// Stream of messages arriving in a watched thread, refreshed on every
/// clock tick. Failed refreshes are logged and skipped.
pub fn watch_thread<C: Clock + 'static>(
    watcher: ThreadWatcher,
    clock: C,
) -> impl Stream<Item = Message> + Send {
    let queue: VecDeque<Message> = VecDeque::new();

    stream::unfold((watcher, clock, queue), |(mut watcher, mut clock, mut queue)| async move {
        loop {
            if let Some(msg) = queue.pop_front() {
                return Some((msg, (watcher, clock, queue)));
            }
            if !clock.tick().await {
                return None;
            }
            match watcher.refresh().await {
                Ok(fresh) => queue.extend(fresh),
                Err(err) => tracing::warn!(?err, "Refreshing {} failed", watcher.conversation_id),
            }
        }
    })
}
