//! Incremental aggregation of the two directional feeds into conversations.
//!
//! Each call to [`ConversationAggregator::load_more`] surfaces up to one page
//! of conversations the session has not returned yet, walking backwards in
//! time through both feeds. The walk works on a window `[cutoff, boundary]`:
//!
//! - `boundary` is the send time of the oldest message already processed
//!   (inclusive, so messages sharing that instant are never skipped);
//! - `cutoff` is the newest page tail among feeds that still have pages left.
//!   Everything at or after it is already loaded in both feeds, so the window
//!   can be folded without missing a message.
//!
//! Once a window is fully consumed the feeds whose tail sits on the cutoff are
//! advanced and the window slides down. The set of surfaced conversation ids
//! keeps a conversation from being returned twice in one session.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sms_provider::{conversation_id, Message, MessageProvider, MessageQuery};

use super::merge::{merge_feeds, UpperBound};
use super::search::find_conversation;
use super::Conversation;
use crate::error::Result;
use crate::feed::{fetch_first_page, Page};
use crate::unread::UnreadTracker;

/// Identifies one aggregation session. Increases monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters {
    /// Counterparty to look up directly instead of aggregating.
    pub search: Option<String>,
    pub only_unread: bool,
}

/// What a session is aggregating. Changing any part starts a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKey {
    pub active_address: String,
    pub filters: Filters,
}

impl SessionKey {
    pub fn new(active_address: impl Into<String>) -> Self {
        Self {
            active_address: active_address.into(),
            filters: Filters::default(),
        }
    }

    pub fn with_filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }
}

#[derive(Debug, Clone)]
struct Cursors {
    incoming: Page,
    outgoing: Page,
}

/// Feeds to advance before the next window is folded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PendingAdvance {
    incoming: bool,
    outgoing: bool,
}

impl PendingAdvance {
    fn any(self) -> bool {
        self.incoming || self.outgoing
    }
}

/// Resumable aggregation state. Owned by the caller and passed back in on
/// every call of the same session.
#[derive(Debug, Clone)]
pub struct AggregationState {
    session: SessionId,
    key: SessionKey,
    cursors: Option<Cursors>,
    boundary: Option<DateTime<Utc>>,
    pending: PendingAdvance,
    surfaced: HashSet<String>,
    exhausted: bool,
}

impl AggregationState {
    pub fn new(session: SessionId, key: SessionKey) -> Self {
        Self {
            session,
            key,
            cursors: None,
            boundary: None,
            pending: PendingAdvance::default(),
            surfaced: HashSet::new(),
            exhausted: false,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Send time of the oldest message processed so far.
    pub fn boundary(&self) -> Option<DateTime<Utc>> {
        self.boundary
    }

    /// True until the session has provably returned every conversation.
    pub fn has_more(&self) -> bool {
        !self.exhausted
    }

    /// Whether `id` was already returned in this session.
    pub fn surfaced(&self, id: &str) -> bool {
        self.surfaced.contains(id)
    }

    fn seen(&self, existing: &HashSet<String>, msg: &Message) -> bool {
        let id = conversation_id(msg.owned_address(), msg.counterparty());
        self.surfaced.contains(&id) || existing.contains(&id)
    }
}

/// One page of newly surfaced conversations.
#[derive(Debug, Clone)]
pub struct ConversationPage {
    pub session: SessionId,
    pub conversations: Vec<Conversation>,
    pub has_more: bool,
}

/// Newest page tail among feeds that still have pages left.
fn live_cutoff(incoming: &Page, outgoing: &Page) -> Option<DateTime<Utc>> {
    [incoming, outgoing]
        .into_iter()
        .filter(|page| page.has_more())
        .filter_map(Page::oldest)
        .max()
}

async fn advance_if(page: &Page, needed: bool) -> Option<Result<Page>> {
    if needed {
        Some(page.next_page().await)
    } else {
        None
    }
}

fn apply_advance(result: Option<Result<Page>>, page: &mut Page, pending: &mut bool) -> Result<()> {
    match result {
        Some(Ok(next)) => {
            *page = next;
            *pending = false;
            Ok(())
        }
        Some(Err(err)) => Err(err),
        None => Ok(()),
    }
}

#[derive(Clone)]
pub struct ConversationAggregator {
    provider: Arc<dyn MessageProvider>,
    tracker: UnreadTracker,
    page_size: usize,
    feed_page_size: u32,
}

impl ConversationAggregator {
    pub fn new(
        provider: Arc<dyn MessageProvider>,
        tracker: UnreadTracker,
        page_size: usize,
        feed_page_size: u32,
    ) -> Self {
        Self {
            provider,
            tracker,
            page_size: page_size.max(1),
            feed_page_size: feed_page_size.max(1),
        }
    }

    /// Surface the next page of conversations for the session in `state`.
    ///
    /// Conversations whose id is in `existing` (already shown by the caller)
    /// are skipped. If a fetch fails after some conversations were collected,
    /// those are returned and the state stays valid for a retry; a failure
    /// before anything was collected is returned as an error.
    pub async fn load_more(
        &self,
        state: &mut AggregationState,
        existing: &HashSet<String>,
    ) -> Result<ConversationPage> {
        if state.exhausted {
            return Ok(self.finish(state, Vec::new()));
        }

        if let Some(search) = state.key.filters.search.clone() {
            return self.load_search(state, existing, &search).await;
        }

        if state.cursors.is_none() {
            state.cursors = Some(self.initialize(&state.key.active_address).await?);
        }

        let mut collected: Vec<Conversation> = Vec::new();
        while collected.len() < self.page_size && !state.exhausted {
            if let Err(err) = self.prepare(state).await {
                if collected.is_empty() {
                    return Err(err);
                }
                tracing::warn!(?err, "Feed fetch failed, returning {} conversation(s)", collected.len());
                break;
            }

            let snapshot = (state.boundary, state.exhausted, state.pending);
            let batch = self.fold_window(state, existing, self.page_size - collected.len());
            if batch.is_empty() {
                continue;
            }

            match self.retain_unread(&state.key, batch.clone()).await {
                Ok(kept) => collected.extend(kept),
                Err(err) => {
                    // Put the batch back so a retry folds it again
                    for conversation in &batch {
                        state.surfaced.remove(&conversation.id);
                    }
                    (state.boundary, state.exhausted, state.pending) = snapshot;

                    if collected.is_empty() {
                        return Err(err);
                    }
                    tracing::warn!(?err, "Unread lookup failed, returning {} conversation(s)", collected.len());
                    break;
                }
            }
        }

        tracing::info!(
            "Loaded {} conversation(s) for {} (more: {})",
            collected.len(),
            state.key.active_address,
            state.has_more()
        );
        Ok(self.finish(state, collected))
    }

    async fn initialize(&self, active_address: &str) -> Result<Cursors> {
        let (incoming, outgoing) = tokio::try_join!(
            fetch_first_page(
                &self.provider,
                MessageQuery::received_by(active_address, self.feed_page_size)
            ),
            fetch_first_page(
                &self.provider,
                MessageQuery::sent_by(active_address, self.feed_page_size)
            ),
        )?;
        tracing::debug!(
            "Initialized feeds for {}: {} incoming, {} outgoing",
            active_address,
            incoming.items().len(),
            outgoing.items().len()
        );
        Ok(Cursors { incoming, outgoing })
    }

    /// Advance feeds left pending by the last consumed window, then skip
    /// over empty pages that still have a continuation.
    async fn prepare(&self, state: &mut AggregationState) -> Result<()> {
        let Some(cursors) = state.cursors.as_mut() else {
            return Ok(());
        };
        let pending = &mut state.pending;

        if pending.any() {
            let (incoming, outgoing) = tokio::join!(
                advance_if(&cursors.incoming, pending.incoming),
                advance_if(&cursors.outgoing, pending.outgoing),
            );
            let incoming = apply_advance(incoming, &mut cursors.incoming, &mut pending.incoming);
            let outgoing = apply_advance(outgoing, &mut cursors.outgoing, &mut pending.outgoing);
            incoming.and(outgoing)?;
        }

        while cursors.incoming.items().is_empty() && cursors.incoming.has_more() {
            cursors.incoming = cursors.incoming.next_page().await?;
        }
        while cursors.outgoing.items().is_empty() && cursors.outgoing.has_more() {
            cursors.outgoing = cursors.outgoing.next_page().await?;
        }
        Ok(())
    }

    /// Fold the current window, surfacing at most `wanted` new conversations.
    fn fold_window(
        &self,
        state: &mut AggregationState,
        existing: &HashSet<String>,
        wanted: usize,
    ) -> Vec<Conversation> {
        let Some(cursors) = state.cursors.as_ref() else {
            return Vec::new();
        };

        let cutoff = live_cutoff(&cursors.incoming, &cursors.outgoing);
        let upper = state
            .boundary
            .map_or(UpperBound::Unbounded, UpperBound::AtOrBefore);
        let merged = merge_feeds(
            cursors.incoming.items(),
            cursors.outgoing.items(),
            cutoff,
            upper,
        );

        let mut batch = Vec::new();
        for (idx, msg) in merged.iter().enumerate() {
            if state.seen(existing, msg) {
                continue;
            }

            let conversation = Conversation::from_message(msg);
            state.surfaced.insert(conversation.id.clone());
            batch.push(conversation);

            if batch.len() == wanted {
                state.boundary = Some(msg.sent_at);
                if cutoff.is_none() && merged[idx + 1..].iter().all(|m| state.seen(existing, m)) {
                    state.exhausted = true;
                }
                tracing::debug!("Page filled at {} (cutoff: {:?})", msg.sent_at, cutoff);
                return batch;
            }
        }

        match cutoff {
            None => state.exhausted = true,
            Some(cutoff) => {
                state.boundary = Some(cutoff);
                state.pending = PendingAdvance {
                    incoming: cursors.incoming.has_more()
                        && cursors.incoming.oldest() == Some(cutoff),
                    outgoing: cursors.outgoing.has_more()
                        && cursors.outgoing.oldest() == Some(cutoff),
                };
            }
        }
        tracing::debug!(
            "Window consumed with {} new conversation(s), boundary now {:?}",
            batch.len(),
            state.boundary
        );
        batch
    }

    /// Fill in unread state; with the unread filter on, drop read conversations.
    async fn retain_unread(
        &self,
        key: &SessionKey,
        mut batch: Vec<Conversation>,
    ) -> Result<Vec<Conversation>> {
        let unread = self.tracker.compute_unread(&batch).await?;
        for (conversation, is_unread) in batch.iter_mut().zip(unread) {
            conversation.has_unread = is_unread;
        }
        if key.filters.only_unread {
            batch.retain(|c| c.has_unread);
        }
        Ok(batch)
    }

    async fn load_search(
        &self,
        state: &mut AggregationState,
        existing: &HashSet<String>,
        counterparty: &str,
    ) -> Result<ConversationPage> {
        let found = find_conversation(&self.provider, &state.key.active_address, counterparty)
            .await?
            .filter(|c| !state.surfaced.contains(&c.id) && !existing.contains(&c.id));

        let conversations = match found {
            Some(conversation) => self.retain_unread(&state.key, vec![conversation]).await?,
            None => Vec::new(),
        };

        state
            .surfaced
            .extend(conversations.iter().map(|c| c.id.clone()));
        state.exhausted = true;
        Ok(self.finish(state, conversations))
    }

    fn finish(&self, state: &AggregationState, conversations: Vec<Conversation>) -> ConversationPage {
        ConversationPage {
            session: state.session,
            conversations,
            has_more: state.has_more(),
        }
    }
}
