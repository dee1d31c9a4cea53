//! The visible conversation list and its session bookkeeping.

use std::collections::HashSet;

use sms_provider::{canonicalize_address, conversation_id};

use crate::conversations::aggregate::{AggregationState, ConversationPage, SessionId, SessionKey};
use crate::conversations::{Conversation, ConversationBook, FoldOutcome};
use crate::poller::ActivityEvent;

/// Outcome of offering a page to the inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    Applied { added: usize },
    /// The page belongs to a superseded session and was dropped.
    Stale,
}

/// Conversation list for the current session.
///
/// Starting a session (new active address or filters) clears the list and
/// invalidates pages still in flight for the previous one.
#[derive(Debug, Default)]
pub struct Inbox {
    book: ConversationBook,
    session: Option<SessionId>,
    key: Option<SessionKey>,
    last_session: u64,
    has_more: bool,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_session(&mut self, key: SessionKey) -> AggregationState {
        self.last_session += 1;
        let session = SessionId(self.last_session);

        self.book.clear();
        self.session = Some(session);
        self.key = Some(key.clone());
        self.has_more = true;

        tracing::debug!("Started session {:?} for {}", session, key.active_address);
        AggregationState::new(session, key)
    }

    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    pub fn key(&self) -> Option<&SessionKey> {
        self.key.as_ref()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn accept_page(&mut self, page: ConversationPage) -> Acceptance {
        if self.session != Some(page.session) {
            tracing::debug!(
                "Dropping page from stale session {:?} (current: {:?})",
                page.session,
                self.session
            );
            return Acceptance::Stale;
        }

        let mut added = 0;
        for conversation in page.conversations {
            match self.book.get(&conversation.id) {
                // Live activity already put a newer summary here
                Some(existing) if existing.recent.sent_at > conversation.recent.sent_at => {}
                Some(_) => self.book.upsert(conversation),
                None => {
                    self.book.upsert(conversation);
                    added += 1;
                }
            }
        }
        self.has_more = page.has_more;
        Acceptance::Applied { added }
    }

    /// Fold live activity into the list.
    ///
    /// Messages for other addresses or outside the current search are
    /// ignored. Returns `None` when nothing was folded; a resync also returns
    /// `None` and the caller is expected to start a new session.
    pub fn apply_activity(&mut self, event: &ActivityEvent) -> Option<FoldOutcome> {
        let ActivityEvent::Message(msg) = event else {
            return None;
        };
        let key = self.key.as_ref()?;

        if msg.owned_address() != key.active_address {
            return None;
        }
        if let Some(search) = &key.filters.search {
            if canonicalize_address(search) != msg.counterparty() {
                return None;
            }
        }
        let id = conversation_id(msg.owned_address(), msg.counterparty());
        if key.filters.only_unread && !msg.is_incoming() && !self.book.contains(&id) {
            return None;
        }

        Some(self.book.fold(msg))
    }

    /// Clear the unread mark of a conversation. Returns false if unknown.
    pub fn mark_read(&mut self, id: &str) -> bool {
        let Some(mut conversation) = self.book.get(id).cloned() else {
            return false;
        };
        conversation.has_unread = false;
        self.book.upsert(conversation);
        true
    }

    pub fn replace(&mut self, conversation: Conversation) {
        self.book.upsert(conversation);
    }

    /// Ids already shown; passed to the aggregator so they are not surfaced again.
    pub fn known_ids(&self) -> HashSet<String> {
        self.book.ids().map(str::to_string).collect()
    }

    /// Conversations in display order.
    pub fn conversations(&self) -> Vec<&Conversation> {
        self.book.sorted()
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.book.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::aggregate::Filters;
    use crate::test_support::{incoming, outgoing};

    fn page(session: SessionId, convs: Vec<Conversation>, has_more: bool) -> ConversationPage {
        ConversationPage {
            session,
            conversations: convs,
            has_more,
        }
    }

    #[test]
    fn test_stale_page_is_dropped() {
        let mut inbox = Inbox::new();
        let old = inbox.begin_session(SessionKey::new("+1000"));
        let current = inbox.begin_session(SessionKey::new("+3000"));
        assert!(current.session() > old.session());

        let conv = Conversation::from_message(&incoming("i1", "+2001", "+1000", 1));
        assert_eq!(
            inbox.accept_page(page(old.session(), vec![conv.clone()], false)),
            Acceptance::Stale
        );
        assert!(inbox.conversations().is_empty());
        assert!(inbox.has_more());

        let conv = Conversation::from_message(&incoming("i2", "+2001", "+3000", 2));
        assert_eq!(
            inbox.accept_page(page(current.session(), vec![conv], false)),
            Acceptance::Applied { added: 1 }
        );
        assert!(!inbox.has_more());
    }

    #[test]
    fn test_activity_folds_into_list() {
        let mut inbox = Inbox::new();
        let state = inbox.begin_session(SessionKey::new("+1000"));
        let mut conv = Conversation::from_message(&outgoing("o1", "+1000", "+2001", 1));
        conv.has_unread = false;
        inbox.accept_page(page(state.session(), vec![conv], true));

        let event = ActivityEvent::Message(incoming("i1", "+2001", "+1000", 5));
        assert_eq!(inbox.apply_activity(&event), Some(FoldOutcome::Updated));
        let conv = inbox.get("+1000+2001").unwrap();
        assert_eq!(conv.recent.id, "i1");
        assert!(conv.has_unread);

        // Other address
        let event = ActivityEvent::Message(incoming("x1", "+2001", "+3000", 6));
        assert_eq!(inbox.apply_activity(&event), None);

        let event = ActivityEvent::Resynced(incoming("i9", "+2001", "+1000", 9));
        assert_eq!(inbox.apply_activity(&event), None);

        assert!(inbox.mark_read("+1000+2001"));
        assert!(!inbox.get("+1000+2001").unwrap().has_unread);
        assert!(!inbox.mark_read("+1000+9999"));
    }

    #[test]
    fn test_older_page_does_not_overwrite_activity() {
        let mut inbox = Inbox::new();
        let state = inbox.begin_session(SessionKey::new("+1000"));
        inbox.apply_activity(&ActivityEvent::Message(incoming("i5", "+2001", "+1000", 5)));

        let older = Conversation::from_message(&incoming("i1", "+2001", "+1000", 1));
        assert_eq!(
            inbox.accept_page(page(state.session(), vec![older], true)),
            Acceptance::Applied { added: 0 }
        );
        assert_eq!(inbox.get("+1000+2001").unwrap().recent.id, "i5");
        assert!(inbox.known_ids().contains("+1000+2001"));
    }

    #[test]
    fn test_activity_respects_search() {
        let mut inbox = Inbox::new();
        inbox.begin_session(SessionKey::new("+1000").with_filters(Filters {
            search: Some("+20 01".to_string()),
            only_unread: false,
        }));

        let other = ActivityEvent::Message(incoming("i1", "+2002", "+1000", 1));
        assert_eq!(inbox.apply_activity(&other), None);

        let matching = ActivityEvent::Message(incoming("i2", "+2001", "+1000", 2));
        assert_eq!(inbox.apply_activity(&matching), Some(FoldOutcome::Created));
    }
}
