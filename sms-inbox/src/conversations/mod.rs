//! Conversation records and the in-memory conversation book.
//!
//! A conversation is the pair (owned address, counterparty) plus a summary
//! of its most recent message. The provider has no conversation resource,
//! so conversations are folded out of the directional message feeds.

pub mod aggregate;
pub mod merge;
pub mod search;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sms_provider::{conversation_id, Direction, Message};

/// Summary of the newest known message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentMessage {
    pub id: String,
    pub sent_at: DateTime<Utc>,
    pub body: String,
    pub direction: Direction,
}

impl From<&Message> for RecentMessage {
    fn from(msg: &Message) -> Self {
        Self {
            id: msg.id.clone(),
            sent_at: msg.sent_at,
            body: msg.body.clone(),
            direction: msg.direction,
        }
    }
}

/// Moderation flag attached by the overlay backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagStatus {
    pub is_flagged: bool,
    pub reason: Option<String>,
    /// The message that triggered the flag.
    pub sample: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub owned_address: String,
    pub counterparty: String,
    pub recent: RecentMessage,
    pub has_unread: bool,
    pub flag: Option<FlagStatus>,
}

impl Conversation {
    /// Conversation as seen from a single message.
    ///
    /// Unread state starts out false; it is computed separately.
    pub fn from_message(msg: &Message) -> Self {
        Self {
            id: conversation_id(msg.owned_address(), msg.counterparty()),
            owned_address: msg.owned_address().to_string(),
            counterparty: msg.counterparty().to_string(),
            recent: RecentMessage::from(msg),
            has_unread: false,
            flag: None,
        }
    }

    pub fn is_flagged(&self) -> bool {
        self.flag.as_ref().is_some_and(|f| f.is_flagged)
    }
}

/// Result of folding one message into a [`ConversationBook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Conversations keyed by id. Entries are replaced whole, never deleted.
#[derive(Debug, Clone, Default)]
pub struct ConversationBook {
    entries: HashMap<String, Conversation>,
}

impl ConversationBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a message into the book.
    ///
    /// Only a strictly newer message replaces a conversation's summary, so
    /// folding the same message twice is a no-op. An incoming message marks
    /// the conversation unread; an outgoing one keeps the previous state.
    pub fn fold(&mut self, msg: &Message) -> FoldOutcome {
        let mut conversation = Conversation::from_message(msg);

        match self.entries.get(&conversation.id) {
            None => {
                conversation.has_unread = msg.is_incoming();
                self.entries.insert(conversation.id.clone(), conversation);
                FoldOutcome::Created
            }
            Some(existing) if msg.sent_at > existing.recent.sent_at => {
                conversation.has_unread = msg.is_incoming() || existing.has_unread;
                conversation.flag = existing.flag.clone();
                self.entries.insert(conversation.id.clone(), conversation);
                FoldOutcome::Updated
            }
            Some(_) => FoldOutcome::Unchanged,
        }
    }

    /// Replace (or insert) a conversation wholesale.
    pub fn upsert(&mut self, conversation: Conversation) {
        self.entries.insert(conversation.id.clone(), conversation);
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Display order: flagged first, then most recent first.
    pub fn sorted(&self) -> Vec<&Conversation> {
        let mut list: Vec<&Conversation> = self.entries.values().collect();
        list.sort_by(|a, b| {
            b.is_flagged()
                .cmp(&a.is_flagged())
                .then_with(|| b.recent.sent_at.cmp(&a.recent.sent_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{incoming, outgoing};

    #[test]
    fn test_conversation_from_message() {
        let conv = Conversation::from_message(&outgoing("o1", "+1000", "+2001", 4));
        assert_eq!(conv.id, "+1000+2001");
        assert_eq!(conv.owned_address, "+1000");
        assert_eq!(conv.counterparty, "+2001");
        assert_eq!(conv.recent.id, "o1");

        let conv = Conversation::from_message(&incoming("i1", "+2001", "+1000", 5));
        assert_eq!(conv.id, "+1000+2001");
    }

    #[test]
    fn test_fold_is_idempotent() {
        let mut book = ConversationBook::new();
        let msg = incoming("i1", "+2001", "+1000", 5);

        assert_eq!(book.fold(&msg), FoldOutcome::Created);
        let snapshot = book.get("+1000+2001").cloned();
        assert_eq!(book.fold(&msg), FoldOutcome::Unchanged);
        assert_eq!(book.get("+1000+2001").cloned(), snapshot);
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_fold_only_newer_replaces() {
        let mut book = ConversationBook::new();
        book.fold(&incoming("i1", "+2001", "+1000", 5));

        assert_eq!(
            book.fold(&outgoing("o1", "+1000", "+2001", 4)),
            FoldOutcome::Unchanged
        );
        assert_eq!(book.get("+1000+2001").unwrap().recent.id, "i1");

        assert_eq!(
            book.fold(&outgoing("o2", "+1000", "+2001", 6)),
            FoldOutcome::Updated
        );
        let conv = book.get("+1000+2001").unwrap();
        assert_eq!(conv.recent.id, "o2");
        // Replying does not clear unread
        assert!(conv.has_unread);
    }

    #[test]
    fn test_outgoing_keeps_read_state() {
        let mut book = ConversationBook::new();
        book.fold(&outgoing("o1", "+1000", "+2001", 1));
        assert!(!book.get("+1000+2001").unwrap().has_unread);

        book.fold(&outgoing("o2", "+1000", "+2001", 2));
        assert!(!book.get("+1000+2001").unwrap().has_unread);

        book.fold(&incoming("i1", "+2001", "+1000", 3));
        assert!(book.get("+1000+2001").unwrap().has_unread);
    }

    #[test]
    fn test_sorted_flagged_first() {
        let mut book = ConversationBook::new();
        book.fold(&incoming("a", "+2001", "+1000", 10));
        book.fold(&incoming("b", "+2002", "+1000", 30));
        book.fold(&incoming("c", "+2003", "+1000", 20));

        let mut flagged = book.get("+1000+2001").cloned().unwrap();
        flagged.flag = Some(FlagStatus {
            is_flagged: true,
            reason: Some("spam".to_string()),
            sample: None,
        });
        book.upsert(flagged);

        let order: Vec<_> = book.sorted().iter().map(|c| c.counterparty.clone()).collect();
        assert_eq!(order, vec!["+2001", "+2002", "+2003"]);
    }
}
