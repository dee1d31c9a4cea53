//! Conversation inbox over directional SMS/WhatsApp message feeds.
//!
//! The provider only offers "messages sent by X" and "messages received by X"
//! feeds. This crate merges them into a paginated list of conversations with
//! unread and moderation state, and polls for new activity.

pub mod client;
pub mod config;
pub mod constants;
pub mod conversations;
pub mod error;
pub mod feed;
pub mod flags;
pub mod inbox;
pub mod poller;
pub mod thread;
pub mod unread;

#[cfg(test)]
mod test_support;

pub use client::{ClientSettings, InboxClient};
pub use config::Config;
pub use conversations::aggregate::{
    AggregationState, ConversationAggregator, ConversationPage, Filters, SessionId, SessionKey,
};
pub use conversations::{Conversation, ConversationBook, FlagStatus, FoldOutcome, RecentMessage};
pub use error::{InboxError, Result};
pub use flags::{FlagOverlayMerger, FlagRecord, FlagSource, HttpFlagSource};
pub use inbox::{Acceptance, Inbox};
pub use poller::{activity_subscription, ActivityEvent, ActivityPoller, Clock, IntervalClock};
pub use thread::{watch_thread, ThreadWatcher};
pub use unread::{JsonFileStore, LastSeenStore, MemoryStore, UnreadTracker};
