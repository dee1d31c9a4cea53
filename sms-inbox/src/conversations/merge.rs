//! Merging the incoming and outgoing feeds into one timeline.

use chrono::{DateTime, Utc};
use sms_provider::Message;

/// Upper edge of a merge window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpperBound {
    Unbounded,
    /// Strictly older than the instant.
    Before(DateTime<Utc>),
    /// At or older than the instant.
    AtOrBefore(DateTime<Utc>),
}

impl UpperBound {
    fn admits(self, sent_at: DateTime<Utc>) -> bool {
        match self {
            UpperBound::Unbounded => true,
            UpperBound::Before(t) => sent_at < t,
            UpperBound::AtOrBefore(t) => sent_at <= t,
        }
    }
}

/// Which direction goes first when two messages share a send time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreak {
    IncomingFirst,
    OutgoingFirst,
}

/// Order applied to messages with identical timestamps.
pub const SAME_INSTANT_ORDER: TieBreak = TieBreak::IncomingFirst;

fn incoming_goes_first(incoming: &Message, outgoing: &Message) -> bool {
    match incoming.sent_at.cmp(&outgoing.sent_at) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => SAME_INSTANT_ORDER == TieBreak::IncomingFirst,
    }
}

/// Merge two newest-first lists into one newest-first list.
///
/// Only messages with `after_or_at <= sent_at` (when given) that satisfy
/// `upper` are kept. Runs in a single pass over both inputs.
pub fn merge_feeds<'a>(
    incoming: &'a [Message],
    outgoing: &'a [Message],
    after_or_at: Option<DateTime<Utc>>,
    upper: UpperBound,
) -> Vec<&'a Message> {
    let in_window = move |m: &&Message| {
        upper.admits(m.sent_at) && after_or_at.map_or(true, |lower| m.sent_at >= lower)
    };

    let mut inc = incoming.iter().filter(in_window).peekable();
    let mut out = outgoing.iter().filter(in_window).peekable();
    let mut merged = Vec::with_capacity(incoming.len() + outgoing.len());

    loop {
        let next = match (inc.peek(), out.peek()) {
            (Some(i), Some(o)) => {
                if incoming_goes_first(i, o) {
                    inc.next()
                } else {
                    out.next()
                }
            }
            (Some(_), None) => inc.next(),
            (None, Some(_)) => out.next(),
            (None, None) => break,
        };
        merged.extend(next);
    }

    merged
}

/// The newer of two optional messages, ties resolved like [`merge_feeds`].
pub fn newest_of<'a>(
    incoming: Option<&'a Message>,
    outgoing: Option<&'a Message>,
) -> Option<&'a Message> {
    match (incoming, outgoing) {
        (Some(i), Some(o)) => Some(if incoming_goes_first(i, o) { i } else { o }),
        (i, o) => i.or(o),
    }
}
