//! Polling for new activity on the active address.
//!
//! Each tick probes the newest message in both directions. When the newest
//! message changes, both feeds are walked back to the last known message so
//! that every intervening message is reported, oldest first, exactly once.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, Stream};
use sms_provider::{Message, MessageProvider, MessageQuery};
use tokio::sync::broadcast;
use tokio::time::{Interval, MissedTickBehavior};

use crate::constants::conversations::NEWEST_ONLY_PAGE_SIZE;
use crate::constants::polling::EVENT_CHANNEL_CAPACITY;
use crate::conversations::merge::{merge_feeds, newest_of, UpperBound};
use crate::error::{InboxError, Result};
use crate::feed::fetch_first_page;

/// Source of poll ticks.
#[async_trait]
pub trait Clock: Send {
    /// Wait for the next tick. Returns `false` once the clock has stopped.
    async fn tick(&mut self) -> bool;
}

/// Wall-clock ticks at a fixed period.
pub struct IntervalClock {
    interval: Interval,
}

impl IntervalClock {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        // A slow poll should not cause a burst of catch-up ticks
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl Clock for IntervalClock {
    async fn tick(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityEvent {
    /// A message sent or received since the previous poll.
    Message(Message),
    /// Too much activity to reconstruct; callers should reload from scratch.
    /// Carries the newest message at the time of the resync.
    Resynced(Message),
}

pub struct ActivityPoller {
    provider: Arc<dyn MessageProvider>,
    active_address: String,
    feed_page_size: u32,
    catch_up_page_limit: usize,
    primed: bool,
    last_known: Option<Message>,
    /// Ids already reported that share `last_known`'s send time.
    tip: HashSet<String>,
    events: broadcast::Sender<ActivityEvent>,
}

impl ActivityPoller {
    pub fn new(
        provider: Arc<dyn MessageProvider>,
        active_address: impl Into<String>,
        feed_page_size: u32,
        catch_up_page_limit: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            provider,
            active_address: active_address.into(),
            feed_page_size: feed_page_size.max(1),
            catch_up_page_limit: catch_up_page_limit.max(1),
            primed: false,
            last_known: None,
            tip: HashSet::new(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActivityEvent> {
        self.events.subscribe()
    }

    pub fn active_address(&self) -> &str {
        &self.active_address
    }

    pub fn last_known(&self) -> Option<&Message> {
        self.last_known.as_ref()
    }

    /// Record the current newest message without reporting anything.
    pub async fn prime(&mut self) -> Result<()> {
        let (received, sent) = self.fetch_heads().await?;
        let newest = newest_of(received.as_ref(), sent.as_ref()).cloned();
        let same_instant = match &newest {
            Some(newest) => self.fetch_same_instant(newest).await?,
            None => Vec::new(),
        };

        self.last_known = None;
        self.tip.clear();
        if let Some(newest) = newest {
            self.anchor(newest, &same_instant);
        }
        self.primed = true;
        tracing::debug!(
            "Activity poller primed for {} at {:?}",
            self.active_address,
            self.last_known.as_ref().map(|m| &m.id)
        );
        Ok(())
    }

    /// Run one poll cycle and return the events it produced.
    ///
    /// Events are also broadcast to subscribers.
    pub async fn poll_once(&mut self) -> Result<Vec<ActivityEvent>> {
        if !self.primed {
            self.prime().await?;
            return Ok(Vec::new());
        }

        let (received, sent) = self.fetch_heads().await?;
        let Some(latest) = newest_of(received.as_ref(), sent.as_ref()).cloned() else {
            return Ok(Vec::new());
        };
        if !received.iter().chain(sent.iter()).any(|m| self.is_new(m)) {
            return Ok(Vec::new());
        }

        let events = match self.catch_up().await {
            Ok(messages) => {
                let newest = messages.last().cloned().unwrap_or(latest);
                self.anchor(newest, &messages);
                messages.into_iter().map(ActivityEvent::Message).collect()
            }
            Err(InboxError::CatchUpOverflow { last_known, pages }) => {
                tracing::warn!(
                    "Missed too much activity since {} ({} page(s)), resyncing",
                    last_known,
                    pages
                );
                let same_instant = self.fetch_same_instant(&latest).await?;
                self.anchor(latest.clone(), &same_instant);
                vec![ActivityEvent::Resynced(latest)]
            }
            Err(err) => return Err(err),
        };

        if !events.is_empty() {
            tracing::info!("{} new activity event(s) on {}", events.len(), self.active_address);
        }
        for event in &events {
            // No receivers is fine; events are also returned
            let _ = self.events.send(event.clone());
        }
        Ok(events)
    }

    /// Poll on every clock tick until the clock stops. Failed cycles are
    /// logged and skipped.
    pub async fn run<C: Clock>(&mut self, mut clock: C) {
        while clock.tick().await {
            if let Err(err) = self.poll_once().await {
                tracing::warn!(?err, "Activity poll failed");
            }
        }
        tracing::debug!("Activity clock for {} stopped", self.active_address);
    }

    /// Whether a feed head has not been reported and is not older than the
    /// last known message.
    fn is_new(&self, msg: &Message) -> bool {
        !self.tip.contains(&msg.id)
            && self
                .last_known
                .as_ref()
                .map_or(true, |known| msg.sent_at >= known.sent_at)
    }

    /// Newest received and newest sent message of the active address.
    async fn fetch_heads(&self) -> Result<(Option<Message>, Option<Message>)> {
        let received = MessageQuery::received_by(&self.active_address, NEWEST_ONLY_PAGE_SIZE);
        let sent = MessageQuery::sent_by(&self.active_address, NEWEST_ONLY_PAGE_SIZE);

        let (received, sent) = tokio::try_join!(
            self.provider.fetch_messages(&received, None),
            self.provider.fetch_messages(&sent, None),
        )?;
        Ok((
            received.messages.into_iter().next(),
            sent.messages.into_iter().next(),
        ))
    }

    /// Every message in either feed sent in the same second as `newest`.
    async fn fetch_same_instant(&self, newest: &Message) -> Result<Vec<Message>> {
        let received = MessageQuery::received_by(&self.active_address, self.feed_page_size);
        let sent = MessageQuery::sent_by(&self.active_address, self.feed_page_size);

        let (mut received, mut sent) = tokio::try_join!(
            self.at_instant(received, newest),
            self.at_instant(sent, newest),
        )?;
        received.append(&mut sent);
        Ok(received)
    }

    /// Leading run of one feed sharing `newest`'s send time. Reads further
    /// pages while the run continues, up to the catch-up page limit.
    async fn at_instant(&self, query: MessageQuery, newest: &Message) -> Result<Vec<Message>> {
        let mut page = fetch_first_page(&self.provider, query).await?;
        let mut found = Vec::new();
        let mut pages = 1;

        loop {
            for msg in page.items() {
                if msg.sent_at < newest.sent_at {
                    return Ok(found);
                }
                if msg.sent_at == newest.sent_at {
                    found.push(msg.clone());
                }
            }
            if !page.has_more() || pages >= self.catch_up_page_limit {
                return Ok(found);
            }
            page = page.next_page().await?;
            pages += 1;
        }
    }

    /// Messages newer than the last known one, oldest first.
    async fn catch_up(&self) -> Result<Vec<Message>> {
        let (received, sent) = tokio::try_join!(
            self.walk(MessageQuery::received_by(&self.active_address, self.feed_page_size)),
            self.walk(MessageQuery::sent_by(&self.active_address, self.feed_page_size)),
        )?;

        Ok(merge_feeds(&received, &sent, None, UpperBound::Unbounded)
            .into_iter()
            .rev()
            .cloned()
            .collect())
    }

    /// Walk one feed newest-first until the last known message or anything
    /// older, collecting everything not reported yet.
    async fn walk(&self, query: MessageQuery) -> Result<Vec<Message>> {
        let known = self.last_known.as_ref();
        let mut page = fetch_first_page(&self.provider, query).await?;
        let mut found = Vec::new();
        let mut pages = 1;

        loop {
            for msg in page.items() {
                if known.is_some_and(|k| k.id == msg.id || msg.sent_at < k.sent_at) {
                    return Ok(found);
                }
                if !self.tip.contains(&msg.id) {
                    found.push(msg.clone());
                }
            }

            if !page.has_more() {
                return Ok(found);
            }
            if pages >= self.catch_up_page_limit {
                return Err(InboxError::CatchUpOverflow {
                    last_known: known.map(|m| m.id.clone()).unwrap_or_default(),
                    pages,
                });
            }
            page = page.next_page().await?;
            pages += 1;
        }
    }

    fn anchor(&mut self, newest: Message, reported: &[Message]) {
        let same_instant = self
            .last_known
            .as_ref()
            .is_some_and(|known| known.sent_at == newest.sent_at);
        if !same_instant {
            self.tip.clear();
        }
        self.tip.extend(
            reported
                .iter()
                .filter(|m| m.sent_at == newest.sent_at)
                .map(|m| m.id.clone()),
        );
        self.tip.insert(newest.id.clone());
        self.last_known = Some(newest);
    }
}

struct SubscriptionState<C> {
    poller: ActivityPoller,
    clock: C,
    queue: VecDeque<ActivityEvent>,
}

/// Stream of activity events driven by `clock`. Ends when the clock stops.
pub fn activity_subscription<C: Clock + 'static>(
    poller: ActivityPoller,
    clock: C,
) -> impl Stream<Item = ActivityEvent> + Send {
    let state = SubscriptionState {
        poller,
        clock,
        queue: VecDeque::new(),
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.queue.pop_front() {
                return Some((event, state));
            }
            if !state.clock.tick().await {
                return None;
            }
            match state.poller.poll_once().await {
                Ok(events) => state.queue.extend(events),
                Err(err) => tracing::warn!(?err, "Activity poll failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{incoming, outgoing, FakeProvider, ManualClock};
    use futures_util::StreamExt;

    fn ids(events: &[ActivityEvent]) -> Vec<String> {
        events
            .iter()
            .map(|e| match e {
                ActivityEvent::Message(m) => m.id.clone(),
                ActivityEvent::Resynced(m) => format!("resync:{}", m.id),
            })
            .collect()
    }

    fn poller(provider: &FakeProvider, feed_page_size: u32, limit: usize) -> ActivityPoller {
        ActivityPoller::new(Arc::new(provider.clone()), "+1000", feed_page_size, limit)
    }

    #[tokio::test]
    async fn test_first_poll_only_records() {
        let provider = FakeProvider::new(vec![incoming("i1", "+2001", "+1000", 1)]);
        let mut poller = poller(&provider, 10, 10);

        assert!(poller.poll_once().await.unwrap().is_empty());
        assert_eq!(poller.last_known().unwrap().id, "i1");
        assert!(poller.poll_once().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_catch_up_reports_each_message_once() {
        let provider = FakeProvider::new(vec![
            incoming("i1", "+2001", "+1000", 1),
            outgoing("o1", "+1000", "+2001", 2),
        ]);
        let mut poller = poller(&provider, 2, 10);
        let mut events_rx = poller.subscribe();
        poller.prime().await.unwrap();

        provider.push(incoming("i2", "+2002", "+1000", 3));
        provider.push(outgoing("o2", "+1000", "+2002", 4));
        provider.push(incoming("i3", "+2003", "+1000", 5));
        provider.push(incoming("i4", "+2001", "+1000", 6));
        provider.push(outgoing("o3", "+1000", "+2003", 7));

        let events = poller.poll_once().await.unwrap();
        assert_eq!(ids(&events), vec!["i2", "o2", "i3", "i4", "o3"]);
        assert_eq!(poller.last_known().unwrap().id, "o3");

        for expected in ["i2", "o2", "i3", "i4", "o3"] {
            match events_rx.recv().await.unwrap() {
                ActivityEvent::Message(m) => assert_eq!(m.id, expected),
                other => panic!("unexpected event {other:?}"),
            }
        }

        assert!(poller.poll_once().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_instant_messages_not_repeated() {
        let provider = FakeProvider::new(vec![incoming("i1", "+2001", "+1000", 1)]);
        let mut poller = poller(&provider, 10, 10);
        poller.prime().await.unwrap();

        provider.push(incoming("i2", "+2002", "+1000", 5));
        let events = poller.poll_once().await.unwrap();
        assert_eq!(ids(&events), vec!["i2"]);

        provider.push(outgoing("o1", "+1000", "+2002", 5));
        let events = poller.poll_once().await.unwrap();
        assert_eq!(ids(&events), vec!["o1"]);

        assert!(poller.poll_once().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_overflow_resyncs() {
        let provider = FakeProvider::new(vec![incoming("i0", "+2001", "+1000", 0)]);
        let mut poller = poller(&provider, 1, 2);
        poller.prime().await.unwrap();

        for n in 1..=5 {
            provider.push(incoming(&format!("i{n}"), "+2001", "+1000", n));
        }

        let events = poller.poll_once().await.unwrap();
        assert_eq!(ids(&events), vec!["resync:i5"]);
        assert_eq!(poller.last_known().unwrap().id, "i5");

        provider.push(incoming("i6", "+2001", "+1000", 6));
        let events = poller.poll_once().await.unwrap();
        assert_eq!(ids(&events), vec!["i6"]);
    }

    #[tokio::test]
    async fn test_primed_second_not_reported_again() {
        let provider = FakeProvider::new(vec![
            incoming("i1", "+2001", "+1000", 5),
            outgoing("oA", "+1000", "+2001", 5),
            outgoing("oB", "+1000", "+2002", 5),
        ]);
        let mut poller = poller(&provider, 10, 10);
        poller.prime().await.unwrap();

        provider.push(incoming("i2", "+2002", "+1000", 6));
        let events = poller.poll_once().await.unwrap();
        assert_eq!(ids(&events), vec!["i2"]);
        assert!(poller.poll_once().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resync_records_whole_second() {
        let provider = FakeProvider::new(vec![incoming("i0", "+2001", "+1000", 0)]);
        let mut poller = poller(&provider, 1, 2);
        poller.prime().await.unwrap();

        for n in 1..=5 {
            provider.push(incoming(&format!("i{n}"), "+2001", "+1000", n));
        }
        provider.push(outgoing("oA", "+1000", "+2002", 5));
        provider.push(outgoing("oB", "+1000", "+2003", 5));

        let events = poller.poll_once().await.unwrap();
        assert_eq!(ids(&events), vec!["resync:i5"]);

        provider.push(incoming("i6", "+2001", "+1000", 6));
        let events = poller.poll_once().await.unwrap();
        assert_eq!(ids(&events), vec!["i6"]);
    }

    #[tokio::test]
    async fn test_first_message_after_empty_history() {
        let provider = FakeProvider::new(Vec::new());
        let mut poller = poller(&provider, 10, 10);
        poller.prime().await.unwrap();
        assert!(poller.last_known().is_none());

        provider.push(outgoing("o1", "+1000", "+2001", 1));
        let events = poller.poll_once().await.unwrap();
        assert_eq!(ids(&events), vec!["o1"]);
    }

    #[tokio::test]
    async fn test_run_swallows_failures() {
        let provider = FakeProvider::new(vec![incoming("i1", "+2001", "+1000", 1)]);
        let mut poller = poller(&provider, 10, 10);
        let mut events_rx = poller.subscribe();
        let (clock, ticks) = ManualClock::new();

        provider.fail_after(0);
        ticks.send(()).unwrap();
        provider.push(incoming("i2", "+2001", "+1000", 2));
        drop(ticks);
        poller.run(clock).await;
        assert!(poller.last_known().is_none());

        provider.recover();
        let (clock, ticks) = ManualClock::new();
        ticks.send(()).unwrap();
        drop(ticks);
        poller.run(clock).await;
        assert_eq!(poller.last_known().unwrap().id, "i2");
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_subscription_stream() {
        let provider = FakeProvider::new(vec![incoming("i1", "+2001", "+1000", 1)]);
        let mut poller = poller(&provider, 10, 10);
        poller.prime().await.unwrap();

        let (clock, ticks) = ManualClock::new();
        let mut stream = Box::pin(activity_subscription(poller, clock));

        provider.push(incoming("i2", "+2002", "+1000", 2));
        provider.push(outgoing("o1", "+1000", "+2002", 3));
        ticks.send(()).unwrap();

        let first = stream.next().await.unwrap();
        assert_eq!(ids(&[first]), vec!["i2"]);
        let second = stream.next().await.unwrap();
        assert_eq!(ids(&[second]), vec!["o1"]);

        drop(ticks);
        assert!(stream.next().await.is_none());
    }
}
