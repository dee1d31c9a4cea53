//! In-memory fakes shared by the engine's unit tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sms_provider::{
    DeliveryStatus, Direction, Message, MessagePage, MessageProvider, MessageQuery, ProviderError,
};
use tokio::sync::mpsc;

use crate::error::{InboxError, Result};
use crate::flags::{FlagRecord, FlagSource};
use crate::poller::Clock;

const EPOCH_SECS: i64 = 1_700_000_000;

/// Fixed instant `secs` seconds after an arbitrary epoch.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(EPOCH_SECS + secs, 0).unwrap()
}

pub fn incoming(id: &str, from: &str, to: &str, secs: i64) -> Message {
    message(id, Direction::Incoming, from, to, secs)
}

pub fn outgoing(id: &str, from: &str, to: &str, secs: i64) -> Message {
    message(id, Direction::Outgoing, from, to, secs)
}

fn message(id: &str, direction: Direction, from: &str, to: &str, secs: i64) -> Message {
    Message {
        id: id.to_string(),
        sent_at: at(secs),
        direction,
        from: from.to_string(),
        to: to.to_string(),
        body: format!("body of {id}"),
        status: match direction {
            Direction::Incoming => DeliveryStatus::Received,
            Direction::Outgoing => DeliveryStatus::Delivered,
        },
    }
}

#[derive(Default)]
struct FakeState {
    history: Vec<Message>,
    addresses: Vec<String>,
    sent: Vec<(String, String, String)>,
    calls: usize,
    /// Successful fetches left before every fetch fails.
    remaining_ok: Option<usize>,
}

/// Provider backed by an in-memory message history.
///
/// Feeds are served newest-first with offset cursors. Clones share state, so
/// a test can keep a handle to inject failures or new messages.
#[derive(Clone, Default)]
pub struct FakeProvider {
    state: Arc<Mutex<FakeState>>,
}

impl FakeProvider {
    pub fn new(history: Vec<Message>) -> Self {
        let provider = Self::default();
        provider.state.lock().unwrap().history = history;
        provider
    }

    pub fn with_addresses(self, addresses: &[&str]) -> Self {
        self.state.lock().unwrap().addresses = addresses.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn push(&self, message: Message) {
        self.state.lock().unwrap().history.push(message);
    }

    /// Let `n` more fetches succeed, then fail every fetch.
    pub fn fail_after(&self, n: usize) {
        self.state.lock().unwrap().remaining_ok = Some(n);
    }

    pub fn recover(&self) {
        self.state.lock().unwrap().remaining_ok = None;
    }

    /// Number of fetch calls served or refused so far.
    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().calls
    }

    pub fn sent(&self) -> Vec<(String, String, String)> {
        self.state.lock().unwrap().sent.clone()
    }
}

#[async_trait]
impl MessageProvider for FakeProvider {
    async fn fetch_messages(
        &self,
        query: &MessageQuery,
        cursor: Option<&str>,
    ) -> sms_provider::Result<MessagePage> {
        let mut state = self.state.lock().unwrap();
        state.calls += 1;

        if let Some(remaining) = state.remaining_ok.as_mut() {
            if *remaining == 0 {
                return Err(ProviderError::Status {
                    status: 503,
                    message: "service unavailable".to_string(),
                });
            }
            *remaining -= 1;
        }

        let mut matching: Vec<Message> = state
            .history
            .iter()
            .filter(|m| query.from.as_deref().map_or(true, |from| m.from == from))
            .filter(|m| query.to.as_deref().map_or(true, |to| m.to == to))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));

        let offset: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
        let size = query.page_size.max(1) as usize;
        let end = (offset + size).min(matching.len());
        let messages = matching
            .get(offset..end)
            .map(|slice| slice.to_vec())
            .unwrap_or_default();
        let next_cursor = (end < matching.len()).then(|| end.to_string());

        Ok(MessagePage {
            messages,
            next_cursor,
        })
    }

    async fn list_addresses(&self) -> sms_provider::Result<Vec<String>> {
        Ok(self.state.lock().unwrap().addresses.clone())
    }

    async fn send_message(&self, from: &str, to: &str, body: &str) -> sms_provider::Result<String> {
        let mut state = self.state.lock().unwrap();
        state
            .sent
            .push((from.to_string(), to.to_string(), body.to_string()));
        Ok(format!("SM{}", state.sent.len()))
    }
}

/// Clock that ticks only when the test says so; stops once the sender drops.
pub struct ManualClock {
    ticks: mpsc::UnboundedReceiver<()>,
}

impl ManualClock {
    pub fn new() -> (Self, mpsc::UnboundedSender<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { ticks: rx }, tx)
    }
}

#[async_trait]
impl Clock for ManualClock {
    async fn tick(&mut self) -> bool {
        self.ticks.recv().await.is_some()
    }
}

/// Flag source returning canned records, or failing.
pub struct FakeFlagSource {
    records: Option<Vec<FlagRecord>>,
}

impl FakeFlagSource {
    pub fn new(records: Vec<FlagRecord>) -> Self {
        Self {
            records: Some(records),
        }
    }

    pub fn failing() -> Self {
        Self { records: None }
    }
}

#[async_trait]
impl FlagSource for FakeFlagSource {
    async fn flagged_conversations(&self) -> Result<Vec<FlagRecord>> {
        self.records
            .clone()
            .ok_or_else(|| InboxError::FlagOverlay("backend unreachable".to_string()))
    }
}
