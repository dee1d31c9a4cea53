//! Credential-scoped entry point tying the engine pieces together.

use std::collections::HashSet;
use std::sync::Arc;

use sms_provider::{
    canonicalize_address, conversation_id, is_whatsapp, whatsapp_address, Message,
    MessageProvider, TwilioClient,
};

use crate::config::Config;
use crate::constants::{conversations, polling};
use crate::conversations::aggregate::{AggregationState, ConversationAggregator, ConversationPage};
use crate::error::{InboxError, Result};
use crate::flags::{FlagOverlayMerger, HttpFlagSource};
use crate::conversations::FoldOutcome;
use crate::inbox::{Acceptance, Inbox};
use crate::poller::{ActivityEvent, ActivityPoller};
use crate::thread::ThreadWatcher;
use crate::unread::{JsonFileStore, LastSeenStore, UnreadTracker};

/// Tunables taken from [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub conversations_per_page: usize,
    pub feed_page_size: u32,
    pub thread_page_size: u32,
    pub catch_up_page_limit: usize,
    pub whatsapp_numbers: Vec<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            conversations_per_page: conversations::CONVERSATIONS_PER_PAGE,
            feed_page_size: conversations::FEED_PAGE_SIZE,
            thread_page_size: conversations::THREAD_PAGE_SIZE,
            catch_up_page_limit: polling::CATCH_UP_PAGE_LIMIT,
            whatsapp_numbers: Vec::new(),
        }
    }
}

impl From<&Config> for ClientSettings {
    fn from(config: &Config) -> Self {
        Self {
            conversations_per_page: config.conversations_per_page,
            feed_page_size: config.feed_page_size,
            catch_up_page_limit: config.catch_up_page_limit,
            whatsapp_numbers: config.whatsapp_numbers.clone(),
            ..Self::default()
        }
    }
}

/// Inbox operations for one provider account.
#[derive(Clone)]
pub struct InboxClient {
    provider: Arc<dyn MessageProvider>,
    tracker: UnreadTracker,
    overlay: FlagOverlayMerger,
    aggregator: ConversationAggregator,
    settings: ClientSettings,
}

impl InboxClient {
    pub fn new(
        provider: Arc<dyn MessageProvider>,
        store: Arc<dyn LastSeenStore>,
        overlay: FlagOverlayMerger,
        settings: ClientSettings,
    ) -> Self {
        let tracker = UnreadTracker::new(Arc::clone(&provider), store);
        let aggregator = ConversationAggregator::new(
            Arc::clone(&provider),
            tracker.clone(),
            settings.conversations_per_page,
            settings.feed_page_size,
        );

        Self {
            provider,
            tracker,
            overlay,
            aggregator,
            settings,
        }
    }

    /// Build a client from configuration and verify the credentials.
    pub async fn connect(config: &Config) -> Result<Self> {
        let credentials = config.credentials()?;
        let provider = TwilioClient::with_base_url(credentials, config.api_base_url.as_str())?;

        let store_path = JsonFileStore::default_path()
            .ok_or_else(|| InboxError::Config("no data directory available".to_string()))?;
        let store = JsonFileStore::open(store_path)?;

        let overlay = match &config.flag_api_url {
            Some(url) => FlagOverlayMerger::new(Arc::new(HttpFlagSource::new(
                url.as_str(),
                config.flag_api_token.clone(),
            )?)),
            None => FlagOverlayMerger::disabled(),
        };

        let client = Self::new(
            Arc::new(provider),
            Arc::new(store),
            overlay,
            ClientSettings::from(config),
        );

        let addresses = client.provider.list_addresses().await?;
        tracing::info!("Connected to provider with {} owned number(s)", addresses.len());
        Ok(client)
    }

    pub fn tracker(&self) -> &UnreadTracker {
        &self.tracker
    }

    /// Owned addresses: provider numbers plus configured WhatsApp numbers.
    pub async fn addresses(&self) -> Result<Vec<String>> {
        let mut addresses = self.provider.list_addresses().await?;
        addresses.extend(
            self.settings
                .whatsapp_numbers
                .iter()
                .map(|n| whatsapp_address(&canonicalize_address(n))),
        );

        let mut seen = HashSet::new();
        addresses.retain(|a| seen.insert(a.clone()));
        Ok(addresses)
    }

    /// Next page of conversations for the session, with flags attached.
    pub async fn load_page(
        &self,
        state: &mut AggregationState,
        existing: &HashSet<String>,
    ) -> Result<ConversationPage> {
        let mut page = self.aggregator.load_more(state, existing).await?;
        page.conversations = self.overlay.apply(page.conversations).await;
        Ok(page)
    }

    /// Load the next page of the session straight into `inbox`.
    pub async fn load_into(&self, inbox: &mut Inbox, state: &mut AggregationState) -> Result<Acceptance> {
        let existing = inbox.known_ids();
        let page = self.load_page(state, &existing).await?;
        Ok(inbox.accept_page(page))
    }

    /// Fold live activity into `inbox`.
    ///
    /// A conversation first created by the event is decorated with its flag
    /// status before anyone sees it. Flag lookup failures leave it unflagged.
    pub async fn apply_activity(
        &self,
        inbox: &mut Inbox,
        event: &ActivityEvent,
    ) -> Option<FoldOutcome> {
        let outcome = inbox.apply_activity(event)?;
        if let (FoldOutcome::Created, ActivityEvent::Message(msg)) = (outcome, event) {
            let id = conversation_id(msg.owned_address(), msg.counterparty());
            if let Some(created) = inbox.get(&id).cloned() {
                for conversation in self.overlay.apply(vec![created]).await {
                    inbox.replace(conversation);
                }
            }
        }
        Some(outcome)
    }

    /// Fetch a conversation's recent messages and mark it read.
    pub async fn open_conversation(
        &self,
        active_address: &str,
        counterparty: &str,
    ) -> Result<Vec<Message>> {
        self.watch_conversation(active_address, counterparty)
            .refresh()
            .await
    }

    /// Watcher that keeps an open conversation current and read.
    pub fn watch_conversation(&self, active_address: &str, counterparty: &str) -> ThreadWatcher {
        ThreadWatcher::new(
            Arc::clone(&self.provider),
            self.tracker.clone(),
            active_address,
            counterparty,
            self.settings.thread_page_size,
        )
    }

    /// Send `body` from an owned address. A WhatsApp sender gets a WhatsApp
    /// recipient.
    pub async fn send_message(&self, from: &str, to: &str, body: &str) -> Result<String> {
        let mut to = canonicalize_address(to);
        if is_whatsapp(from) {
            to = whatsapp_address(&to);
        }

        let id = self.provider.send_message(from, &to, body).await?;
        tracing::info!("Sent message {} from {} to {}", id, from, to);
        Ok(id)
    }

    /// Activity poller for `active_address`.
    pub fn poller(&self, active_address: &str) -> ActivityPoller {
        ActivityPoller::new(
            Arc::clone(&self.provider),
            active_address,
            self.settings.feed_page_size,
            self.settings.catch_up_page_limit,
        )
    }
}
