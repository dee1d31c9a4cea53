//! Centralized constants for page sizes, intervals, and limits.
//!
//! This module provides a single location for the tunable defaults used
//! throughout the inbox, making them easy to discover and adjust.

/// Conversation list paging constants.
pub mod conversations {
    /// Distinct conversations returned per "load more" call.
    pub const CONVERSATIONS_PER_PAGE: usize = 10;

    /// Messages requested per provider feed page.
    /// The provider caps page size at 1000.
    pub const FEED_PAGE_SIZE: u32 = 1000;

    /// Messages requested when only the newest message of a feed matters.
    pub const NEWEST_ONLY_PAGE_SIZE: u32 = 1;

    /// Messages shown when a conversation is opened.
    pub const THREAD_PAGE_SIZE: u32 = 50;
}

/// Activity polling constants.
pub mod polling {
    /// Interval between activity polls (milliseconds).
    pub const POLL_INTERVAL_MS: u64 = 3000;

    /// Pages walked per feed before a catch-up is abandoned as an overflow.
    pub const CATCH_UP_PAGE_LIMIT: usize = 10;

    /// Buffered activity events per subscriber before it starts lagging.
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;
}

/// On-disk locations.
pub mod storage {
    /// Directory name under the platform config/data directories.
    pub const APP_DIR: &str = "sms-inbox";

    pub const CONFIG_FILE: &str = "config.toml";

    /// Last-seen incoming message per conversation.
    pub const LAST_SEEN_FILE: &str = "last_seen.json";
}

/// Flag overlay backend constants.
pub mod flags {
    /// Path of the flagged-conversations resource on the overlay backend.
    pub const FLAGGED_PATH: &str = "/chats/flagged";

    /// Timeout for overlay requests (seconds).
    pub const REQUEST_TIMEOUT_SECS: u64 = 10;
}

/// Notification display constants.
pub mod notifications {
    /// Timeout for new message notifications (milliseconds).
    pub const MESSAGE_TIMEOUT_MS: u32 = 5000;
}
