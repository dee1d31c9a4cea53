//! Message records and parsing of the provider's message list responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::MessagePage;

/// Message direction relative to the account's own address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Received by an owned address.
    Incoming,
    /// Sent from an owned address.
    Outgoing,
}

impl From<&str> for Direction {
    fn from(value: &str) -> Self {
        // Provider direction values:
        // "inbound"        = received by an owned number
        // "outbound-api"   = sent through the REST API
        // "outbound-call"  = sent during a call
        // "outbound-reply" = sent as a reply to an inbound webhook
        // Only "inbound" is truly a received message; all others are outgoing
        match value {
            "inbound" => Direction::Incoming,
            _ => Direction::Outgoing,
        }
    }
}

/// Provider-side delivery status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Queued,
    Sending,
    Sent,
    Failed,
    Delivered,
    Undelivered,
    Receiving,
    Received,
    Accepted,
    Scheduled,
    Read,
    PartiallyDelivered,
    Canceled,
    Unknown,
}

impl From<&str> for DeliveryStatus {
    fn from(value: &str) -> Self {
        match value {
            "queued" => DeliveryStatus::Queued,
            "sending" => DeliveryStatus::Sending,
            "sent" => DeliveryStatus::Sent,
            "failed" => DeliveryStatus::Failed,
            "delivered" => DeliveryStatus::Delivered,
            "undelivered" => DeliveryStatus::Undelivered,
            "receiving" => DeliveryStatus::Receiving,
            "received" => DeliveryStatus::Received,
            "accepted" => DeliveryStatus::Accepted,
            "scheduled" => DeliveryStatus::Scheduled,
            "read" => DeliveryStatus::Read,
            "partially_delivered" => DeliveryStatus::PartiallyDelivered,
            "canceled" => DeliveryStatus::Canceled,
            _ => DeliveryStatus::Unknown,
        }
    }
}

/// A single provider message. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Opaque, stable provider identifier.
    pub id: String,
    /// Provider-assigned send time; the only ordering key.
    pub sent_at: DateTime<Utc>,
    pub direction: Direction,
    pub from: String,
    pub to: String,
    pub body: String,
    pub status: DeliveryStatus,
}

impl Message {
    /// The address on the other side of the conversation.
    pub fn counterparty(&self) -> &str {
        match self.direction {
            Direction::Incoming => &self.from,
            Direction::Outgoing => &self.to,
        }
    }

    /// The account's own address in this message.
    pub fn owned_address(&self) -> &str {
        match self.direction {
            Direction::Incoming => &self.to,
            Direction::Outgoing => &self.from,
        }
    }

    pub fn is_incoming(&self) -> bool {
        self.direction == Direction::Incoming
    }
}

/// Message as it appears on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    pub sid: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub date_sent: Option<String>,
    #[serde(default)]
    pub date_created: Option<String>,
    #[serde(default)]
    pub direction: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub status: String,
}

/// One page of the provider's message list resource.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessageList {
    #[serde(default)]
    pub messages: Vec<RawMessage>,
    #[serde(default)]
    pub next_page_uri: Option<String>,
}

/// Parse a provider timestamp.
///
/// The REST API renders dates as RFC 2822 (`Wed, 18 Aug 2010 20:01:40 +0000`);
/// webhook payloads and some proxies use RFC 3339.
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Convert a wire record into a [`Message`].
///
/// Queued messages have no `date_sent` yet; their creation date is used
/// instead so they still sort with the rest of the feed.
pub fn parse_message(raw: &RawMessage) -> Option<Message> {
    let sent_at = raw
        .date_sent
        .as_deref()
        .and_then(parse_timestamp)
        .or_else(|| raw.date_created.as_deref().and_then(parse_timestamp));

    let Some(sent_at) = sent_at else {
        tracing::debug!("Message {} has no parseable date: {:?}", raw.sid, raw);
        return None;
    };

    Some(Message {
        id: raw.sid.clone(),
        sent_at,
        direction: Direction::from(raw.direction.as_str()),
        from: raw.from.clone(),
        to: raw.to.clone(),
        body: raw.body.clone().unwrap_or_default(),
        status: DeliveryStatus::from(raw.status.as_str()),
    })
}

/// Convert a wire page into a [`MessagePage`], dropping unparseable records.
pub fn parse_message_list(list: RawMessageList) -> MessagePage {
    let messages: Vec<Message> = list.messages.iter().filter_map(parse_message).collect();
    if messages.len() < list.messages.len() {
        tracing::warn!(
            "Dropped {} unparseable message(s) from provider page",
            list.messages.len() - messages.len()
        );
    }

    MessagePage {
        messages,
        next_cursor: list.next_page_uri.filter(|uri| !uri.is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const LIST_PAGE: &str = r#"{
        "messages": [
            {
                "sid": "SM002",
                "body": "see you there",
                "date_sent": "Wed, 18 Aug 2010 20:01:40 +0000",
                "date_created": "Wed, 18 Aug 2010 20:01:39 +0000",
                "direction": "outbound-api",
                "from": "+15550001000",
                "to": "+15550002000",
                "status": "delivered",
                "num_media": "0"
            },
            {
                "sid": "SM001",
                "body": "lunch?",
                "date_sent": "Wed, 18 Aug 2010 19:58:02 +0000",
                "direction": "inbound",
                "from": "+15550002000",
                "to": "+15550001000",
                "status": "received"
            }
        ],
        "next_page_uri": "/2010-04-01/Accounts/AC123/Messages.json?To=%2B15550001000&PageSize=2&Page=1&PageToken=PASM001"
    }"#;

    #[test]
    fn test_parse_message_list() {
        let raw: RawMessageList = serde_json::from_str(LIST_PAGE).unwrap();
        let page = parse_message_list(raw);

        assert_eq!(page.messages.len(), 2);
        assert!(page.next_cursor.is_some());

        let sent = &page.messages[0];
        assert_eq!(sent.id, "SM002");
        assert_eq!(sent.direction, Direction::Outgoing);
        assert_eq!(sent.status, DeliveryStatus::Delivered);
        assert_eq!(sent.counterparty(), "+15550002000");
        assert_eq!(sent.owned_address(), "+15550001000");
        assert_eq!(
            sent.sent_at,
            Utc.with_ymd_and_hms(2010, 8, 18, 20, 1, 40).unwrap()
        );

        let received = &page.messages[1];
        assert!(received.is_incoming());
        assert_eq!(received.counterparty(), "+15550002000");
        assert_eq!(received.owned_address(), "+15550001000");
    }

    #[test]
    fn test_direction_from_wire() {
        assert_eq!(Direction::from("inbound"), Direction::Incoming);
        assert_eq!(Direction::from("outbound-api"), Direction::Outgoing);
        assert_eq!(Direction::from("outbound-reply"), Direction::Outgoing);
        assert_eq!(Direction::from("outbound-call"), Direction::Outgoing);
    }

    #[test]
    fn test_queued_message_uses_creation_date() {
        let raw = RawMessage {
            sid: "SM003".to_string(),
            body: None,
            date_sent: None,
            date_created: Some("2024-03-01T10:00:00Z".to_string()),
            direction: "outbound-api".to_string(),
            from: "+1000".to_string(),
            to: "+2000".to_string(),
            status: "queued".to_string(),
        };

        let msg = parse_message(&raw).unwrap();
        assert_eq!(msg.sent_at, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
        assert_eq!(msg.status, DeliveryStatus::Queued);
        assert_eq!(msg.body, "");
    }

    #[test]
    fn test_undated_message_is_dropped() {
        let raw = RawMessageList {
            messages: vec![RawMessage {
                sid: "SM004".to_string(),
                body: Some("hi".to_string()),
                date_sent: Some("not a date".to_string()),
                date_created: None,
                direction: "inbound".to_string(),
                from: "+2000".to_string(),
                to: "+1000".to_string(),
                status: "received".to_string(),
            }],
            next_page_uri: Some(String::new()),
        };

        let page = parse_message_list(raw);
        assert!(page.messages.is_empty());
        assert!(page.next_cursor.is_none());
    }
}
