//! Bindings for an SMS/WhatsApp messaging provider.
//!
//! The provider exposes messages only as directional, cursor-paginated feeds
//! ("messages sent by X", "messages received by X"). This crate models those
//! feeds and ships a REST client for Twilio-compatible endpoints.

pub mod address;
pub mod error;
pub mod message;
pub mod provider;
pub mod twilio;

pub use address::{
    canonicalize_address, conversation_id, is_address_valid, is_whatsapp, whatsapp_address,
};
pub use error::{ProviderError, Result};
pub use message::{parse_message, parse_message_list, DeliveryStatus, Direction, Message};
pub use provider::{MessagePage, MessageProvider, MessageQuery};
pub use twilio::{Credentials, TwilioClient, API_BASE_URL};
