//! Phone and WhatsApp address helpers.

/// Prefix the provider uses for WhatsApp senders and recipients.
const WHATSAPP_PREFIX: &str = "whatsapp:";

/// Minimum and maximum digit counts accepted for a phone address (E.164 allows 15).
const MIN_PHONE_DIGITS: usize = 3;
const MAX_PHONE_DIGITS: usize = 15;

/// Canonicalize an address by removing formatting characters.
///
/// Strips spaces, dashes, dots and parentheses. A leading `+` and the
/// `whatsapp:` channel prefix are preserved since the provider matches on them.
pub fn canonicalize_address(address: &str) -> String {
    let trimmed = address.trim();
    let (prefix, number) = match trimmed.strip_prefix(WHATSAPP_PREFIX) {
        Some(rest) => (WHATSAPP_PREFIX, rest.trim()),
        None => ("", trimmed),
    };

    let number: String = number
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();

    format!("{prefix}{number}")
}

/// Validate if an address is usable as a message recipient.
///
/// Returns true for phone numbers with 3-15 digits (optionally `+`-prefixed),
/// with or without the `whatsapp:` prefix.
pub fn is_address_valid(address: &str) -> bool {
    let canonicalized = canonicalize_address(address);
    let number = canonicalized
        .strip_prefix(WHATSAPP_PREFIX)
        .unwrap_or(&canonicalized);
    let digits = number.strip_prefix('+').unwrap_or(number);

    (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits.len())
        && digits.chars().all(|c| c.is_ascii_digit())
}

pub fn is_whatsapp(address: &str) -> bool {
    address.starts_with(WHATSAPP_PREFIX)
}

/// Address form of a WhatsApp-enabled number.
pub fn whatsapp_address(number: &str) -> String {
    if is_whatsapp(number) {
        number.to_string()
    } else {
        format!("{WHATSAPP_PREFIX}{number}")
    }
}

/// Deterministic conversation identity for an (owned, counterparty) pair.
///
/// This is the same key the flag backend uses as its chat code, so it must
/// stay a plain concatenation.
pub fn conversation_id(owned_address: &str, counterparty: &str) -> String {
    format!("{owned_address}{counterparty}")
}
