//! Desktop notifications for incoming messages.

use sms_inbox::constants::notifications::MESSAGE_TIMEOUT_MS;
use sms_provider::{is_whatsapp, Message};

const APP_NAME: &str = "SMS Inbox";
const HIDDEN_BODY: &str = "New message";

/// Summary and body for a message notification.
fn notification_text(msg: &Message, show_content: bool) -> (String, String) {
    let channel = if is_whatsapp(&msg.from) { "WhatsApp" } else { "SMS" };
    let summary = format!("{} from {}", channel, msg.counterparty());
    let body = if show_content {
        msg.body.clone()
    } else {
        HIDDEN_BODY.to_string()
    };
    (summary, body)
}

/// Show a notification for an incoming message. Failures are only logged.
pub async fn notify_incoming(msg: &Message, show_content: bool) {
    let (summary, body) = notification_text(msg, show_content);

    // Use spawn_blocking to run notify_rust in a blocking context
    // to avoid "Cannot start a runtime from within a runtime" panics
    let result = tokio::task::spawn_blocking(move || {
        notify_rust::Notification::new()
            .summary(&summary)
            .body(&body)
            .icon("mail-message-new-symbolic")
            .appname(APP_NAME)
            .timeout(notify_rust::Timeout::Milliseconds(MESSAGE_TIMEOUT_MS))
            .show()
    })
    .await;

    match result {
        Ok(Err(e)) => tracing::warn!("Failed to show message notification: {}", e),
        Err(e) => tracing::warn!("Notification task failed: {}", e),
        Ok(Ok(_)) => {}
    }
}
