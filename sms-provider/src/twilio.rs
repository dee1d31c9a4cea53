//! REST client for Twilio-compatible message APIs.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ProviderError, Result};
use crate::message::{parse_message_list, RawMessageList};
use crate::provider::{MessagePage, MessageProvider, MessageQuery};

/// Default API host.
pub const API_BASE_URL: &str = "https://api.twilio.com";

/// Versioned path prefix for account resources.
const ACCOUNTS_PATH: &str = "/2010-04-01/Accounts";

/// Timeout for a single provider request (seconds).
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Account credentials. The token is never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub account_sid: String,
    pub auth_token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct RawNumberList {
    #[serde(default)]
    incoming_phone_numbers: Vec<RawNumber>,
}

#[derive(Debug, Deserialize)]
struct RawNumber {
    phone_number: String,
}

#[derive(Debug, Deserialize)]
struct RawSendResponse {
    sid: String,
}

/// Client bound to one set of account credentials.
#[derive(Clone)]
pub struct TwilioClient {
    http: Client,
    base_url: String,
    credentials: Credentials,
}

impl fmt::Debug for TwilioClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwilioClient")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl TwilioClient {
    pub fn new(credentials: Credentials) -> Result<Self> {
        Self::with_base_url(credentials, API_BASE_URL)
    }

    /// Build a client against a non-default host (regional edge, proxy, mock).
    pub fn with_base_url(credentials: Credentials, base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    fn account_url(&self, resource: &str) -> String {
        account_url(&self.base_url, &self.credentials.account_sid, resource)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(
            &self.credentials.account_sid,
            Some(&self.credentials.auth_token),
        )
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.authed(request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::warn!("Provider request failed with {}: {}", status, message);
            return Err(ProviderError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ProviderError::Malformed(e.to_string()))
    }
}

fn account_url(base_url: &str, account_sid: &str, resource: &str) -> String {
    format!("{base_url}{ACCOUNTS_PATH}/{account_sid}/{resource}")
}

/// Resolve a `next_page_uri` against the API host.
///
/// The provider returns host-relative URIs; absolute ones are used as-is.
fn resolve_page_url(base_url: &str, uri: &str) -> String {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        uri.to_string()
    } else {
        format!("{base_url}{uri}")
    }
}

fn query_params(query: &MessageQuery) -> Vec<(&'static str, String)> {
    let mut params = Vec::with_capacity(3);
    if let Some(from) = &query.from {
        params.push(("From", from.clone()));
    }
    if let Some(to) = &query.to {
        params.push(("To", to.clone()));
    }
    params.push(("PageSize", query.page_size.max(1).to_string()));
    params
}

#[async_trait]
impl MessageProvider for TwilioClient {
    async fn fetch_messages(
        &self,
        query: &MessageQuery,
        cursor: Option<&str>,
    ) -> Result<MessagePage> {
        let request = match cursor {
            Some(uri) => self.http.get(resolve_page_url(&self.base_url, uri)),
            None => self
                .http
                .get(self.account_url("Messages.json"))
                .query(&query_params(query)),
        };

        let list: RawMessageList = self.send_json(request).await?;
        let page = parse_message_list(list);
        tracing::debug!(
            "Fetched {} message(s) (from: {:?}, to: {:?}, more: {})",
            page.messages.len(),
            query.from,
            query.to,
            page.next_cursor.is_some()
        );
        Ok(page)
    }

    async fn list_addresses(&self) -> Result<Vec<String>> {
        let request = self.http.get(self.account_url("IncomingPhoneNumbers.json"));
        let list: RawNumberList = self.send_json(request).await?;
        Ok(list
            .incoming_phone_numbers
            .into_iter()
            .map(|n| n.phone_number)
            .collect())
    }

    async fn send_message(&self, from: &str, to: &str, body: &str) -> Result<String> {
        if !crate::address::is_address_valid(to) {
            return Err(ProviderError::InvalidAddress(to.to_string()));
        }

        let request = self
            .http
            .post(self.account_url("Messages.json"))
            .form(&[("From", from), ("To", to), ("Body", body)]);
        let sent: RawSendResponse = self.send_json(request).await?;
        tracing::info!("Provider accepted message {} to {}", sent.sid, to);
        Ok(sent.sid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_url() {
        assert_eq!(
            account_url(API_BASE_URL, "AC123", "Messages.json"),
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Messages.json"
        );
    }

    #[test]
    fn test_resolve_page_url() {
        assert_eq!(
            resolve_page_url(
                API_BASE_URL,
                "/2010-04-01/Accounts/AC123/Messages.json?Page=1&PageToken=PA1"
            ),
            "https://api.twilio.com/2010-04-01/Accounts/AC123/Messages.json?Page=1&PageToken=PA1"
        );
        assert_eq!(
            resolve_page_url(API_BASE_URL, "http://localhost:8080/next"),
            "http://localhost:8080/next"
        );
    }

    #[test]
    fn test_query_params() {
        let params = query_params(&MessageQuery::between("+1000", "+2000", 0));
        assert_eq!(
            params,
            vec![
                ("From", "+1000".to_string()),
                ("To", "+2000".to_string()),
                ("PageSize", "1".to_string()),
            ]
        );

        let params = query_params(&MessageQuery::received_by("+1000", 50));
        assert_eq!(
            params,
            vec![("To", "+1000".to_string()), ("PageSize", "50".to_string())]
        );
    }

    #[test]
    fn test_credentials_debug_redacts_token() {
        let credentials = Credentials {
            account_sid: "AC123".to_string(),
            auth_token: "secret-token".to_string(),
        };
        let printed = format!("{:?}", credentials);
        assert!(printed.contains("AC123"));
        assert!(!printed.contains("secret-token"));
    }
}
