use crate::errors::{AppError, AppResult};
use crate::types::MailboxMessage;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

const GMAIL_MESSAGES_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me/messages";

const FALLBACK_SUBJECT: &str = "(No Subject)";
const FALLBACK_SENDER: &str = "(Unknown Sender)";

// Wire types for the Gmail REST v1 message resource. Everything below the id
// is optional on the wire; extraction substitutes defaults instead of failing.

#[derive(Debug, Deserialize)]
struct ListMessagesResponse {
    #[serde(default)]
    messages: Option<Vec<MessageRef>>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
pub struct RawMessage {
    pub id: String,
    #[serde(default)]
    pub payload: Option<MessagePayload>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MessagePayload {
    #[serde(default)]
    pub headers: Option<Vec<MessageHeader>>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Option<Vec<MessagePart>>,
}

#[derive(Debug, Deserialize)]
pub struct MessagePart {
    #[serde(rename = "mimeType", default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub body: Option<PartBody>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartBody {
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

/// Fetches a bounded batch of inbox messages and normalizes them into flat
/// [`MailboxMessage`] records. A failure on any single message is logged and
/// skipped; the batch succeeds with whatever was retrievable.
pub struct GmailClient {
    http: reqwest::Client,
    base_url: String,
}

impl GmailClient {
    pub fn new() -> Self {
        Self::with_base_url(GMAIL_MESSAGES_URL.to_string())
    }

    pub fn with_base_url(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    /// List up to `max_results` message ids carrying all of `label_ids`, then
    /// retrieve and normalize each one. Output order matches the provider's
    /// listing order; no re-sort.
    pub async fn fetch_batch(
        &self,
        access_token: &str,
        label_ids: &[String],
        max_results: u32,
    ) -> AppResult<Vec<MailboxMessage>> {
        let mut query: Vec<(String, String)> =
            vec![("maxResults".to_string(), max_results.to_string())];
        for label in label_ids {
            query.push(("labelIds".to_string(), label.clone()));
        }

        let res = self
            .http
            .get(&self.base_url)
            .bearer_auth(access_token)
            .query(&query)
            .send()
            .await
            .map_err(|e| AppError::Network(format!("listing messages failed: {e}")))?;
        if !res.status().is_success() {
            return Err(status_error("message list", res.status()));
        }
        let listing: ListMessagesResponse = res
            .json()
            .await
            .map_err(|e| AppError::Unexpected(format!("parse message list: {e}")))?;

        let refs = listing.messages.unwrap_or_default();
        debug!(count = refs.len(), "Message list retrieved");

        let mut out = Vec::with_capacity(refs.len());
        for m in &refs {
            match self.get_message(access_token, &m.id).await {
                Ok(raw) => match normalize_message(raw) {
                    Some(msg) => out.push(msg),
                    None => warn!(message = %m.id, "Message has no payload; skipping"),
                },
                Err(e) => {
                    warn!(message = %m.id, error = %e, "Fetching message failed; skipping");
                }
            }
        }

        debug!(fetched = out.len(), listed = refs.len(), "Batch fetch completed");
        Ok(out)
    }

    async fn get_message(&self, access_token: &str, id: &str) -> AppResult<RawMessage> {
        let res = self
            .http
            .get(format!("{}/{id}", self.base_url))
            .bearer_auth(access_token)
            .query(&[("format", "full")])
            .send()
            .await
            .map_err(|e| AppError::Network(format!("message get failed: {e}")))?;
        if !res.status().is_success() {
            return Err(status_error("message get", res.status()));
        }
        res.json()
            .await
            .map_err(|e| AppError::Unexpected(format!("parse message: {e}")))
    }
}

impl Default for GmailClient {
    fn default() -> Self {
        Self::new()
    }
}

/// A rejected token is an authentication problem, not a transport one; the
/// caller should prompt for re-auth instead of reporting a network error.
fn status_error(what: &str, status: reqwest::StatusCode) -> AppError {
    match status {
        reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
            AppError::AuthRequired
        }
        other => AppError::Network(format!("{what} failed with status {other}")),
    }
}

/// Flatten one raw message into a [`MailboxMessage`]. Returns `None` only
/// when the message carries no payload at all; absent headers and bodies get
/// well-defined placeholders instead.
pub fn normalize_message(raw: RawMessage) -> Option<MailboxMessage> {
    let payload = raw.payload?;

    let subject = header_value(&payload, "Subject").unwrap_or_else(|| FALLBACK_SUBJECT.to_string());
    let from = header_value(&payload, "From").unwrap_or_else(|| FALLBACK_SENDER.to_string());
    let date = header_value(&payload, "Date").unwrap_or_else(|| Utc::now().to_rfc3339());
    let body = extract_plain_text_body(&payload);

    Some(MailboxMessage {
        id: raw.id,
        from,
        subject,
        date,
        body,
    })
}

fn header_value(payload: &MessagePayload, name: &str) -> Option<String> {
    payload
        .headers
        .as_ref()?
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.clone())
}

/// Multi-part messages contribute their first `text/plain` part; otherwise
/// the top-level body is used; otherwise the body is empty. Never an error.
pub fn extract_plain_text_body(payload: &MessagePayload) -> String {
    if let Some(parts) = &payload.parts {
        if let Some(data) = parts
            .iter()
            .find(|p| p.mime_type.as_deref() == Some("text/plain"))
            .and_then(|p| p.body.as_ref())
            .and_then(|b| b.data.as_deref())
        {
            return decode_base64_url(data);
        }
    }

    payload
        .body
        .as_ref()
        .and_then(|b| b.data.as_deref())
        .map(decode_base64_url)
        .unwrap_or_default()
}

/// Gmail transports body data as URL-safe base64, sometimes padded and
/// sometimes not. An undecodable payload yields an empty body rather than a
/// batch failure.
fn decode_base64_url(data: &str) -> String {
    let trimmed = data.trim_end_matches('=');
    match URL_SAFE_NO_PAD.decode(trimmed) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            warn!(error = %e, "Body payload failed base64 decode; treating as empty");
            String::new()
        }
    }
}
