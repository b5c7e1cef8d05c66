//! Gmail REST client — inbox fetch, label vocabulary and label changes.
//!
//! Talks to the Gmail v1 API with a stored OAuth access token. The token file
//! is re-read on every request so an external refresh is picked up without a
//! restart.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::GmailConfig;
use crate::error::MailboxError;
use crate::mailbox::{FetchedMessage, LabelService, MailboxReader};
use crate::triage::model::LABEL_VOCABULARY;

/// Inbox search used for every fetch.
pub const INBOX_QUERY: &str = "in:inbox -in:spam -in:trash";

/// Maximum number of characters kept from a decoded body.
const BODY_PREVIEW_CHARS: usize = 1000;

/// Where the access token comes from.
#[derive(Debug, Clone)]
enum TokenSource {
    Static(SecretString),
    File(PathBuf),
}

/// Gmail API client implementing both mailbox collaborator traits.
pub struct GmailClient {
    api_base: String,
    token: TokenSource,
    client: reqwest::Client,
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    #[serde(default)]
    thread_id: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    payload: MessagePart,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: PartBody,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Default, Deserialize)]
struct PartBody {
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Header {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct LabelList {
    #[serde(default)]
    labels: Vec<GmailLabel>,
}

#[derive(Debug, Deserialize)]
struct GmailLabel {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct StoredToken {
    token: Option<String>,
}

impl GmailClient {
    /// Client with a fixed access token.
    pub fn new(
        api_base: impl Into<String>,
        token: SecretString,
        timeout: Duration,
    ) -> Result<Self, MailboxError> {
        Self::build(api_base.into(), TokenSource::Static(token), timeout)
    }

    /// Client reading its access token from the configured token file.
    pub fn from_config(config: &GmailConfig) -> Result<Self, MailboxError> {
        Self::build(
            config.api_base.clone(),
            TokenSource::File(config.token_path.clone()),
            config.timeout,
        )
    }

    fn build(api_base: String, token: TokenSource, timeout: Duration) -> Result<Self, MailboxError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MailboxError::Request(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/gmail/v1/users/me/{path}", self.api_base)
    }

    async fn access_token(&self) -> Result<SecretString, MailboxError> {
        match &self.token {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::File(path) => {
                let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
                    MailboxError::Auth(format!(
                        "Not connected yet, no token at {}: {e}",
                        path.display()
                    ))
                })?;
                let stored: StoredToken = serde_json::from_str(&raw).map_err(|e| {
                    MailboxError::Auth(format!("Unreadable token file {}: {e}", path.display()))
                })?;
                stored
                    .token
                    .filter(|t| !t.is_empty())
                    .map(SecretString::from)
                    .ok_or_else(|| MailboxError::Auth("Token file has no access token".into()))
            }
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        op: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, MailboxError> {
        let token = self.access_token().await?;
        let resp = request
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(|e| MailboxError::Request(format!("{op}: {e}")))?;
        let resp = check_status(op, resp).await?;
        resp.json::<T>()
            .await
            .map_err(|e| MailboxError::InvalidResponse(format!("{op}: {e}")))
    }

    async fn get_message(&self, id: &str) -> Result<FetchedMessage, MailboxError> {
        let request = self
            .client
            .get(self.api_url(&format!("messages/{id}")))
            .query(&[("format", "full")]);
        let message: GmailMessage = self.get_json("messages.get", request).await?;
        Ok(to_fetched(message))
    }

    async fn list_labels(&self) -> Result<HashMap<String, String>, MailboxError> {
        let request = self.client.get(self.api_url("labels"));
        let list: LabelList = self.get_json("labels.list", request).await?;
        Ok(list.labels.into_iter().map(|l| (l.name, l.id)).collect())
    }

    async fn create_label(&self, name: &str) -> Result<String, MailboxError> {
        let body = serde_json::json!({
            "name": name,
            "labelListVisibility": "labelShow",
            "messageListVisibility": "show",
            "type": "user",
        });
        let request = self.client.post(self.api_url("labels")).json(&body);
        let created: GmailLabel = self.get_json("labels.create", request).await?;
        info!(label = %created.name, id = %created.id, "Created Gmail label");
        Ok(created.id)
    }
}

async fn check_status(op: &str, resp: reqwest::Response) -> Result<reqwest::Response, MailboxError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(MailboxError::Auth(format!("{op} returned {status}: {body}")));
    }
    Err(MailboxError::Request(format!("{op} returned {status}: {body}")))
}

// ── Message decoding ────────────────────────────────────────────────

fn header_value(headers: &[Header], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.clone())
}

fn decode_data(data: &str) -> Option<String> {
    match URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            debug!(error = %e, "Undecodable message body part");
            None
        }
    }
}

/// Top-level body first, then the first text part found breadth-first.
fn decode_body(payload: &MessagePart) -> String {
    if let Some(data) = payload.body.data.as_deref().filter(|d| !d.is_empty()) {
        return decode_data(data).unwrap_or_default();
    }

    let mut queue: VecDeque<&MessagePart> = payload.parts.iter().collect();
    while let Some(part) = queue.pop_front() {
        if matches!(part.mime_type.as_str(), "text/plain" | "text/html")
            && let Some(data) = part.body.data.as_deref().filter(|d| !d.is_empty())
        {
            return decode_data(data).unwrap_or_default();
        }
        queue.extend(part.parts.iter());
    }
    String::new()
}

fn to_fetched(message: GmailMessage) -> FetchedMessage {
    let headers = &message.payload.headers;
    let body_preview: String = decode_body(&message.payload)
        .chars()
        .take(BODY_PREVIEW_CHARS)
        .collect();

    FetchedMessage {
        sender: header_value(headers, "From").unwrap_or_default(),
        subject: header_value(headers, "Subject").unwrap_or_default(),
        date: header_value(headers, "Date").unwrap_or_default(),
        has_unsubscribe_header: header_value(headers, "List-Unsubscribe").is_some(),
        snippet: message.snippet.unwrap_or_default(),
        thread_id: message.thread_id,
        message_id: message.id,
        body_preview,
    }
}

// ── Trait implementations ───────────────────────────────────────────

#[async_trait]
impl MailboxReader for GmailClient {
    async fn fetch_recent_messages(&self, limit: u32) -> Result<Vec<FetchedMessage>, MailboxError> {
        let max_results = limit.to_string();
        let request = self
            .client
            .get(self.api_url("messages"))
            .query(&[("q", INBOX_QUERY), ("maxResults", max_results.as_str())]);
        let list: MessageList = self.get_json("messages.list", request).await?;

        let mut messages = Vec::with_capacity(list.messages.len());
        for reference in &list.messages {
            messages.push(self.get_message(&reference.id).await?);
        }
        debug!(count = messages.len(), "Fetched inbox messages");
        Ok(messages)
    }
}

#[async_trait]
impl LabelService for GmailClient {
    async fn ensure_label_vocabulary(&self) -> Result<HashMap<String, String>, MailboxError> {
        let existing = self.list_labels().await?;

        let mut vocabulary = HashMap::with_capacity(LABEL_VOCABULARY.len());
        for name in LABEL_VOCABULARY {
            let id = match existing.get(name) {
                Some(id) => id.clone(),
                None => self.create_label(name).await?,
            };
            vocabulary.insert(name.to_string(), id);
        }
        Ok(vocabulary)
    }

    async fn apply_label_change(
        &self,
        message_id: &str,
        add_label_id: &str,
        remove_label_ids: &[String],
    ) -> Result<(), MailboxError> {
        let body = serde_json::json!({
            "addLabelIds": [add_label_id],
            "removeLabelIds": remove_label_ids,
        });
        let token = self.access_token().await?;
        let resp = self
            .client
            .post(self.api_url(&format!("messages/{message_id}/modify")))
            .bearer_auth(token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| MailboxError::Request(format!("messages.modify: {e}")))?;
        check_status("messages.modify", resp).await?;
        debug!(message_id, add_label_id, ?remove_label_ids, "Label change applied");
        Ok(())
    }
}
