//! Mailbox collaborators — reading recent messages and changing their labels.

pub mod gmail;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MailboxError;

pub use gmail::GmailClient;

/// A message as fetched from the mailbox, before any suggestion is attached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchedMessage {
    pub message_id: String,
    pub thread_id: Option<String>,
    /// Raw `From` header.
    #[serde(rename = "from")]
    pub sender: String,
    pub subject: String,
    pub date: String,
    pub snippet: String,
    /// Whether the message carries a `List-Unsubscribe` header.
    pub has_unsubscribe_header: bool,
    /// Start of the decoded text body.
    pub body_preview: String,
}

/// Read side of the mailbox.
#[async_trait]
pub trait MailboxReader: Send + Sync {
    /// Most recent inbox messages, newest first, at most `limit`.
    async fn fetch_recent_messages(&self, limit: u32) -> Result<Vec<FetchedMessage>, MailboxError>;
}

/// Write side of the mailbox: the label vocabulary and per-message label changes.
#[async_trait]
pub trait LabelService: Send + Sync {
    /// Make sure every triage label exists, creating missing ones.
    ///
    /// Returns label name → label id for the whole vocabulary.
    async fn ensure_label_vocabulary(&self) -> Result<HashMap<String, String>, MailboxError>;

    /// Add one label to a message and remove the given label ids.
    async fn apply_label_change(
        &self,
        message_id: &str,
        add_label_id: &str,
        remove_label_ids: &[String],
    ) -> Result<(), MailboxError>;
}
