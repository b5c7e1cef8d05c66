//! Triage data model — batches, items, categories, approvals and apply results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label added to items that need no further action.
pub const LABEL_DONE: &str = "Triage/Done";
/// Label added to items parked for later reading.
pub const LABEL_READ_LATER: &str = "Triage/ReadLater";
/// Label added to everything that needs attention now.
pub const LABEL_NOW: &str = "Triage/Now";
/// The full set of labels that must exist in the mailbox before applying.
pub const LABEL_VOCABULARY: [&str; 3] = [LABEL_DONE, LABEL_READ_LATER, LABEL_NOW];
/// System label whose removal archives a message.
pub const INBOX_LABEL: &str = "INBOX";

// ── Category ────────────────────────────────────────────────────────

/// Triage category suggested for (or chosen by the approver for) a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    /// FYI / notification, no action required.
    Archive,
    /// Newsletter or long read.
    ReadLater,
    /// Sender expects a response.
    Reply,
    /// Should become a to-do.
    Task,
    /// Someone else should handle it.
    Delegate,
}

impl Category {
    /// Parse a category, case-insensitively. Unknown values yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ARCHIVE" => Some(Self::Archive),
            "READ_LATER" => Some(Self::ReadLater),
            "REPLY" => Some(Self::Reply),
            "TASK" => Some(Self::Task),
            "DELEGATE" => Some(Self::Delegate),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Archive => "ARCHIVE",
            Self::ReadLater => "READ_LATER",
            Self::Reply => "REPLY",
            Self::Task => "TASK",
            Self::Delegate => "DELEGATE",
        }
    }

    /// Label added to the message when this category is applied.
    pub fn target_label(&self) -> &'static str {
        match self {
            Self::Archive => LABEL_DONE,
            Self::ReadLater => LABEL_READ_LATER,
            Self::Reply | Self::Task | Self::Delegate => LABEL_NOW,
        }
    }

    /// Whether applying this category removes the message from the inbox.
    pub fn archives(&self) -> bool {
        matches!(self, Self::Archive | Self::ReadLater)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage form of a category: trimmed and uppercased, unknown values kept verbatim.
pub fn normalize_category(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Target label for a stored category string. Unrecognized values land in `Triage/Now`.
pub fn label_for_category(category: &str) -> &'static str {
    Category::parse(category)
        .map(|c| c.target_label())
        .unwrap_or(LABEL_NOW)
}

/// Whether a stored category string archives. Only ARCHIVE and READ_LATER do.
pub fn removes_inbox(category: &str) -> bool {
    Category::parse(category).is_some_and(|c| c.archives())
}

// ── Batch ───────────────────────────────────────────────────────────

/// One immutable snapshot of fetched messages plus their suggestions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: String,
    pub created_at: DateTime<Utc>,
    /// Which suggestion provider produced the items ("mock", "llm").
    pub mode: String,
    /// Requested page size.
    pub max_results: u32,
}

// ── Triage items ────────────────────────────────────────────────────

/// A normalized triage item, ready to be inserted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTriageItem {
    pub message_id: String,
    pub thread_id: Option<String>,
    pub sender: String,
    pub subject: String,
    pub date: String,
    pub snippet: String,
    /// Uppercased, stored verbatim even when unrecognized.
    pub category: String,
    pub confidence: Option<f64>,
    pub reason: Option<String>,
    pub suggested_labels: Option<Vec<String>>,
    pub draft_reply: Option<serde_json::Value>,
}

/// A persisted triage item: suggestion, human decision and apply status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriageItem {
    /// Surrogate key, monotonically increasing in insertion order.
    pub id: i64,
    pub batch_id: String,
    pub message_id: String,
    pub thread_id: Option<String>,
    pub sender: String,
    pub subject: String,
    pub date: String,
    pub snippet: String,
    pub category: String,
    pub confidence: Option<f64>,
    pub reason: Option<String>,
    pub suggested_labels: Option<Vec<String>>,
    pub draft_reply: Option<serde_json::Value>,
    pub approved: bool,
    pub edited_draft_body: Option<String>,
    pub applied: bool,
    pub applied_at: Option<DateTime<Utc>>,
}

// ── Approvals ───────────────────────────────────────────────────────

/// A human decision for one message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    #[serde(default)]
    pub edited_draft_body: Option<String>,
    /// Category override; READ_LATER when absent.
    #[serde(default)]
    pub category: Option<String>,
}

/// Approval state of one item, as returned by `list_approved`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalView {
    pub message_id: String,
    pub approved: bool,
    pub edited_draft_body: Option<String>,
    pub category: String,
}

// ── Apply ───────────────────────────────────────────────────────────

/// One row of the append-only apply audit trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyLogEntry {
    pub batch_id: String,
    pub message_id: String,
    pub category: String,
    pub labels_added: Vec<String>,
    pub removed_inbox: bool,
    pub created_at: DateTime<Utc>,
}

/// An item whose label change succeeded and was recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedItem {
    pub message_id: String,
    pub category: String,
    pub label: String,
    pub removed_inbox: bool,
}

/// Something apply deliberately did not do.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub reason: String,
}

/// An item whose external label change failed; it stays eligible for a retry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyFailure {
    pub message_id: String,
    pub error: String,
}

/// Outcome of one apply invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplyReport {
    pub batch_id: String,
    pub applied: Vec<AppliedItem>,
    pub skipped: Vec<SkippedItem>,
    pub errors: Vec<ApplyFailure>,
}
