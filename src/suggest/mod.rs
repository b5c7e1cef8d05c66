//! Suggestion providers — turn fetched messages into triage suggestions.
//!
//! Providers return a loosely-shaped [`Suggestion`] per message; the batch
//! builder normalizes them into typed items.

pub mod llm;
pub mod rules;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SuggestError;
use crate::mailbox::FetchedMessage;

pub use llm::GeminiSuggester;
pub use rules::RuleSuggester;

/// One suggestion, as produced by a provider.
///
/// Every field is optional: model output is not trusted to be complete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    #[serde(default)]
    pub message_id: Option<String>,
    /// Alternate message id key.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    /// Alternate sender key.
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    /// A number or a numeric string.
    #[serde(default)]
    pub confidence: Option<serde_json::Value>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub suggested_labels: Option<Vec<String>>,
    /// Opaque draft reply.
    #[serde(default)]
    pub draft_reply: Option<serde_json::Value>,
}

/// All suggestions for one batch plus a human-readable summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SuggestionSet {
    pub summary: String,
    pub items: Vec<Suggestion>,
}

/// Produces triage suggestions for a set of fetched messages.
#[async_trait]
pub trait SuggestionProvider: Send + Sync {
    /// Tag recorded on batches built from this provider.
    fn mode(&self) -> &'static str;

    /// Suggest a category for every message. Malformed items are dropped.
    async fn suggest(&self, messages: &[FetchedMessage]) -> Result<SuggestionSet, SuggestError>;
}

/// Parse suggestions out of a raw JSON array, skipping entries that do not fit.
pub(crate) fn parse_items(raw: Vec<serde_json::Value>) -> Vec<Suggestion> {
    raw.into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value::<Suggestion>(value) {
            Ok(suggestion) => Some(suggestion),
            Err(e) => {
                tracing::warn!(index, error = %e, "Skipping malformed suggestion");
                None
            }
        })
        .collect()
}
