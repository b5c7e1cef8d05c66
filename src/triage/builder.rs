//! Batch builder — normalizes suggestions and persists them as a new batch.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::TriageError;
use crate::store::TriageStore;
use crate::suggest::Suggestion;
use crate::triage::model::{Batch, NewTriageItem, normalize_category};

/// Creates immutable batches from provider suggestions.
#[derive(Clone)]
pub struct BatchBuilder {
    store: Arc<dyn TriageStore>,
}

impl BatchBuilder {
    pub fn new(store: Arc<dyn TriageStore>) -> Self {
        Self { store }
    }

    /// Persist a new batch with one item per usable suggestion.
    ///
    /// The batch row and every item row commit together. Repeated message ids
    /// keep their first suggestion. Returns the new batch id.
    pub async fn create_batch(
        &self,
        mode: &str,
        requested_size: u32,
        suggestions: &[Suggestion],
    ) -> Result<String, TriageError> {
        let batch = Batch {
            batch_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            mode: mode.to_string(),
            max_results: requested_size,
        };

        let items: Vec<NewTriageItem> = suggestions
            .iter()
            .enumerate()
            .filter_map(|(index, s)| {
                let item = normalize_suggestion(s);
                if item.is_none() {
                    warn!(index, "Skipping suggestion without a message id");
                }
                item
            })
            .collect();

        let inserted = self.store.insert_batch(&batch, &items).await?;

        info!(
            batch_id = %batch.batch_id,
            mode,
            suggestions = suggestions.len(),
            inserted,
            "Batch created"
        );
        Ok(batch.batch_id)
    }
}

/// Convert a loose suggestion into an insertable item.
///
/// Returns `None` when neither `message_id` nor `id` is present.
pub fn normalize_suggestion(s: &Suggestion) -> Option<NewTriageItem> {
    let message_id = non_blank(&s.message_id).or_else(|| non_blank(&s.id))?;

    Some(NewTriageItem {
        message_id: message_id.to_string(),
        thread_id: s.thread_id.clone(),
        sender: s
            .from
            .clone()
            .or_else(|| s.sender.clone())
            .unwrap_or_default(),
        subject: s.subject.clone().unwrap_or_default(),
        date: s.date.clone().unwrap_or_default(),
        snippet: s.snippet.clone().unwrap_or_default(),
        category: normalize_category(s.category.as_deref().unwrap_or_default()),
        confidence: s.confidence.as_ref().and_then(parse_confidence),
        reason: s.reason.clone(),
        suggested_labels: s.suggested_labels.clone(),
        draft_reply: s.draft_reply.clone().filter(|d| !d.is_null()),
    })
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Number or numeric string, clamped to [0, 1]. Anything else is absent.
fn parse_confidence(value: &serde_json::Value) -> Option<f64> {
    let raw = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    raw.is_finite().then(|| raw.clamp(0.0, 1.0))
}
