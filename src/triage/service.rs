//! Triage service — the façade the HTTP layer talks to.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::error::TriageError;
use crate::mailbox::{LabelService, MailboxReader};
use crate::store::TriageStore;
use crate::suggest::{Suggestion, SuggestionProvider};
use crate::triage::apply::ApplyEngine;
use crate::triage::builder::BatchBuilder;
use crate::triage::ledger::ApprovalLedger;
use crate::triage::model::{
    Approval, ApplyLogEntry, ApplyReport, ApprovalView, Batch, TriageItem,
};
use crate::triage::resolver::BatchResolver;

/// Gmail refuses larger pages.
pub const MAX_RESULTS_LIMIT: u32 = 500;

/// Result of a triage run: the new batch and what went into it.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub batch_id: String,
    pub mode: String,
    pub summary: String,
    pub items: Vec<TriageItem>,
}

/// Everything the service is wired from.
pub struct TriageServiceParts {
    pub store: Arc<dyn TriageStore>,
    pub mailbox: Arc<dyn MailboxReader>,
    pub labels: Arc<dyn LabelService>,
    pub suggester: Arc<dyn SuggestionProvider>,
    pub claim_lease: Duration,
    pub default_max_results: u32,
}

pub struct TriageService {
    store: Arc<dyn TriageStore>,
    mailbox: Arc<dyn MailboxReader>,
    suggester: Arc<dyn SuggestionProvider>,
    builder: BatchBuilder,
    ledger: ApprovalLedger,
    engine: ApplyEngine,
    resolver: BatchResolver,
    default_max_results: u32,
}

impl TriageService {
    pub fn new(parts: TriageServiceParts) -> Self {
        let TriageServiceParts {
            store,
            mailbox,
            labels,
            suggester,
            claim_lease,
            default_max_results,
        } = parts;

        Self {
            builder: BatchBuilder::new(store.clone()),
            ledger: ApprovalLedger::new(store.clone()),
            engine: ApplyEngine::new(store.clone(), labels, claim_lease),
            resolver: BatchResolver::new(store.clone()),
            store,
            mailbox,
            suggester,
            default_max_results,
        }
    }

    /// Suggestion provider tag ("mock" or "llm").
    pub fn mode(&self) -> &'static str {
        self.suggester.mode()
    }

    /// Fetch recent messages, ask for suggestions and persist them as a batch.
    pub async fn run(&self, max_results: Option<u32>) -> Result<RunOutcome, TriageError> {
        let limit = max_results.unwrap_or(self.default_max_results);
        if limit == 0 || limit > MAX_RESULTS_LIMIT {
            return Err(TriageError::InvalidRequest(format!(
                "max_results must be between 1 and {MAX_RESULTS_LIMIT}"
            )));
        }

        let messages = self.mailbox.fetch_recent_messages(limit).await?;
        let suggestions = self.suggester.suggest(&messages).await?;
        let batch_id = self
            .create_batch(self.mode(), limit, &suggestions.items)
            .await?;
        let items = self.store.list_items(&batch_id).await?;

        info!(
            batch_id = %batch_id,
            fetched = messages.len(),
            items = items.len(),
            "Triage run complete"
        );

        Ok(RunOutcome {
            batch_id,
            mode: self.mode().to_string(),
            summary: suggestions.summary,
            items,
        })
    }

    pub async fn create_batch(
        &self,
        mode: &str,
        requested_size: u32,
        suggestions: &[Suggestion],
    ) -> Result<String, TriageError> {
        self.builder
            .create_batch(mode, requested_size, suggestions)
            .await
    }

    pub async fn approve(
        &self,
        batch_id: Option<&str>,
        decisions: &HashMap<String, Approval>,
    ) -> Result<usize, TriageError> {
        self.ledger.approve(batch_id, decisions).await
    }

    /// Approved items of a batch (the latest when omitted).
    pub async fn list_approved(
        &self,
        batch_id: Option<&str>,
    ) -> Result<(String, Vec<ApprovalView>), TriageError> {
        let batch_id = self.resolver.resolve(batch_id).await?;
        let approved = self.ledger.list_approved(&batch_id).await?;
        Ok((batch_id, approved))
    }

    pub async fn apply(&self, batch_id: Option<&str>) -> Result<ApplyReport, TriageError> {
        self.engine.apply(batch_id).await
    }

    /// The most recently created batch, if any.
    pub async fn latest_batch(&self) -> Result<Option<Batch>, TriageError> {
        match self.resolver.latest().await? {
            Some(batch_id) => Ok(self.store.get_batch(&batch_id).await?),
            None => Ok(None),
        }
    }

    pub async fn batch_items(&self, batch_id: &str) -> Result<Vec<TriageItem>, TriageError> {
        self.require_batch(batch_id).await?;
        Ok(self.store.list_items(batch_id).await?)
    }

    pub async fn apply_log(&self, batch_id: &str) -> Result<Vec<ApplyLogEntry>, TriageError> {
        self.require_batch(batch_id).await?;
        Ok(self.store.list_apply_log(batch_id).await?)
    }

    async fn require_batch(&self, batch_id: &str) -> Result<Batch, TriageError> {
        self.store
            .get_batch(batch_id)
            .await?
            .ok_or(TriageError::NoBatchFound)
    }
}
