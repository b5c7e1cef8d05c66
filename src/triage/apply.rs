//! Apply engine — turns approved items into mailbox label changes.
//!
//! Each item is claimed before its external call, so concurrent runs never
//! act on the same item twice. Completion (applied flag plus audit entry)
//! commits atomically and only under the claim that made the call. The
//! external call and the local commit are not coupled: a crash between them
//! leaves the item eligible once its claim goes stale, and the next run
//! repeats the same label change.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{MailboxError, TriageError};
use crate::mailbox::LabelService;
use crate::store::TriageStore;
use crate::triage::model::{
    AppliedItem, ApplyFailure, ApplyLogEntry, ApplyReport, INBOX_LABEL, SkippedItem, TriageItem,
    label_for_category, removes_inbox,
};
use crate::triage::resolver::BatchResolver;

pub const NOTHING_TO_APPLY: &str = "no approved, unapplied items for this batch";
pub const ALREADY_CLAIMED: &str = "already being applied";
pub const CLAIM_LOST: &str = "claim expired before completion";

pub struct ApplyEngine {
    store: Arc<dyn TriageStore>,
    labels: Arc<dyn LabelService>,
    resolver: BatchResolver,
    claim_lease: Duration,
}

enum ItemOutcome {
    Applied(AppliedItem),
    Skipped(SkippedItem),
    Failed(ApplyFailure),
}

impl ApplyEngine {
    pub fn new(
        store: Arc<dyn TriageStore>,
        labels: Arc<dyn LabelService>,
        claim_lease: Duration,
    ) -> Self {
        Self {
            resolver: BatchResolver::new(store.clone()),
            store,
            labels,
            claim_lease,
        }
    }

    /// Apply every approved, unapplied item of a batch (the latest when omitted).
    ///
    /// Per-item mailbox failures are reported in `errors` and leave the item
    /// eligible for the next call. Label vocabulary and persistence failures
    /// abort the whole call.
    pub async fn apply(&self, batch_id: Option<&str>) -> Result<ApplyReport, TriageError> {
        let batch_id = self.resolver.resolve(batch_id).await?;
        let mut report = ApplyReport {
            batch_id: batch_id.clone(),
            ..Default::default()
        };

        let pending = self.store.pending_apply(&batch_id).await?;
        if pending.is_empty() {
            info!(batch_id = %batch_id, "Nothing to apply");
            report.skipped.push(SkippedItem {
                message_id: None,
                reason: NOTHING_TO_APPLY.into(),
            });
            return Ok(report);
        }

        let vocabulary = self.labels.ensure_label_vocabulary().await?;
        let run_token = Uuid::new_v4().to_string();

        for item in &pending {
            let label_id = vocabulary.get(label_for_category(&item.category)).map(String::as_str);
            match self.apply_item(item, label_id, &run_token).await? {
                ItemOutcome::Applied(applied) => report.applied.push(applied),
                ItemOutcome::Skipped(skipped) => report.skipped.push(skipped),
                ItemOutcome::Failed(failure) => report.errors.push(failure),
            }
        }

        info!(
            batch_id = %batch_id,
            applied = report.applied.len(),
            skipped = report.skipped.len(),
            errors = report.errors.len(),
            "Apply finished"
        );
        Ok(report)
    }

    async fn apply_item(
        &self,
        item: &TriageItem,
        label_id: Option<&str>,
        token: &str,
    ) -> Result<ItemOutcome, TriageError> {
        let now = Utc::now();
        if !self
            .store
            .claim_item(item.id, token, now, self.stale_before(now))
            .await?
        {
            return Ok(ItemOutcome::Skipped(SkippedItem {
                message_id: Some(item.message_id.clone()),
                reason: ALREADY_CLAIMED.into(),
            }));
        }

        let label = label_for_category(&item.category);
        let removed_inbox = removes_inbox(&item.category);
        let remove_label_ids: Vec<String> = if removed_inbox {
            vec![INBOX_LABEL.to_string()]
        } else {
            Vec::new()
        };

        let result = match label_id {
            Some(label_id) => {
                self.labels
                    .apply_label_change(&item.message_id, label_id, &remove_label_ids)
                    .await
            }
            None => Err(MailboxError::LabelMissing(label.to_string())),
        };

        if let Err(e) = result {
            let failure = TriageError::ExternalActionFailed {
                message_id: item.message_id.clone(),
                reason: e.to_string(),
            };
            warn!(
                batch_id = %item.batch_id,
                message_id = %item.message_id,
                error = %failure,
                "Label change failed, releasing claim"
            );
            self.store.release_claim(item.id, token).await?;
            return Ok(ItemOutcome::Failed(ApplyFailure {
                message_id: item.message_id.clone(),
                error: e.to_string(),
            }));
        }

        let entry = ApplyLogEntry {
            batch_id: item.batch_id.clone(),
            message_id: item.message_id.clone(),
            category: item.category.clone(),
            labels_added: vec![label.to_string()],
            removed_inbox,
            created_at: Utc::now(),
        };
        let completed = match self.store.complete_apply(item.id, token, &entry).await {
            Ok(completed) => completed,
            Err(e) => {
                self.release_after_error(item, token).await;
                return Err(e.into());
            }
        };
        if !completed {
            warn!(
                batch_id = %item.batch_id,
                message_id = %item.message_id,
                "Claim was taken over before completion"
            );
            return Ok(ItemOutcome::Skipped(SkippedItem {
                message_id: Some(item.message_id.clone()),
                reason: CLAIM_LOST.into(),
            }));
        }

        Ok(ItemOutcome::Applied(AppliedItem {
            message_id: item.message_id.clone(),
            category: item.category.clone(),
            label: label.to_string(),
            removed_inbox,
        }))
    }

    /// Best-effort release once the call is about to fail anyway.
    async fn release_after_error(&self, item: &TriageItem, token: &str) {
        if let Err(e) = self.store.release_claim(item.id, token).await {
            warn!(
                batch_id = %item.batch_id,
                message_id = %item.message_id,
                error = %e,
                "Failed to release claim; it will go stale after the lease"
            );
        }
    }

    /// Claims taken before this instant are considered abandoned.
    fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.claim_lease)
            .ok()
            .and_then(|lease| now.checked_sub_signed(lease))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}
