//! Approval ledger — records human decisions against a batch's items.
//!
//! Approval state lives only in the item table; nothing is cached in memory.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::error::TriageError;
use crate::store::TriageStore;
use crate::triage::model::{Approval, ApprovalView, Category, normalize_category};

#[derive(Clone)]
pub struct ApprovalLedger {
    store: Arc<dyn TriageStore>,
}

impl ApprovalLedger {
    pub fn new(store: Arc<dyn TriageStore>) -> Self {
        Self { store }
    }

    /// Approve items of a batch, overwriting their category and draft body.
    ///
    /// Message ids are trimmed the same way batch items were. A missing
    /// category means READ_LATER. Unknown and already-applied messages are
    /// ignored. Returns how many items were actually updated.
    pub async fn approve(
        &self,
        batch_id: Option<&str>,
        decisions: &HashMap<String, Approval>,
    ) -> Result<usize, TriageError> {
        let batch_id = batch_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| TriageError::InvalidRequest("batch_id is required".into()))?;

        let normalized: Vec<(String, Approval)> = decisions
            .iter()
            .map(|(message_id, approval)| {
                let category = approval
                    .category
                    .as_deref()
                    .map(normalize_category)
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| Category::ReadLater.as_str().to_string());
                (
                    message_id.trim().to_string(),
                    Approval {
                        edited_draft_body: approval.edited_draft_body.clone(),
                        category: Some(category),
                    },
                )
            })
            .collect();

        let updated = self.store.record_approvals(batch_id, &normalized).await?;

        info!(
            batch_id,
            requested = decisions.len(),
            updated,
            "Approvals saved"
        );
        Ok(updated)
    }

    /// Approved items of a batch, newest first.
    pub async fn list_approved(&self, batch_id: &str) -> Result<Vec<ApprovalView>, TriageError> {
        Ok(self.store.list_approved(batch_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;
    use crate::triage::model::{Batch, NewTriageItem};
    use crate::triage::testing::FlakyStore;
    use std::sync::atomic::Ordering;
    use chrono::Utc;

    fn item(message_id: &str) -> NewTriageItem {
        NewTriageItem {
            message_id: message_id.into(),
            thread_id: None,
            sender: "a@x".into(),
            subject: "s".into(),
            date: String::new(),
            snippet: String::new(),
            category: "ARCHIVE".into(),
            confidence: None,
            reason: None,
            suggested_labels: None,
            draft_reply: None,
        }
    }

    async fn setup() -> (ApprovalLedger, Arc<dyn TriageStore>) {
        let store: Arc<dyn TriageStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let batch = Batch {
            batch_id: "b1".into(),
            created_at: Utc::now(),
            mode: "mock".into(),
            max_results: 20,
        };
        store
            .insert_batch(&batch, &[item("m1"), item("m2"), item("m3")])
            .await
            .unwrap();
        (ApprovalLedger::new(store.clone()), store)
    }

    fn decisions(entries: &[(&str, Option<&str>)]) -> HashMap<String, Approval> {
        entries
            .iter()
            .map(|(id, category)| {
                (
                    id.to_string(),
                    Approval {
                        edited_draft_body: None,
                        category: category.map(str::to_string),
                    },
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn missing_batch_id_is_rejected_without_writes() {
        let (ledger, store) = setup().await;
        let d = decisions(&[("m1", Some("REPLY"))]);

        for batch_id in [None, Some(""), Some("   ")] {
            let err = ledger.approve(batch_id, &d).await.unwrap_err();
            assert!(matches!(err, TriageError::InvalidRequest(_)));
        }
        assert!(store.list_approved("b1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn count_reflects_true_matches() {
        let (ledger, _) = setup().await;
        let d = decisions(&[("m1", Some("ARCHIVE")), ("m2", None), ("nope", Some("REPLY"))]);
        assert_eq!(ledger.approve(Some("b1"), &d).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn category_is_normalized_and_defaults_to_read_later() {
        let (ledger, store) = setup().await;
        let d = decisions(&[("m1", Some(" reply ")), ("m2", None), ("m3", Some(""))]);
        ledger.approve(Some("b1"), &d).await.unwrap();

        assert_eq!(store.get_item("b1", "m1").await.unwrap().unwrap().category, "REPLY");
        assert_eq!(store.get_item("b1", "m2").await.unwrap().unwrap().category, "READ_LATER");
        assert_eq!(store.get_item("b1", "m3").await.unwrap().unwrap().category, "READ_LATER");
    }

    #[tokio::test]
    async fn reapproval_overwrites_draft_body() {
        let (ledger, store) = setup().await;
        let mut d = HashMap::new();
        d.insert(
            "m1".to_string(),
            Approval {
                edited_draft_body: Some("first".into()),
                category: Some("REPLY".into()),
            },
        );
        ledger.approve(Some("b1"), &d).await.unwrap();

        d.insert(
            "m1".to_string(),
            Approval {
                edited_draft_body: None,
                category: Some("TASK".into()),
            },
        );
        ledger.approve(Some("b1"), &d).await.unwrap();

        let item = store.get_item("b1", "m1").await.unwrap().unwrap();
        assert_eq!(item.category, "TASK");
        assert!(item.edited_draft_body.is_none());
    }

    #[tokio::test]
    async fn list_approved_only_returns_approved() {
        let (ledger, _) = setup().await;
        ledger
            .approve(Some("b1"), &decisions(&[("m2", Some("ARCHIVE"))]))
            .await
            .unwrap();
        let approved = ledger.list_approved("b1").await.unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].message_id, "m2");
        assert!(approved[0].approved);
    }

    #[tokio::test]
    async fn padded_message_ids_still_match() {
        let (ledger, store) = setup().await;
        let d = decisions(&[(" m1 ", Some("REPLY")), ("m2\n", None)]);
        assert_eq!(ledger.approve(Some("b1"), &d).await.unwrap(), 2);
        assert!(store.get_item("b1", "m1").await.unwrap().unwrap().approved);
        assert!(store.get_item("b1", "m2").await.unwrap().unwrap().approved);
    }

    #[tokio::test]
    async fn persistence_failure_surfaces_and_approves_nothing() {
        let (_, inner) = setup().await;
        let flaky = Arc::new(FlakyStore::new(inner.clone()));
        flaky.fail_approvals.store(true, Ordering::SeqCst);
        let ledger = ApprovalLedger::new(flaky);

        let d = decisions(&[("m1", Some("ARCHIVE")), ("m2", Some("REPLY"))]);
        let err = ledger.approve(Some("b1"), &d).await.unwrap_err();
        assert!(matches!(err, TriageError::Persistence(_)));
        assert!(inner.list_approved("b1").await.unwrap().is_empty());

        assert_eq!(ledger.approve(Some("b1"), &d).await.unwrap(), 2);
    }
}
