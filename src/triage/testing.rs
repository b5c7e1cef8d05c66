//! In-memory fakes shared by the triage tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{DatabaseError, MailboxError};
use crate::mailbox::{FetchedMessage, LabelService, MailboxReader};
use crate::store::TriageStore;
use crate::triage::model::{
    Approval, ApplyLogEntry, ApprovalView, Batch, LABEL_VOCABULARY, NewTriageItem, TriageItem,
};

/// One recorded label change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelCall {
    pub message_id: String,
    pub add_label_id: String,
    pub remove_label_ids: Vec<String>,
}

/// Records label changes; fails for configured message ids.
#[derive(Default)]
pub struct FakeLabels {
    pub calls: Mutex<Vec<LabelCall>>,
    pub ensure_calls: AtomicUsize,
    pub failing: Mutex<HashSet<String>>,
    pub vocabulary_down: bool,
}

impl FakeLabels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(ids: &[&str]) -> Self {
        let labels = Self::default();
        labels
            .failing
            .lock()
            .unwrap()
            .extend(ids.iter().map(|s| s.to_string()));
        labels
    }

    pub fn heal(&self, id: &str) {
        self.failing.lock().unwrap().remove(id);
    }

    pub fn calls(&self) -> Vec<LabelCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, message_id: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.message_id == message_id)
            .count()
    }

    pub fn ensure_count(&self) -> usize {
        self.ensure_calls.load(Ordering::SeqCst)
    }
}

/// Label id used by the fakes for a label name.
pub fn fake_label_id(name: &str) -> String {
    format!("id:{name}")
}

#[async_trait]
impl LabelService for FakeLabels {
    async fn ensure_label_vocabulary(&self) -> Result<HashMap<String, String>, MailboxError> {
        self.ensure_calls.fetch_add(1, Ordering::SeqCst);
        if self.vocabulary_down {
            return Err(MailboxError::Request("labels.list returned 503".into()));
        }
        Ok(LABEL_VOCABULARY
            .iter()
            .map(|name| (name.to_string(), fake_label_id(name)))
            .collect())
    }

    async fn apply_label_change(
        &self,
        message_id: &str,
        add_label_id: &str,
        remove_label_ids: &[String],
    ) -> Result<(), MailboxError> {
        // Let concurrent apply runs interleave here.
        tokio::task::yield_now().await;
        if self.failing.lock().unwrap().contains(message_id) {
            return Err(MailboxError::Request(format!("modify {message_id} returned 500")));
        }
        self.calls.lock().unwrap().push(LabelCall {
            message_id: message_id.to_string(),
            add_label_id: add_label_id.to_string(),
            remove_label_ids: remove_label_ids.to_vec(),
        });
        Ok(())
    }
}

/// Serves a fixed list of messages.
#[derive(Default)]
pub struct FakeMailbox {
    pub messages: Vec<FetchedMessage>,
    pub down: bool,
}

#[async_trait]
impl MailboxReader for FakeMailbox {
    async fn fetch_recent_messages(&self, limit: u32) -> Result<Vec<FetchedMessage>, MailboxError> {
        if self.down {
            return Err(MailboxError::Auth("Not connected yet".into()));
        }
        Ok(self.messages.iter().take(limit as usize).cloned().collect())
    }
}

/// Wraps a real store and fails the next armed write once.
pub struct FlakyStore {
    pub inner: Arc<dyn TriageStore>,
    pub fail_complete: AtomicBool,
    pub fail_approvals: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn TriageStore>) -> Self {
        Self {
            inner,
            fail_complete: AtomicBool::new(false),
            fail_approvals: AtomicBool::new(false),
        }
    }

    fn trip(flag: &AtomicBool, op: &str) -> Result<(), DatabaseError> {
        if flag.swap(false, Ordering::SeqCst) {
            return Err(DatabaseError::Query(format!("{op}: disk I/O error")));
        }
        Ok(())
    }
}

#[async_trait]
impl TriageStore for FlakyStore {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        self.inner.init_schema().await
    }

    async fn insert_batch(
        &self,
        batch: &Batch,
        items: &[NewTriageItem],
    ) -> Result<usize, DatabaseError> {
        self.inner.insert_batch(batch, items).await
    }

    async fn get_batch(&self, batch_id: &str) -> Result<Option<Batch>, DatabaseError> {
        self.inner.get_batch(batch_id).await
    }

    async fn latest_batch_id(&self) -> Result<Option<String>, DatabaseError> {
        self.inner.latest_batch_id().await
    }

    async fn list_items(&self, batch_id: &str) -> Result<Vec<TriageItem>, DatabaseError> {
        self.inner.list_items(batch_id).await
    }

    async fn get_item(
        &self,
        batch_id: &str,
        message_id: &str,
    ) -> Result<Option<TriageItem>, DatabaseError> {
        self.inner.get_item(batch_id, message_id).await
    }

    async fn record_approvals(
        &self,
        batch_id: &str,
        approvals: &[(String, Approval)],
    ) -> Result<usize, DatabaseError> {
        Self::trip(&self.fail_approvals, "record_approvals")?;
        self.inner.record_approvals(batch_id, approvals).await
    }

    async fn list_approved(&self, batch_id: &str) -> Result<Vec<ApprovalView>, DatabaseError> {
        self.inner.list_approved(batch_id).await
    }

    async fn pending_apply(&self, batch_id: &str) -> Result<Vec<TriageItem>, DatabaseError> {
        self.inner.pending_apply(batch_id).await
    }

    async fn claim_item(
        &self,
        item_id: i64,
        token: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        self.inner.claim_item(item_id, token, now, stale_before).await
    }

    async fn release_claim(&self, item_id: i64, token: &str) -> Result<(), DatabaseError> {
        self.inner.release_claim(item_id, token).await
    }

    async fn complete_apply(
        &self,
        item_id: i64,
        token: &str,
        entry: &ApplyLogEntry,
    ) -> Result<bool, DatabaseError> {
        Self::trip(&self.fail_complete, "complete_apply")?;
        self.inner.complete_apply(item_id, token, entry).await
    }

    async fn list_apply_log(&self, batch_id: &str) -> Result<Vec<ApplyLogEntry>, DatabaseError> {
        self.inner.list_apply_log(batch_id).await
    }
}
