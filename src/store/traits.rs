//! `TriageStore` trait — single async interface for all triage persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::triage::model::{
    Approval, ApplyLogEntry, ApprovalView, Batch, NewTriageItem, TriageItem,
};

/// Backend-agnostic storage for batches, triage items and the apply log.
///
/// Every method that writes more than one row commits atomically: either all
/// of its rows land or none do.
#[async_trait]
pub trait TriageStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Batches ─────────────────────────────────────────────────────

    /// Insert a batch and its items in one transaction, batch row first.
    ///
    /// Items are `INSERT OR IGNORE`d on (batch_id, message_id); the first
    /// occurrence of a message wins. Returns the number of item rows written.
    async fn insert_batch(
        &self,
        batch: &Batch,
        items: &[NewTriageItem],
    ) -> Result<usize, DatabaseError>;

    /// Get a batch by ID.
    async fn get_batch(&self, batch_id: &str) -> Result<Option<Batch>, DatabaseError>;

    /// ID of the batch with the greatest `created_at` (newest insert wins ties).
    async fn latest_batch_id(&self) -> Result<Option<String>, DatabaseError>;

    // ── Items ───────────────────────────────────────────────────────

    /// All items of a batch in insertion order.
    async fn list_items(&self, batch_id: &str) -> Result<Vec<TriageItem>, DatabaseError>;

    /// Look up one item by its composite key.
    async fn get_item(
        &self,
        batch_id: &str,
        message_id: &str,
    ) -> Result<Option<TriageItem>, DatabaseError>;

    // ── Approvals ───────────────────────────────────────────────────

    /// Mark the given messages approved, overwriting draft body and category.
    ///
    /// Categories must already be normalized. Rows that do not exist or are
    /// already applied are left alone. Returns the number of rows updated.
    async fn record_approvals(
        &self,
        batch_id: &str,
        approvals: &[(String, Approval)],
    ) -> Result<usize, DatabaseError>;

    /// Approved items of a batch, newest insertion first.
    async fn list_approved(&self, batch_id: &str) -> Result<Vec<ApprovalView>, DatabaseError>;

    // ── Apply ───────────────────────────────────────────────────────

    /// Approved, not yet applied items of a batch in insertion order.
    async fn pending_apply(&self, batch_id: &str) -> Result<Vec<TriageItem>, DatabaseError>;

    /// Atomically claim an item for applying.
    ///
    /// Succeeds only if the item is approved, unapplied, and either unclaimed
    /// or claimed before `stale_before`. Returns `true` if this caller now
    /// owns the item.
    async fn claim_item(
        &self,
        item_id: i64,
        token: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Drop a claim held under `token`, leaving the item eligible again.
    async fn release_claim(&self, item_id: i64, token: &str) -> Result<(), DatabaseError>;

    /// Mark a claimed item applied and append its audit entry, atomically.
    ///
    /// Returns `false` (and writes nothing) if the claim is no longer held.
    async fn complete_apply(
        &self,
        item_id: i64,
        token: &str,
        entry: &ApplyLogEntry,
    ) -> Result<bool, DatabaseError>;

    /// Apply log of a batch, oldest first.
    async fn list_apply_log(&self, batch_id: &str) -> Result<Vec<ApplyLogEntry>, DatabaseError>;
}
