//! libSQL backend — async `TriageStore` implementation.
//!
//! Supports local file and in-memory databases. One connection is shared by
//! all operations; writes are serialized behind an async mutex so that a
//! transaction never picks up statements issued by a concurrent request.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::TriageStore;
use crate::triage::model::{
    Approval, ApplyLogEntry, ApprovalView, Batch, NewTriageItem, TriageItem,
};

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format: RFC 3339, fixed microsecond precision, `Z` suffix.
///
/// Fixed width keeps lexicographic order equal to chronological order.
pub(crate) fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Convert `Option<f64>` to libsql Value.
fn opt_real(v: Option<f64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Real(v),
        None => libsql::Value::Null,
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

/// Column order for item SELECT queries (17 columns).
const ITEM_COLUMNS: &str = "id, batch_id, message_id, thread_id, sender, subject, date, snippet, category, confidence, reason, suggested_labels_json, draft_reply, approved, edited_draft_body, applied, applied_at";

const BATCH_COLUMNS: &str = "batch_id, created_at, mode, max_results";

const LOG_COLUMNS: &str =
    "batch_id, message_id, category, labels_added_json, removed_inbox, created_at";

/// Map a libsql Row to a TriageItem. Column order matches ITEM_COLUMNS.
fn row_to_item(row: &libsql::Row) -> Result<TriageItem, DatabaseError> {
    let id: i64 = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("item.id: {e}")))?;
    let batch_id: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("item.batch_id: {e}")))?;
    let message_id: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("item.message_id: {e}")))?;

    let labels_str: Option<String> = row.get(11).ok();
    let suggested_labels = labels_str
        .filter(|s| !s.is_empty())
        .and_then(|s| serde_json::from_str::<Vec<String>>(&s).ok());

    let draft_str: Option<String> = row.get(12).ok();
    let draft_reply = draft_str
        .filter(|s| !s.is_empty())
        .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok())
        .filter(|v| !v.is_null());

    let applied_at_str: Option<String> = row.get(16).ok();

    Ok(TriageItem {
        id,
        batch_id,
        message_id,
        thread_id: row.get(3).ok(),
        sender: row.get(4).unwrap_or_default(),
        subject: row.get(5).unwrap_or_default(),
        date: row.get(6).unwrap_or_default(),
        snippet: row.get(7).unwrap_or_default(),
        category: row.get(8).unwrap_or_default(),
        confidence: row.get::<f64>(9).ok(),
        reason: row.get(10).ok(),
        suggested_labels,
        draft_reply,
        approved: row.get::<i64>(13).unwrap_or(0) != 0,
        edited_draft_body: row.get(14).ok(),
        applied: row.get::<i64>(15).unwrap_or(0) != 0,
        applied_at: parse_optional_datetime(&applied_at_str),
    })
}

fn row_to_batch(row: &libsql::Row) -> Result<Batch, DatabaseError> {
    let batch_id: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("batch.batch_id: {e}")))?;
    let created_str: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("batch.created_at: {e}")))?;
    Ok(Batch {
        batch_id,
        created_at: parse_datetime(&created_str),
        mode: row.get(2).unwrap_or_default(),
        max_results: row.get::<i64>(3).unwrap_or(0).max(0) as u32,
    })
}

fn row_to_log_entry(row: &libsql::Row) -> Result<ApplyLogEntry, DatabaseError> {
    let labels_str: String = row.get(3).unwrap_or_default();
    let created_str: String = row
        .get(5)
        .map_err(|e| DatabaseError::Query(format!("apply_log.created_at: {e}")))?;
    Ok(ApplyLogEntry {
        batch_id: row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("apply_log.batch_id: {e}")))?,
        message_id: row
            .get(1)
            .map_err(|e| DatabaseError::Query(format!("apply_log.message_id: {e}")))?,
        category: row.get(2).unwrap_or_default(),
        labels_added: serde_json::from_str(&labels_str).unwrap_or_default(),
        removed_inbox: row.get::<i64>(4).unwrap_or(0) != 0,
        created_at: parse_datetime(&created_str),
    })
}

async fn collect_items(mut rows: libsql::Rows, op: &str) -> Result<Vec<TriageItem>, DatabaseError> {
    let mut items = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
    {
        items.push(row_to_item(&row)?);
    }
    Ok(items)
}

// ── Transaction bodies ──────────────────────────────────────────────

async fn insert_batch_rows(
    conn: &Connection,
    batch: &Batch,
    items: &[NewTriageItem],
) -> Result<usize, DatabaseError> {
    conn.execute(
        "INSERT INTO batches (batch_id, created_at, mode, max_results) VALUES (?1, ?2, ?3, ?4)",
        params![
            batch.batch_id.as_str(),
            format_timestamp(&batch.created_at),
            batch.mode.as_str(),
            batch.max_results as i64,
        ],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("insert_batch: {e}")))?;

    let mut inserted = 0usize;
    for item in items {
        let labels_json = item
            .suggested_labels
            .as_ref()
            .map(to_json)
            .transpose()?;
        let draft_json = item.draft_reply.as_ref().map(to_json).transpose()?;

        let count = conn
            .execute(
                "INSERT OR IGNORE INTO triage_items (batch_id, message_id, thread_id, sender, subject, date, snippet, category, confidence, reason, suggested_labels_json, draft_reply, approved, applied)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0, 0)",
                params![
                    batch.batch_id.as_str(),
                    item.message_id.as_str(),
                    opt_text(item.thread_id.as_deref()),
                    item.sender.as_str(),
                    item.subject.as_str(),
                    item.date.as_str(),
                    item.snippet.as_str(),
                    item.category.as_str(),
                    opt_real(item.confidence),
                    opt_text(item.reason.as_deref()),
                    opt_text(labels_json.as_deref()),
                    opt_text(draft_json.as_deref()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_item: {e}")))?;

        if count == 0 {
            debug!(
                batch_id = %batch.batch_id,
                message_id = %item.message_id,
                "Duplicate message in batch ignored"
            );
        }
        inserted += count as usize;
    }
    Ok(inserted)
}

async fn update_approval_rows(
    conn: &Connection,
    batch_id: &str,
    approvals: &[(String, Approval)],
) -> Result<usize, DatabaseError> {
    let mut updated = 0usize;
    for (message_id, approval) in approvals {
        let count = conn
            .execute(
                "UPDATE triage_items SET approved = 1, edited_draft_body = ?1, category = ?2
                 WHERE batch_id = ?3 AND message_id = ?4 AND applied = 0",
                params![
                    opt_text(approval.edited_draft_body.as_deref()),
                    approval.category.as_deref().unwrap_or_default(),
                    batch_id,
                    message_id.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_approvals: {e}")))?;

        if count == 0 {
            debug!(batch_id, message_id = %message_id, "Approval matched no unapplied item");
        }
        updated += count as usize;
    }
    Ok(updated)
}

async fn complete_apply_rows(
    conn: &Connection,
    item_id: i64,
    token: &str,
    entry: &ApplyLogEntry,
) -> Result<bool, DatabaseError> {
    let applied_at = format_timestamp(&entry.created_at);
    let count = conn
        .execute(
            "UPDATE triage_items SET applied = 1, applied_at = ?1, claim_token = NULL, claimed_at = NULL
             WHERE id = ?2 AND claim_token = ?3 AND applied = 0",
            params![applied_at.as_str(), item_id, token],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("complete_apply: {e}")))?;

    if count == 0 {
        return Ok(false);
    }

    conn.execute(
        "INSERT INTO apply_log (batch_id, message_id, category, labels_added_json, removed_inbox, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.batch_id.as_str(),
            entry.message_id.as_str(),
            entry.category.as_str(),
            to_json(&entry.labels_added)?,
            entry.removed_inbox as i64,
            applied_at.as_str(),
        ],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("append_apply_log: {e}")))?;

    Ok(true)
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl TriageStore for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        migrations::run_migrations(self.conn()).await
    }

    // ── Batches ─────────────────────────────────────────────────────

    async fn insert_batch(
        &self,
        batch: &Batch,
        items: &[NewTriageItem],
    ) -> Result<usize, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_batch begin: {e}")))?;

        match insert_batch_rows(&tx, batch, items).await {
            Ok(inserted) => {
                tx.commit()
                    .await
                    .map_err(|e| DatabaseError::Query(format!("insert_batch commit: {e}")))?;
                debug!(batch_id = %batch.batch_id, inserted, "Batch inserted into DB");
                Ok(inserted)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, "insert_batch rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn get_batch(&self, batch_id: &str) -> Result<Option<Batch>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {BATCH_COLUMNS} FROM batches WHERE batch_id = ?1"),
                params![batch_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_batch: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_batch(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_batch: {e}"))),
        }
    }

    async fn latest_batch_id(&self) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT batch_id FROM batches ORDER BY created_at DESC, rowid DESC LIMIT 1",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("latest_batch_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let batch_id: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("latest_batch_id row: {e}")))?;
                Ok(Some(batch_id))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("latest_batch_id: {e}"))),
        }
    }

    // ── Items ───────────────────────────────────────────────────────

    async fn list_items(&self, batch_id: &str) -> Result<Vec<TriageItem>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {ITEM_COLUMNS} FROM triage_items WHERE batch_id = ?1 ORDER BY id ASC"),
                params![batch_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_items: {e}")))?;
        collect_items(rows, "list_items").await
    }

    async fn get_item(
        &self,
        batch_id: &str,
        message_id: &str,
    ) -> Result<Option<TriageItem>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ITEM_COLUMNS} FROM triage_items WHERE batch_id = ?1 AND message_id = ?2"
                ),
                params![batch_id, message_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_item: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_item(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_item: {e}"))),
        }
    }

    // ── Approvals ───────────────────────────────────────────────────

    async fn record_approvals(
        &self,
        batch_id: &str,
        approvals: &[(String, Approval)],
    ) -> Result<usize, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("record_approvals begin: {e}")))?;

        match update_approval_rows(&tx, batch_id, approvals).await {
            Ok(updated) => {
                tx.commit()
                    .await
                    .map_err(|e| DatabaseError::Query(format!("record_approvals commit: {e}")))?;
                Ok(updated)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, "record_approvals rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn list_approved(&self, batch_id: &str) -> Result<Vec<ApprovalView>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT message_id, approved, edited_draft_body, category FROM triage_items
                 WHERE batch_id = ?1 AND approved = 1 ORDER BY id DESC",
                params![batch_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_approved: {e}")))?;

        let mut approved = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_approved: {e}")))?
        {
            approved.push(ApprovalView {
                message_id: row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("list_approved row: {e}")))?,
                approved: row.get::<i64>(1).unwrap_or(0) != 0,
                edited_draft_body: row.get(2).ok(),
                category: row.get(3).unwrap_or_default(),
            });
        }
        Ok(approved)
    }

    // ── Apply ───────────────────────────────────────────────────────

    async fn pending_apply(&self, batch_id: &str) -> Result<Vec<TriageItem>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ITEM_COLUMNS} FROM triage_items
                     WHERE batch_id = ?1 AND approved = 1 AND applied = 0 ORDER BY id ASC"
                ),
                params![batch_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("pending_apply: {e}")))?;
        collect_items(rows, "pending_apply").await
    }

    async fn claim_item(
        &self,
        item_id: i64,
        token: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let count = self
            .conn()
            .execute(
                "UPDATE triage_items SET claim_token = ?1, claimed_at = ?2
                 WHERE id = ?3 AND approved = 1 AND applied = 0
                   AND (claim_token IS NULL OR claimed_at IS NULL OR claimed_at < ?4)",
                params![
                    token,
                    format_timestamp(&now),
                    item_id,
                    format_timestamp(&stale_before),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim_item: {e}")))?;
        Ok(count == 1)
    }

    async fn release_claim(&self, item_id: i64, token: &str) -> Result<(), DatabaseError> {
        let _guard = self.write_lock.lock().await;
        self.conn()
            .execute(
                "UPDATE triage_items SET claim_token = NULL, claimed_at = NULL
                 WHERE id = ?1 AND claim_token = ?2",
                params![item_id, token],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("release_claim: {e}")))?;
        Ok(())
    }

    async fn complete_apply(
        &self,
        item_id: i64,
        token: &str,
        entry: &ApplyLogEntry,
    ) -> Result<bool, DatabaseError> {
        let _guard = self.write_lock.lock().await;
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("complete_apply begin: {e}")))?;

        match complete_apply_rows(&tx, item_id, token, entry).await {
            Ok(true) => {
                tx.commit()
                    .await
                    .map_err(|e| DatabaseError::Query(format!("complete_apply commit: {e}")))?;
                Ok(true)
            }
            Ok(false) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, "complete_apply rollback failed");
                }
                Ok(false)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, "complete_apply rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn list_apply_log(&self, batch_id: &str) -> Result<Vec<ApplyLogEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {LOG_COLUMNS} FROM apply_log WHERE batch_id = ?1 ORDER BY id ASC"),
                params![batch_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_apply_log: {e}")))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_apply_log: {e}")))?
        {
            entries.push(row_to_log_entry(&row)?);
        }
        Ok(entries)
    }
}
