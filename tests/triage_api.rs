//! Integration tests for the triage REST API.
//!
//! Each test spins up an Axum server on a random port backed by an in-memory
//! database and fake mailbox collaborators, then drives it over HTTP.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use inbox_triage::error::MailboxError;
use inbox_triage::mailbox::{FetchedMessage, LabelService, MailboxReader};
use inbox_triage::routes::triage_routes;
use inbox_triage::store::{LibSqlBackend, TriageStore};
use inbox_triage::suggest::RuleSuggester;
use inbox_triage::triage::model::LABEL_VOCABULARY;
use inbox_triage::triage::{TriageService, TriageServiceParts};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

struct StubInbox {
    messages: Vec<FetchedMessage>,
}

#[async_trait]
impl MailboxReader for StubInbox {
    async fn fetch_recent_messages(&self, limit: u32) -> Result<Vec<FetchedMessage>, MailboxError> {
        Ok(self.messages.iter().take(limit as usize).cloned().collect())
    }
}

/// Records (message_id, add_label_id, remove_label_ids) for every change.
#[derive(Default)]
struct RecordingLabels {
    changes: Mutex<Vec<(String, String, Vec<String>)>>,
}

impl RecordingLabels {
    fn changes(&self) -> Vec<(String, String, Vec<String>)> {
        self.changes.lock().unwrap().clone()
    }
}

#[async_trait]
impl LabelService for RecordingLabels {
    async fn ensure_label_vocabulary(&self) -> Result<HashMap<String, String>, MailboxError> {
        Ok(LABEL_VOCABULARY
            .iter()
            .map(|name| (name.to_string(), format!("Label_{name}")))
            .collect())
    }

    async fn apply_label_change(
        &self,
        message_id: &str,
        add_label_id: &str,
        remove_label_ids: &[String],
    ) -> Result<(), MailboxError> {
        self.changes.lock().unwrap().push((
            message_id.to_string(),
            add_label_id.to_string(),
            remove_label_ids.to_vec(),
        ));
        Ok(())
    }
}

fn message(id: &str, sender: &str, subject: &str) -> FetchedMessage {
    FetchedMessage {
        message_id: id.into(),
        thread_id: Some(format!("t-{id}")),
        sender: sender.into(),
        subject: subject.into(),
        date: "Mon, 5 Jan 2026 10:00:00 +0000".into(),
        snippet: format!("snippet {id}"),
        ..Default::default()
    }
}

/// Start an Axum server on a random port, return (base url, labels).
async fn start_server() -> (String, Arc<RecordingLabels>) {
    let store: Arc<dyn TriageStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let labels = Arc::new(RecordingLabels::default());
    let inbox = StubInbox {
        messages: vec![
            message("A", "noreply@shop.example", "Your order shipped"),
            message("B", "carol@example.com", "Intro: Carol <> Dave"),
            message("C", "news@letters.example", "Weekly newsletter"),
        ],
    };

    let service = Arc::new(TriageService::new(TriageServiceParts {
        store,
        mailbox: Arc::new(inbox),
        labels: labels.clone(),
        suggester: Arc::new(RuleSuggester::default_rules().unwrap()),
        claim_lease: Duration::from_secs(300),
        default_max_results: 20,
    }));
    let app = triage_routes(service);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://127.0.0.1:{port}"), labels)
}

async fn run_batch(client: &reqwest::Client, base: &str) -> String {
    let resp = client
        .post(format!("{base}/triage/run?max_results=10"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    body["batch_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_reports_mode() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server().await;
        let body: Value = reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["mode"], "mock");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn empty_database_has_no_latest_batch() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .get(format!("{base}/triage/batches/latest"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("No batches found"));

        let resp = client
            .post(format!("{base}/triage/apply"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn run_creates_batch_with_rule_suggestions() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/triage/run?max_results=10"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["mode"], "mock");
        let categories: Vec<&str> = body["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["category"].as_str().unwrap())
            .collect();
        assert_eq!(categories, vec!["ARCHIVE", "REPLY", "READ_LATER"]);

        let latest: Value = client
            .get(format!("{base}/triage/batches/latest"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(latest["batch_id"], body["batch_id"]);
        assert_eq!(latest["max_results"], 10);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn approve_without_batch_id_is_bad_request() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server().await;
        let client = reqwest::Client::new();
        run_batch(&client, &base).await;

        let resp = client
            .post(format!("{base}/triage/approve"))
            .json(&json!({"approvals": {"A": {"category": "ARCHIVE"}}}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let approvals: Value = client
            .get(format!("{base}/triage/approvals"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(approvals["approvals"].as_array().unwrap().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn malformed_approve_body_is_json_error() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/triage/approve"))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().starts_with("Invalid request"));

        let resp = client
            .post(format!("{base}/triage/approve"))
            .body(r#"{"batch_id": "b1"}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].is_string());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn approve_apply_lifecycle() {
    timeout(TEST_TIMEOUT, async {
        let (base, labels) = start_server().await;
        let client = reqwest::Client::new();
        let batch_id = run_batch(&client, &base).await;

        // Approve A (archive) and B (reply); "ghost" is not in the batch.
        let resp = client
            .post(format!("{base}/triage/approve"))
            .json(&json!({
                "batch_id": batch_id,
                "approvals": {
                    "A": {"category": "archive"},
                    "B": {"category": "REPLY", "edited_draft_body": "Happy to connect!"},
                    "ghost": {}
                }
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["approved_count"], 2);

        let approvals: Value = client
            .get(format!("{base}/triage/approvals?batch_id={batch_id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(approvals["approvals"].as_array().unwrap().len(), 2);

        // Apply defaults to the latest batch.
        let report: Value = client
            .post(format!("{base}/triage/apply"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(report["batch_id"], batch_id.as_str());
        assert_eq!(report["applied"].as_array().unwrap().len(), 2);
        assert!(report["errors"].as_array().unwrap().is_empty());

        let changes = labels.changes();
        assert_eq!(changes.len(), 2);
        let a = changes.iter().find(|c| c.0 == "A").unwrap();
        assert_eq!(a.1, "Label_Triage/Done");
        assert_eq!(a.2, vec!["INBOX"]);
        let b = changes.iter().find(|c| c.0 == "B").unwrap();
        assert_eq!(b.1, "Label_Triage/Now");
        assert!(b.2.is_empty());

        // C was never approved and is untouched.
        assert!(changes.iter().all(|c| c.0 != "C"));

        // A second apply does nothing.
        let again: Value = client
            .post(format!("{base}/triage/apply?batch_id={batch_id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(again["applied"].as_array().unwrap().is_empty());
        assert_eq!(again["skipped"].as_array().unwrap().len(), 1);
        assert_eq!(labels.changes().len(), 2);

        let log: Value = client
            .get(format!("{base}/triage/batches/{batch_id}/apply-log"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let entries = log["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        let a_entry = entries.iter().find(|e| e["message_id"] == "A").unwrap();
        assert_eq!(a_entry["removed_inbox"], true);
        assert_eq!(a_entry["labels_added"], json!(["Triage/Done"]));

        let items: Value = client
            .get(format!("{base}/triage/batches/{batch_id}/items"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let items = items["items"].as_array().unwrap();
        let b_item = items.iter().find(|i| i["message_id"] == "B").unwrap();
        assert_eq!(b_item["applied"], true);
        assert_eq!(b_item["edited_draft_body"], "Happy to connect!");
        let c_item = items.iter().find(|i| i["message_id"] == "C").unwrap();
        assert_eq!(c_item["approved"], false);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unknown_batch_items_are_not_found() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server().await;
        let resp = reqwest::get(format!("{base}/triage/batches/nope/items"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn zero_page_size_is_bad_request() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server().await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/triage/run?max_results=0"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    })
    .await
    .expect("test timed out");
}
