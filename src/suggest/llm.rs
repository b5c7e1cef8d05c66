//! Gemini-backed suggestion provider.
//!
//! Sends the whole batch of fetched messages in one `generateContent` call
//! and asks for a JSON document back.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::config::GeminiConfig;
use crate::error::SuggestError;
use crate::mailbox::FetchedMessage;
use crate::suggest::{SuggestionProvider, SuggestionSet, parse_items};

const TEMPERATURE: f64 = 0.2;

/// Build the system instruction for triage.
pub fn build_triage_system_prompt() -> String {
    r#"You are an email triage assistant.
Return ONLY valid JSON. No markdown. No commentary.

Categories:
- ARCHIVE: FYI/notifications/no action required
- READ_LATER: newsletters/long reads
- REPLY: sender expects a response
- TASK: should become a to-do (not immediate reply)
- DELEGATE: someone else should handle it

Rules:
- Minimize questions.
- Draft replies should be concise and professional.
- If ARCHIVE or READ_LATER: draft_reply and task_suggestion MUST be null.
- confidence is 0..1.
"#
    .to_string()
}

/// Build the user payload: preferences, the expected output shape, and the emails.
pub fn build_triage_payload(messages: &[FetchedMessage]) -> serde_json::Value {
    json!({
        "preferences": {
            "tone": "concise, warm, professional",
        },
        "required_output_json_shape": {
            "batch_summary": "string",
            "items": [{
                "message_id": "string",
                "thread_id": "string",
                "from": "string",
                "subject": "string",
                "date": "string",
                "category": "ARCHIVE|REPLY|TASK|READ_LATER|DELEGATE",
                "confidence": "number 0..1",
                "reason": "string",
                "suggested_labels": ["string"],
                "draft_reply": "null OR {to, cc[], subject, body}",
                "task_suggestion": "null OR {title, notes, due}",
                "questions_for_user": ["string"]
            }]
        },
        "emails": messages,
    })
}

/// Gemini suggestion provider (`llm` mode).
pub struct GeminiSuggester {
    api_key: SecretString,
    model: String,
    api_base: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiSuggester {
    pub fn new(
        api_key: SecretString,
        model: impl Into<String>,
        api_base: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SuggestError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SuggestError::Request(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_key,
            model: model.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn from_config(config: &GeminiConfig) -> Result<Self, SuggestError> {
        Self::new(
            config.api_key.clone(),
            config.model.clone(),
            config.api_base.clone(),
            config.timeout,
        )
    }

    fn endpoint(&self) -> String {
        let model = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };
        format!("{}/v1beta/{model}:generateContent", self.api_base)
    }
}

#[async_trait]
impl SuggestionProvider for GeminiSuggester {
    fn mode(&self) -> &'static str {
        "llm"
    }

    async fn suggest(&self, messages: &[FetchedMessage]) -> Result<SuggestionSet, SuggestError> {
        let payload = build_triage_payload(messages);
        let body = json!({
            "systemInstruction": {"parts": [{"text": build_triage_system_prompt()}]},
            "contents": [{"role": "user", "parts": [{"text": payload.to_string()}]}],
            "generationConfig": {
                "temperature": TEMPERATURE,
                "responseMimeType": "application/json",
            },
        });

        info!(model = %self.model, emails = messages.len(), "Requesting Gemini triage");

        let resp = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| SuggestError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(SuggestError::Request(format!(
                "generateContent returned {status}: {text}"
            )));
        }

        let response: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| SuggestError::InvalidResponse(e.to_string()))?;

        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(SuggestError::InvalidResponse("empty model response".into()));
        }
        debug!(len = text.len(), "Gemini response received");

        parse_suggestion_document(&text)
    }
}

/// Parse the model's JSON document into a suggestion set.
///
/// Accepts `{batch_summary, items}` or a bare array of items.
fn parse_suggestion_document(raw: &str) -> Result<SuggestionSet, SuggestError> {
    let value: serde_json::Value = serde_json::from_str(&extract_json(raw))?;

    let (summary, items) = match value {
        serde_json::Value::Array(items) => (String::new(), items),
        serde_json::Value::Object(mut map) => {
            let summary = map
                .remove("batch_summary")
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            let items = match map.remove("items") {
                Some(serde_json::Value::Array(items)) => items,
                _ => {
                    return Err(SuggestError::InvalidResponse(
                        "response has no items array".into(),
                    ));
                }
            };
            (summary, items)
        }
        other => {
            return Err(SuggestError::InvalidResponse(format!(
                "expected a JSON object, got {other}"
            )));
        }
    };

    Ok(SuggestionSet {
        summary,
        items: parse_items(items),
    })
}

/// Extract a JSON document from model output (handles markdown wrapping).
fn extract_json(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
