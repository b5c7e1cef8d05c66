//! Rule-based suggestion provider.
//!
//! Ordered pattern rules, first match wins:
//! - List-Unsubscribe header, "unsubscribe"/"newsletter" subjects → READ_LATER
//! - no-reply / notification senders → ARCHIVE
//! - intro and scheduling subjects → REPLY
//! - anything else → ARCHIVE
//!
//! No model calls; every suggestion gets the same fixed confidence.

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::error::SuggestError;
use crate::mailbox::FetchedMessage;
use crate::suggest::{Suggestion, SuggestionProvider, SuggestionSet};
use crate::triage::model::Category;

/// Confidence attached to every rule-based suggestion.
pub const RULE_CONFIDENCE: f64 = 0.6;

/// Which field a rule matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleField {
    Sender,
    Subject,
}

/// What a rule checks.
#[derive(Debug, Clone)]
pub enum RuleCondition {
    /// The message carries a List-Unsubscribe header.
    UnsubscribeHeader,
    /// A field matches a compiled regex.
    Matches { field: RuleField, regex: Regex },
}

/// A single categorization rule.
#[derive(Debug, Clone)]
pub struct TriageRule {
    pub condition: RuleCondition,
    pub category: Category,
    /// Why this rule triggers.
    pub reason: String,
}

impl TriageRule {
    fn matches(&self, message: &FetchedMessage) -> bool {
        match &self.condition {
            RuleCondition::UnsubscribeHeader => message.has_unsubscribe_header,
            RuleCondition::Matches { field, regex } => match field {
                RuleField::Sender => regex.is_match(&message.sender),
                RuleField::Subject => regex.is_match(&message.subject),
            },
        }
    }
}

/// Rule engine used in `mock` mode.
pub struct RuleSuggester {
    rules: Vec<TriageRule>,
}

impl RuleSuggester {
    /// Create a suggester with the default rule set.
    pub fn default_rules() -> Result<Self, regex::Error> {
        let read_later = "Newsletter/marketing signal.";
        let rules = vec![
            TriageRule {
                condition: RuleCondition::UnsubscribeHeader,
                category: Category::ReadLater,
                reason: read_later.into(),
            },
            TriageRule {
                condition: RuleCondition::Matches {
                    field: RuleField::Subject,
                    regex: Regex::new(r"(?i)(unsubscribe|newsletter)")?,
                },
                category: Category::ReadLater,
                reason: read_later.into(),
            },
            TriageRule {
                condition: RuleCondition::Matches {
                    field: RuleField::Sender,
                    regex: Regex::new(r"(?i)(no-reply|noreply|do-not-reply|notifications@)")?,
                },
                category: Category::Archive,
                reason: "Automated notification sender.".into(),
            },
            TriageRule {
                condition: RuleCondition::Matches {
                    field: RuleField::Subject,
                    regex: Regex::new(r"(?i)(intro|introduction|meeting|quick chat|availability)")?,
                },
                category: Category::Reply,
                reason: "Likely expects a response (intro/scheduling keywords).".into(),
            },
        ];
        Ok(Self { rules })
    }

    /// Categorize one message. Always yields a category.
    pub fn evaluate(&self, message: &FetchedMessage) -> (Category, &str) {
        for rule in &self.rules {
            if rule.matches(message) {
                debug!(
                    message_id = %message.message_id,
                    category = %rule.category,
                    reason = %rule.reason,
                    "Rule matched"
                );
                return (rule.category, &rule.reason);
            }
        }
        (Category::Archive, "Default: no clear action requested.")
    }
}

#[async_trait]
impl SuggestionProvider for RuleSuggester {
    fn mode(&self) -> &'static str {
        "mock"
    }

    async fn suggest(&self, messages: &[FetchedMessage]) -> Result<SuggestionSet, SuggestError> {
        let items: Vec<Suggestion> = messages
            .iter()
            .map(|m| {
                let (category, reason) = self.evaluate(m);
                Suggestion {
                    message_id: Some(m.message_id.clone()),
                    thread_id: m.thread_id.clone(),
                    from: Some(m.sender.clone()),
                    subject: Some(m.subject.clone()),
                    date: Some(m.date.clone()),
                    snippet: Some(m.snippet.clone()),
                    category: Some(category.as_str().to_string()),
                    confidence: Some(serde_json::json!(RULE_CONFIDENCE)),
                    reason: Some(reason.to_string()),
                    suggested_labels: Some(vec![category.target_label().to_string()]),
                    ..Default::default()
                }
            })
            .collect();

        Ok(SuggestionSet {
            summary: format!("Rule-based triage: processed {} emails.", items.len()),
            items,
        })
    }
}
