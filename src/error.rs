//! Error types for inbox triage.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors raised by the external mailbox (fetch, label vocabulary, label changes).
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Mailbox authorization failed: {0}")]
    Auth(String),

    #[error("Mailbox request failed: {0}")]
    Request(String),

    #[error("Invalid response from mailbox: {0}")]
    InvalidResponse(String),

    #[error("Label {0} is missing from the label vocabulary")]
    LabelMissing(String),
}

/// Errors raised by suggestion providers.
#[derive(Debug, thiserror::Error)]
pub enum SuggestError {
    #[error("Suggestion request failed: {0}")]
    Request(String),

    #[error("Invalid suggestion response: {0}")]
    InvalidResponse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by the batch / approval / apply operations.
#[derive(Debug, thiserror::Error)]
pub enum TriageError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No batches found. Run a triage first.")]
    NoBatchFound,

    #[error("Applying labels to message {message_id} failed: {reason}")]
    ExternalActionFailed { message_id: String, reason: String },

    #[error("Persistence failure: {0}")]
    Persistence(#[from] DatabaseError),

    #[error("Mailbox failure: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Suggestion failure: {0}")]
    Suggest(#[from] SuggestError),
}
