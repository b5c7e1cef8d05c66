//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Which suggestion provider produces the items of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestMode {
    /// Rule-based suggestions, no model calls.
    Mock,
    /// Model-backed suggestions (Gemini).
    Llm,
}

impl SuggestMode {
    /// Tag recorded on every batch built in this mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::Llm => "llm",
        }
    }
}

impl std::str::FromStr for SuggestMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" | "" => Ok(Self::Mock),
            "llm" => Ok(Self::Llm),
            other => Err(ConfigError::InvalidValue {
                key: "TRIAGE_MODE".into(),
                message: format!("expected 'mock' or 'llm', got '{other}'"),
            }),
        }
    }
}

/// Gmail REST client settings.
#[derive(Debug, Clone)]
pub struct GmailConfig {
    /// JSON file holding the stored OAuth access token.
    pub token_path: PathBuf,
    /// API base URL (overridable for tests).
    pub api_base: String,
    pub timeout: Duration,
}

/// Gemini suggestion provider settings.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: SecretString,
    pub model: String,
    pub api_base: String,
    pub timeout: Duration,
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    pub db_path: PathBuf,
    pub mode: SuggestMode,
    /// Page size used when a run does not ask for one.
    pub default_max_results: u32,
    pub port: u16,
    /// Claims older than this are treated as abandoned and may be re-claimed.
    pub claim_lease: Duration,
    /// Directory for the rolling log file; stderr only when unset.
    pub log_dir: Option<PathBuf>,
    pub gmail: GmailConfig,
    /// Present only in `llm` mode.
    pub gemini: Option<GeminiConfig>,
}

pub const DEFAULT_GMAIL_API_BASE: &str = "https://gmail.googleapis.com";
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "models/gemini-2.0-flash-lite";

impl TriageConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let db_path = std::env::var("TRIAGE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/app.db"));

        let mode: SuggestMode = std::env::var("TRIAGE_MODE")
            .unwrap_or_default()
            .parse()?;

        let default_max_results = parse_env("TRIAGE_MAX_RESULTS", 20u32)?;
        let port = parse_env("TRIAGE_PORT", 8000u16)?;
        let claim_lease = Duration::from_secs(parse_env("TRIAGE_CLAIM_LEASE_SECS", 300u64)?);
        let timeout = Duration::from_secs(parse_env("TRIAGE_HTTP_TIMEOUT_SECS", 30u64)?);
        let log_dir = std::env::var("TRIAGE_LOG_DIR").ok().map(PathBuf::from);

        let gmail = GmailConfig {
            token_path: std::env::var("GMAIL_TOKEN_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/token.json")),
            api_base: std::env::var("GMAIL_API_BASE")
                .unwrap_or_else(|_| DEFAULT_GMAIL_API_BASE.to_string()),
            timeout,
        };

        let gemini = match mode {
            SuggestMode::Mock => None,
            SuggestMode::Llm => {
                let api_key = std::env::var("GEMINI_API_KEY")
                    .map_err(|_| ConfigError::MissingEnvVar("GEMINI_API_KEY".into()))?;
                Some(GeminiConfig {
                    api_key: SecretString::from(api_key),
                    model: std::env::var("GEMINI_MODEL")
                        .unwrap_or_else(|_| DEFAULT_GEMINI_MODEL.to_string()),
                    api_base: std::env::var("GEMINI_API_BASE")
                        .unwrap_or_else(|_| DEFAULT_GEMINI_API_BASE.to_string()),
                    timeout,
                })
            }
        };

        Ok(Self {
            db_path,
            mode,
            default_max_results,
            port,
            claim_lease,
            log_dir,
            gmail,
            gemini,
        })
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })
        }
        _ => Ok(default),
    }
}
