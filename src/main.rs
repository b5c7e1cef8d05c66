use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use inbox_triage::config::TriageConfig;
use inbox_triage::mailbox::GmailClient;
use inbox_triage::routes::triage_routes;
use inbox_triage::store::{LibSqlBackend, TriageStore};
use inbox_triage::suggest::{GeminiSuggester, RuleSuggester, SuggestionProvider};
use inbox_triage::triage::{TriageService, TriageServiceParts};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = TriageConfig::from_env().context("Invalid configuration")?;

    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = init_tracing(config.log_dir.as_deref());

    eprintln!("📬 Inbox Triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mode: {}", config.mode.as_str());
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   API: http://0.0.0.0:{}/triage", config.port);

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn TriageStore> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );

    // ── Collaborators ────────────────────────────────────────────────────
    let gmail = Arc::new(GmailClient::from_config(&config.gmail)?);

    let suggester: Arc<dyn SuggestionProvider> = match &config.gemini {
        Some(gemini) => {
            tracing::info!(model = %gemini.model, "Using Gemini suggestions");
            Arc::new(GeminiSuggester::from_config(gemini)?)
        }
        None => Arc::new(RuleSuggester::default_rules()?),
    };

    let service = Arc::new(TriageService::new(TriageServiceParts {
        store,
        mailbox: gmail.clone(),
        labels: gmail,
        suggester,
        claim_lease: config.claim_lease,
        default_max_results: config.default_max_results,
    }));

    // ── HTTP server ──────────────────────────────────────────────────────
    let app = triage_routes(service);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "Triage server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await?;

    Ok(())
}

/// Install the stderr subscriber, plus a daily-rolling file layer when a log dir is set.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = fmt::layer().with_target(false).with_writer(std::io::stderr);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "inbox-triage.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .init();
            None
        }
    }
}
