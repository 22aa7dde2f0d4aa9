//! `reply-agent`: runs the mention reply loop.
//!
//! ```bash
//! TWITTER_BEARER_TOKEN=... reply-agent --config ./config/reply-agent.toml
//! reply-agent --config ./config/reply-agent.toml --once
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use reply_agent::channels::TwitterChannel;
use reply_agent::config::{AppConfig, CursorBackend, LoggingConfig};
use reply_agent::inference::{HttpGenerator, HttpRetriever, HttpSpamClassifier};
use reply_agent::pipeline::{
    CycleOutcome, Dispatcher, Orchestrator, ReplyProcessor, SpamGate, TextPostProcessor,
};
use reply_agent::store::{AuditLog, ConsoleAuditSink, CursorStore, FileCursorStore, LibSqlStore};

/// Social-media reply agent: answers mentions from a retrieval index or a
/// generation model, suppressing spam.
#[derive(Parser)]
#[command(name = "reply-agent", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, default_value = "./config/reply-agent.toml")]
    config: PathBuf,

    /// Run a single poll cycle and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    let _log_guard = init_tracing(&config.logging)?;

    eprintln!("🤖 Reply agent v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Account: @{}", config.twitter.username);
    eprintln!("   Poll interval: {}s", config.agent.poll_interval_secs);

    // ── Collaborators ────────────────────────────────────────────────────
    let token = config.twitter.bearer_token()?;
    let twitter = Arc::new(TwitterChannel::new(&config.twitter, token)?);

    let spam = Arc::new(HttpSpamClassifier::new(&config.spam)?);
    let retriever = Arc::new(HttpRetriever::new(&config.retrieval)?);
    let generator = Arc::new(HttpGenerator::new(&config.generation)?);
    let postprocessor = Arc::new(TextPostProcessor::new(&config.postprocess)?);

    // ── Storage ──────────────────────────────────────────────────────────
    let database = match &config.store.database_path {
        Some(path) => match LibSqlStore::new_local(path).await {
            Ok(db) => {
                eprintln!("   Database: {}", path.display());
                Some(Arc::new(db))
            }
            Err(e) if config.cursor.backend == CursorBackend::Database => {
                return Err(e).context("cursor database unavailable");
            }
            Err(e) => {
                warn!(error = %e, "Audit database unavailable; console audit only");
                None
            }
        },
        None => None,
    };

    let cursor: Arc<dyn CursorStore> = match (config.cursor.backend, &database) {
        (CursorBackend::Database, Some(db)) => {
            eprintln!("   Cursor: database");
            db.clone() as Arc<dyn CursorStore>
        }
        (CursorBackend::Database, None) => bail!("cursor backend \"database\" needs [store].database_path"),
        (CursorBackend::File, _) => {
            eprintln!("   Cursor: {}", config.cursor.path.display());
            Arc::new(FileCursorStore::new(&config.cursor.path))
        }
    };

    let mut audit = AuditLog::new();
    if config.audit.console {
        audit = audit.with_sink(Arc::new(ConsoleAuditSink::stdout()));
    }
    if let Some(db) = &database {
        audit = audit.with_sink(db.clone());
    }
    info!(sinks = ?audit.sink_names(), "Audit sinks ready");

    // ── Orchestrator ─────────────────────────────────────────────────────
    let processor = ReplyProcessor::new(
        SpamGate::new(spam),
        retriever,
        generator,
        postprocessor,
        config.reply_settings(),
    );
    let dispatcher = Dispatcher::new(twitter.clone(), config.agent.acknowledge_replies);
    let mut orchestrator = Orchestrator::new(
        twitter,
        processor,
        dispatcher,
        cursor,
        audit,
        config.orchestrator(),
    );

    if cli.once {
        let outcome = orchestrator.run_cycle().await?;
        match outcome {
            CycleOutcome::Completed(report) => info!(?report, "Single cycle complete"),
            other => info!(outcome = ?other, "Single cycle complete"),
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping after the current cycle");
            let _ = shutdown_tx.send(true);
        }
    });

    if let Err(e) = orchestrator.run(shutdown_rx).await {
        error!(error = %e, class = ?e.class(), "Reply loop terminated");
        return Err(e.into());
    }
    Ok(())
}

/// Stderr logging filtered by `RUST_LOG` (else the configured filter), plus
/// an optional daily-rolling file log. The returned guard must be held until
/// exit so buffered file output is flushed.
fn init_tracing(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "reply-agent.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}
