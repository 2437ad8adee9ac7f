//! # prdigest — scheduled pull-request digest emails
//!
//! Watches named authors on specific repositories, summarises their
//! pull-request activity with an LLM, and emails the digest to
//! configured recipients on each monitoring entry's schedule.
//!
//! Usage:
//!   prdigest                          # Run the scheduler loop
//!   prdigest --config ./digest.toml   # Explicit config file
//!   prdigest --trigger mon-abc123     # Queue one manual run and exit

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use prdigest_channels::EmailChannel;
use prdigest_core::types::RunStatus;
use prdigest_core::DigestConfig;
use prdigest_host::{HostActivitySource, HostClient};
use prdigest_providers::LlmSummarizer;
use prdigest_scheduler::reaper::{reap_abandoned, run_sweeper};
use prdigest_scheduler::{ExecutorConfig, PipelineHooks, RunExecutor, TickLoop};
use prdigest_store::{CredentialCipher, Store};

#[derive(Parser)]
#[command(
    name = "prdigest",
    version,
    about = "📬 prdigest — scheduled pull-request digest emails"
)]
struct Cli {
    /// Config file path (default: ~/.prdigest/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Queue a manual run for one monitoring entry, wait for it, exit
    #[arg(long, value_name = "ENTRY_ID")]
    trigger: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "prdigest=debug"
    } else {
        "prdigest=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => DigestConfig::load_from(path),
        None => DigestConfig::load(),
    }
    .context("failed to load configuration")?;

    let store = Arc::new(
        Store::open(Path::new(&config.database_path)).context("failed to open the store")?,
    );

    // Crash leftovers first: close abandoned runs, un-stick entries.
    let grace = chrono::Duration::seconds(config.grace_window_secs as i64);
    match reap_abandoned(&store, grace) {
        Ok(0) => {}
        Ok(n) => tracing::info!("startup reaper closed {n} abandoned runs"),
        Err(e) => tracing::warn!("startup reaper failed: {e}"),
    }

    let cipher = {
        let key = config.security.resolved_key();
        if key.is_empty() {
            tracing::warn!("no credential key configured; per-repository tokens are unavailable");
            None
        } else {
            Some(CredentialCipher::from_passphrase(&key)?)
        }
    };

    let source = Arc::new(HostActivitySource::new(HostClient::new(&config.host)?));
    let summarizer = Arc::new(LlmSummarizer::new(&config.llm).context("LLM configuration")?);
    let channel = Arc::new(EmailChannel::new(&config.smtp).context("SMTP configuration")?);

    let executor = Arc::new(RunExecutor::new(
        store.clone(),
        cipher,
        source,
        summarizer,
        channel,
        ExecutorConfig {
            default_fetch_window: chrono::Duration::hours(config.default_fetch_window_hours),
            host_token: (!config.host.token.is_empty()).then(|| config.host.token.clone()),
        },
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let (manual_tx, manual_rx) = tokio::sync::mpsc::channel(16);
    let hooks = PipelineHooks::new(store.clone(), manual_tx);

    let sweeper = tokio::spawn(run_sweeper(store.clone(), grace, shutdown_rx.clone()));
    let tick = TickLoop::new(
        store.clone(),
        executor,
        Duration::from_secs(config.poll_period_secs),
        shutdown_rx,
        manual_rx,
    );
    let worker = tokio::spawn(tick.run());

    println!("📬 prdigest v{}", env!("CARGO_PKG_VERSION"));
    println!("   🗄️  Database:    {}", config.database_path);
    println!("   ⏰ Poll period: {}s", config.poll_period_secs);
    println!("   📨 SMTP:        {} ({})", config.smtp.provider, config.smtp.user);
    println!("   🤖 Model:       {}", config.llm.model);
    println!();

    if let Some(entry_id) = &cli.trigger {
        let run_id = hooks.trigger_now(entry_id, None).await?;
        println!("🔔 Manual run queued: {run_id}");
        loop {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let run = hooks.get_run(&run_id)?;
            if run.status != RunStatus::Started {
                println!(
                    "✅ Run {run_id} closed: {} / delivery {}",
                    run.status.as_str(),
                    run.delivery
                        .map(|d| d.status.as_str())
                        .unwrap_or("none")
                );
                break;
            }
        }
        shutdown_tx.send(true).ok();
    } else {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for ctrl-c")?;
        tracing::info!("shutdown signal received, letting the current run finish");
        shutdown_tx.send(true).ok();
    }

    // Cooperative shutdown: the in-progress run gets the grace window,
    // after which it is abandoned for the next startup's reaper.
    let grace_window = Duration::from_secs(config.grace_window_secs);
    if tokio::time::timeout(grace_window, worker).await.is_err() {
        tracing::warn!("worker did not stop within the grace window, abandoning current run");
    }
    sweeper.abort();
    Ok(())
}
