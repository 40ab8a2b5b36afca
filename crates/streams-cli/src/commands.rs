use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use colored::Colorize;
use streams_ingest::{FeedSource, UpstreamIngestor};
use streams_server::ReplayServer;
use streams_store::{LogStore, StoreResult};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cli::*;
use crate::config::NodeConfig;
use crate::export::{export, ExportOptions};
use crate::supervisor::{shutdown_signal, Supervisor, SupervisorError};

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Run(args) => cmd_run(cli.config.as_deref(), args).await,
        Command::Export(args) => cmd_export(args).await,
    }
}

fn signal_token() -> CancellationToken {
    let root = CancellationToken::new();
    let trigger = root.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });
    root
}

async fn cmd_run(config_path: Option<&Path>, args: RunArgs) -> anyhow::Result<()> {
    let mut config = NodeConfig::load(config_path)?;
    config.apply_overrides(&args);

    let names = stream_names(&args.symbols);
    info!(streams = ?names, root = %config.root().display(), "starting");

    let store = LogStore::open(names.iter().cloned(), config.root(), &config.store)
        .with_context(|| format!("open log store at {}", config.root().display()))?;
    let store = Arc::new(store);

    let server = Arc::new(ReplayServer::new(config.server.clone(), Arc::clone(&store)));
    let listener = server
        .bind()
        .await
        .with_context(|| format!("bind {}", config.server.bind_addr))?;
    let feed: Arc<dyn FeedSource> = Arc::new(UpstreamIngestor::new(
        Arc::clone(&store),
        config.upstream.clone(),
    ));

    eprintln!(
        "{} Recording {} stream(s) into {}, replay on {}",
        "✓".green().bold(),
        names.len().to_string().bold(),
        config.root().display(),
        config.server.bind_addr.to_string().cyan(),
    );

    let supervisor = Supervisor::new(
        server,
        feed,
        config.upstream.retry_state(),
        config.server.shutdown_timeout(),
    );
    let outcome = supervisor.run(listener, signal_token()).await;

    let closed = close_store(store);
    finish(outcome, closed)?;
    info!("exit");
    Ok(())
}

fn close_store(store: Arc<LogStore>) -> StoreResult<()> {
    match Arc::try_unwrap(store) {
        Ok(store) => store.close(),
        Err(_) => {
            warn!("log store still referenced at exit; databases released on drop");
            Ok(())
        }
    }
}

/// The supervisor's failure wins; a close failure behind it is only logged.
fn finish(outcome: Result<(), SupervisorError>, closed: StoreResult<()>) -> anyhow::Result<()> {
    if let Err(e) = outcome {
        if let Err(close) = closed {
            error!(error = %close, "close log store failed");
        }
        return Err(anyhow::Error::new(e).context("supervisor"));
    }
    closed.context("close log store")
}

async fn cmd_export(args: ExportArgs) -> anyhow::Result<()> {
    let options = ExportOptions {
        url: args.url,
        connect_timeout: Duration::from_secs(args.connect_timeout),
        message_timeout: Duration::from_secs(args.message_timeout),
    };
    let written = export(&options, io::stdout(), &signal_token()).await?;
    eprintln!("{} Exported {} trade(s)", "✓".green().bold(), written.to_string().bold());
    Ok(())
}
