use std::io;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use writers_backup_cli::cli::{Cli, Command};
use writers_backup_cli::commands;
use writers_backup_cli::config::{self, Config};
use writers_backup_core::BackupEvent;
use writers_backup_storage::{BackupEngine, EventSink};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };
    init_tracing(&cfg)?;
    if let Some(path) = &cli.config {
        info!(?path, "loaded config file");
    }

    let settings = config::resolve_settings(&cfg)?;
    debug!(?settings, "resolved settings");

    let stream_events = cli.json && matches!(cli.command, Command::Watch { .. });
    let (sink, rx) = EventSink::channel();
    let drain = tokio::spawn(drain_events(rx, stream_events));

    let engine = BackupEngine::new(settings, sink).context("invalid backup settings")?;
    let ok = commands::run(cli.command, &engine, cli.json, &mut io::stdout()).await?;

    // closes the event channel so the drain task can finish
    drop(engine);
    drain.await.context("event drain task failed")?;

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn init_tracing(cfg: &Config) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(cfg.logging.filter())
            .with_context(|| format!("invalid [logging] filter {:?}", cfg.logging.filter()))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
    Ok(())
}

async fn drain_events(mut rx: tokio::sync::mpsc::UnboundedReceiver<BackupEvent>, print: bool) {
    while let Some(event) = rx.recv().await {
        if print {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => debug!(error = %e, "failed to serialize event"),
            }
        } else {
            debug!(event = event.name(), path = %event.path().display(), "event");
        }
    }
}
