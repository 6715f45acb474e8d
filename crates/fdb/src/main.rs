use std::{process::ExitCode, sync::Arc};

use fdb_core::{config::Config, session};
use fdb_discord::connection::DiscordConnector;
use fdb_tail::{FileFollowSource, TailConfig};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = fdb_core::logging::init("fdb") {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "bridge failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> fdb_core::Result<()> {
    let cfg = Arc::new(Config::load()?);
    tracing::debug!(config = ?cfg, "loaded configuration");

    let source = FileFollowSource::new(TailConfig {
        poll_interval: cfg.poll_interval,
        ..TailConfig::default()
    });

    session::run(cfg, &DiscordConnector, &source, shutdown_signal()).await?;
    Ok(())
}

/// Resolves on SIGINT or SIGTERM. Only polled once the bridge is running.
async fn shutdown_signal() {
    tracing::info!("bridge is running, press CTRL-C to exit");

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                  _ = tokio::signal::ctrl_c() => tracing::info!("SIGINT received, shutting down"),
                  _ = term.recv() => tracing::info!("SIGTERM received, shutting down"),
                }
                return;
            }
            Err(e) => tracing::warn!(error = %e, "cannot listen for SIGTERM"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for CTRL-C, shutting down");
    } else {
        tracing::info!("SIGINT received, shutting down");
    }
}
