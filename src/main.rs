// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! `mirror-agent` binary: load configuration, run until SIGINT/SIGTERM.

use anyhow::Context;
use clap::Parser;
use mirror_agent::{AgentConfig, KafkaConnectionFactory, MirrorAgent, MirrorError};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Mirror topics between two Kafka-compatible clusters
#[derive(Parser, Debug)]
#[command(name = "mirror-agent", version)]
#[command(
    about = "Per-topic, per-direction record mirroring between two Kafka clusters",
    long_about = None
)]
struct Args {
    /// YAML configuration file. Without it every key takes its default.
    #[arg(long, short = 'c', env = "MIRROR_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, short = 'v')]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(args: &Args) {
    let default_filter = if args.verbose {
        "mirror_agent=debug,mirror_agent::kafka=debug"
    } else {
        "mirror_agent=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if args.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = match args.config {
        Some(ref path) => AgentConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AgentConfig::from_yaml_str("").context("default configuration")?,
    };

    let agent = MirrorAgent::connect(config, &KafkaConnectionFactory::new())?;
    tracing::info!(agent_id = %agent.agent_id(), "Mirror agent configured");

    let report = agent.run_until(shutdown_signal()).await?;
    if !report.is_clean() {
        tracing::warn!(
            unfinished = ?report.unfinished,
            close_error = ?report.close_error,
            "Shutdown was not clean"
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let fatal = e
                .downcast_ref::<MirrorError>()
                .map(MirrorError::is_fatal)
                .unwrap_or(true);
            tracing::error!(error = format!("{:#}", e), fatal, "Mirror agent exited with an error");
            ExitCode::FAILURE
        }
    }
}
