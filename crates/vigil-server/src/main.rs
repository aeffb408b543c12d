use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use vigil_alert::AlertEngine;
use vigil_common::signals::SignalRegistry;
use vigil_notify::plugin::ChannelRegistry;

use vigil_server::config::ServerConfig;
use vigil_server::{probe, rule_builder};

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  vigil-server [config.toml]    Start the alerting daemon (default: config/server.toml)");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("vigil=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(|s| s.as_str()) {
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        path => run_server(path.unwrap_or("config/server.toml")).await,
    }
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    tracing::info!(
        config = %config_path,
        interval_secs = config.engine.interval_secs,
        history_limit = config.engine.history_limit,
        "Starting vigil-server"
    );

    let signals = SignalRegistry::new();
    let engine = Arc::new(AlertEngine::new(config.engine.clone()));

    let registry = ChannelRegistry::default();
    let channels = rule_builder::load_channels(&engine, &config.channels, &registry);
    let rules = rule_builder::load_rules(&engine, &config.rules, &signals);
    if channels == 0 {
        tracing::warn!("No delivery channels configured, alerts will only be logged");
    }
    tracing::info!(channels, rules, probes = config.probes.len(), "Configuration loaded");

    let cancel = CancellationToken::new();
    let probe_handles = probe::spawn_probes(&config.probes, &signals, &cancel);
    engine.start_monitoring();

    signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    cancel.cancel();
    for handle in probe_handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Probe task ended abnormally");
        }
    }
    engine.stop_monitoring().await;

    let summary = engine.summary();
    tracing::info!(
        active = summary.active_total,
        history = summary.history_len,
        "vigil-server stopped"
    );
    Ok(())
}
