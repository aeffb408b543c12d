//! TCP reachability probes.
//!
//! Each probe periodically connects to its target and publishes the result
//! into the [`SignalRegistry`]: component health under the probe's name and
//! connect latency as the gauge `probe.<name>.latency_ms`.

use crate::config::ProbeConfig;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vigil_common::signals::{HealthStatus, SignalRegistry};

/// Outcome of a single probe attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeOutcome {
    pub status: HealthStatus,
    pub latency: Option<Duration>,
}

pub fn latency_gauge(name: &str) -> String {
    format!("probe.{name}.latency_ms")
}

/// Connects once. A connection slower than half the timeout is reported as
/// degraded.
pub async fn probe_once(addr: &str, timeout: Duration) -> ProbeOutcome {
    let start = Instant::now();
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => {
            let latency = start.elapsed();
            let status = if latency > timeout / 2 {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            };
            ProbeOutcome {
                status,
                latency: Some(latency),
            }
        }
        Ok(Err(e)) => {
            tracing::debug!(addr, error = %e, "Probe connection failed");
            ProbeOutcome {
                status: HealthStatus::Unhealthy,
                latency: None,
            }
        }
        Err(_) => {
            tracing::debug!(addr, timeout_secs = timeout.as_secs(), "Probe timed out");
            ProbeOutcome {
                status: HealthStatus::Unhealthy,
                latency: None,
            }
        }
    }
}

/// Runs one probe and records its outcome.
pub async fn run_probe(cfg: &ProbeConfig, signals: &SignalRegistry) -> ProbeOutcome {
    let outcome = probe_once(&cfg.addr, Duration::from_secs(cfg.timeout_secs.max(1))).await;
    let previous = signals.health(&cfg.name).map(|r| r.status);
    if previous != Some(outcome.status) {
        tracing::info!(
            probe = %cfg.name,
            addr = %cfg.addr,
            status = %outcome.status,
            "Probe status changed"
        );
    }
    signals.set_health(&cfg.name, outcome.status);
    if let Some(latency) = outcome.latency {
        signals.set_gauge(&latency_gauge(&cfg.name), latency.as_secs_f64() * 1000.0);
    }
    outcome
}

/// Spawns one loop per probe. Loops exit when `cancel` fires.
pub fn spawn_probes(
    probes: &[ProbeConfig],
    signals: &SignalRegistry,
    cancel: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    probes
        .iter()
        .cloned()
        .map(|cfg| {
            let signals = signals.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let interval = Duration::from_secs(cfg.interval_secs.max(1));
                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = run_probe(&cfg, &signals) => {}
                    }
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
                tracing::debug!(probe = %cfg.name, "Probe loop stopped");
            })
        })
        .collect()
}
