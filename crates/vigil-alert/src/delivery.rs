//! Fan-out of one alert to every enabled channel.

use metrics::counter;
use std::sync::Arc;
use vigil_common::types::Alert;
use vigil_notify::DeliveryChannel;

pub const DELIVERY_OPERATIONS_TOTAL: &str = "alert_delivery_operations_total";
pub const DELIVERY_FAILURES_TOTAL: &str = "alert_delivery_failures_total";

/// Per-channel outcome of one delivery round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Delivers `alert` to all `channels` concurrently and waits for every
/// attempt. A channel that fails or panics is counted as failed and never
/// affects the others.
pub async fn fan_out(channels: Vec<Arc<dyn DeliveryChannel>>, alert: &Alert) -> DeliveryReport {
    let alert = Arc::new(alert.clone());
    let attempts: Vec<_> = channels
        .into_iter()
        .map(|channel| {
            let name = channel.name().to_string();
            let alert = Arc::clone(&alert);
            let handle = tokio::spawn(async move { channel.attempt_delivery(&alert).await });
            (name, handle)
        })
        .collect();

    let mut report = DeliveryReport::default();
    for (name, handle) in attempts {
        let delivered = match handle.await {
            Ok(delivered) => delivered,
            Err(e) => {
                tracing::error!(
                    channel = %name,
                    rule = %alert.rule_name,
                    error = %e,
                    "Delivery task aborted"
                );
                false
            }
        };
        record_outcome(&name, delivered);
        if delivered {
            report.succeeded.push(name);
        } else {
            report.failed.push(name);
        }
    }

    tracing::info!(
        rule = %alert.rule_name,
        severity = %alert.severity,
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        "Alert sent"
    );
    report
}

fn record_outcome(channel: &str, delivered: bool) {
    let outcome = if delivered { "success" } else { "failure" };
    counter!(
        DELIVERY_OPERATIONS_TOTAL,
        "channel" => channel.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    if !delivered {
        counter!(DELIVERY_FAILURES_TOTAL, "channel" => channel.to_string()).increment(1);
    }
}
