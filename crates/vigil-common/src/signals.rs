//! In-process registry of live system signals.
//!
//! Health probes and metric collectors publish into a [`SignalRegistry`];
//! alert rule conditions read from it through the query closures returned by
//! [`SignalRegistry::health_query`] and [`SignalRegistry::gauge_query`].

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
}

#[derive(Default)]
struct Signals {
    health: HashMap<String, HealthReport>,
    gauges: HashMap<String, f64>,
}

/// Cheaply cloneable handle; clones share the same underlying signals.
#[derive(Clone, Default)]
pub struct SignalRegistry {
    inner: Arc<RwLock<Signals>>,
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_health(&self, component: &str, status: HealthStatus) {
        let mut signals = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        signals.health.insert(
            component.to_string(),
            HealthReport {
                status,
                checked_at: Utc::now(),
            },
        );
    }

    pub fn health(&self, component: &str) -> Option<HealthReport> {
        let signals = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        signals.health.get(component).copied()
    }

    pub fn set_gauge(&self, metric: &str, value: f64) {
        let mut signals = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        signals.gauges.insert(metric.to_string(), value);
    }

    pub fn gauge(&self, metric: &str) -> Option<f64> {
        let signals = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        signals.gauges.get(metric).copied()
    }

    /// Returns a closure reporting the current status of `component`.
    ///
    /// The closure fails while the component has never reported, which a
    /// rule condition treats as "not met".
    pub fn health_query(
        &self,
        component: &str,
    ) -> impl Fn() -> Result<HealthStatus> + Send + Sync + 'static {
        let registry = self.clone();
        let component = component.to_string();
        move || {
            registry
                .health(&component)
                .map(|report| report.status)
                .ok_or_else(|| anyhow!("no health report for component '{component}'"))
        }
    }

    /// Returns a closure reading the current value of gauge `metric`.
    pub fn gauge_query(&self, metric: &str) -> impl Fn() -> Result<f64> + Send + Sync + 'static {
        let registry = self.clone();
        let metric = metric.to_string();
        move || {
            registry
                .gauge(&metric)
                .ok_or_else(|| anyhow!("gauge '{metric}' has no value"))
        }
    }
}
