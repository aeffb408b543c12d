use crate::rule::{AlertRule, Condition};
use anyhow::Result;
use std::sync::{Mutex, PoisonError};
use vigil_common::types::Severity;
use vigil_common::signals::HealthStatus;

/// Fires while a health query reports anything other than healthy.
pub struct HealthCondition {
    component: String,
    query: Box<dyn Fn() -> Result<HealthStatus> + Send + Sync>,
    last: Mutex<Option<HealthStatus>>,
}

impl HealthCondition {
    pub fn new(
        component: &str,
        query: impl Fn() -> Result<HealthStatus> + Send + Sync + 'static,
    ) -> Self {
        Self {
            component: component.to_string(),
            query: Box::new(query),
            last: Mutex::new(None),
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }
}

/// Health as a score: 1 healthy, 0.5 degraded, 0 unhealthy.
fn health_score(status: HealthStatus) -> f64 {
    match status {
        HealthStatus::Healthy => 1.0,
        HealthStatus::Degraded => 0.5,
        HealthStatus::Unhealthy => 0.0,
    }
}

impl Condition for HealthCondition {
    fn check(&self) -> Result<bool> {
        let status = (self.query)()?;
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(status);
        Ok(!status.is_healthy())
    }

    fn observed_value(&self) -> Option<f64> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(health_score)
    }
}

/// Builds a rule that fires while `component` is degraded or unhealthy.
///
/// The alert value is the health score at the time of firing and the
/// threshold is `1.0` (fully healthy).
pub fn health_rule(
    name: &str,
    component: &str,
    severity: Severity,
    query: impl Fn() -> Result<HealthStatus> + Send + Sync + 'static,
) -> AlertRule {
    AlertRule::from_condition(
        name,
        format!("Health check '{component}' is not healthy"),
        severity,
        HealthCondition::new(component, query),
    )
    .with_threshold(1.0)
    .with_label("component", component)
}
