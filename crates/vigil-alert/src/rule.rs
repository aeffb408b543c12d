use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use vigil_common::types::{Alert, AlertState, Severity};

/// A zero-argument check deciding whether a rule's alert should fire.
///
/// Conditions may be slow, may have side effects and may fail; the engine
/// treats both an `Err` and a panic as "not met" for that tick.
/// Closures returning `anyhow::Result<bool>` implement this trait directly.
pub trait Condition: Send + Sync {
    fn check(&self) -> Result<bool>;

    /// The reading behind the most recent [`check`](Condition::check), if
    /// the condition has one. Recorded as the alert's value.
    fn observed_value(&self) -> Option<f64> {
        None
    }
}

impl<F> Condition for F
where
    F: Fn() -> Result<bool> + Send + Sync,
{
    fn check(&self) -> Result<bool> {
        self()
    }
}

/// Immutable definition of something to watch and how to notify about it.
///
/// Built with [`AlertRule::new`] and the `with_*` methods; the `severity`
/// label always mirrors the rule's severity.
///
/// # Examples
///
/// ```
/// use vigil_alert::AlertRule;
/// use vigil_common::types::Severity;
///
/// let rule = AlertRule::new("db_down", "Database unreachable", Severity::Critical, || Ok(false))
///     .with_threshold(1.0)
///     .with_cooldown_secs(300)
///     .with_label("team", "storage");
/// assert_eq!(rule.labels()["severity"], "critical");
/// assert_eq!(rule.labels()["team"], "storage");
/// ```
#[derive(Clone)]
pub struct AlertRule {
    name: String,
    description: String,
    condition: Arc<dyn Condition>,
    severity: Severity,
    threshold: f64,
    duration_secs: u64,
    cooldown_secs: u64,
    labels: HashMap<String, String>,
    annotations: HashMap<String, String>,
}

pub const DEFAULT_COOLDOWN_SECS: u64 = 300;

impl AlertRule {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
        condition: impl Fn() -> Result<bool> + Send + Sync + 'static,
    ) -> Self {
        Self::from_condition(name, description, severity, condition)
    }

    /// Like [`AlertRule::new`], for conditions that are not plain closures.
    pub fn from_condition(
        name: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
        condition: impl Condition + 'static,
    ) -> Self {
        let mut labels = HashMap::new();
        labels.insert("severity".to_string(), severity.to_string());
        Self {
            name: name.into(),
            description: description.into(),
            condition: Arc::new(condition),
            severity,
            threshold: 0.0,
            duration_secs: 0,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            labels,
            annotations: HashMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// How long the condition must hold before the alert fires; `0` fires on
    /// the first true observation.
    pub fn with_duration_secs(mut self, secs: u64) -> Self {
        self.duration_secs = secs;
        self
    }

    pub fn with_cooldown_secs(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    /// Adds a label. The `severity` label is owned by the rule and cannot be
    /// overridden.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        if key != "severity" {
            self.labels.insert(key, value.into());
        }
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn condition(&self) -> &dyn Condition {
        self.condition.as_ref()
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    pub fn cooldown_secs(&self) -> u64 {
        self.cooldown_secs
    }

    pub fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }

    pub fn annotations(&self) -> &HashMap<String, String> {
        &self.annotations
    }

    pub fn render_message(&self, value: f64) -> String {
        format!(
            "{} (current value: {:.2}, threshold: {:.2})",
            self.description, value, self.threshold
        )
    }

    /// A fresh firing alert for this rule, started at `now`.
    pub fn new_alert(&self, value: f64, now: DateTime<Utc>) -> Alert {
        Alert {
            id: vigil_common::id::next_id(),
            rule_name: self.name.clone(),
            message: self.render_message(value),
            severity: self.severity,
            state: AlertState::Firing,
            value,
            threshold: self.threshold,
            started_at: now,
            resolved_at: None,
            last_sent_at: None,
            notification_count: 0,
            labels: self.labels.clone(),
            annotations: self.annotations.clone(),
        }
    }
}

impl std::fmt::Debug for AlertRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertRule")
            .field("name", &self.name)
            .field("severity", &self.severity)
            .field("threshold", &self.threshold)
            .field("duration_secs", &self.duration_secs)
            .field("cooldown_secs", &self.cooldown_secs)
            .finish_non_exhaustive()
    }
}
