use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Alert severity level, ordered from lowest to highest.
///
/// # Examples
///
/// ```
/// use vigil_common::types::Severity;
///
/// let sev: Severity = "warning".parse().unwrap();
/// assert_eq!(sev, Severity::Warning);
/// assert_eq!(sev.to_string(), "warning");
/// assert!(Severity::Critical > Severity::Info);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Info, Severity::Warning, Severity::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// Lifecycle state of an [`Alert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Firing,
    Resolved,
    /// Reported to dashboards only; the engine never moves an alert here.
    Silenced,
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertState::Firing => write!(f, "firing"),
            AlertState::Resolved => write!(f, "resolved"),
            AlertState::Silenced => write!(f, "silenced"),
        }
    }
}

/// One rule's current or past violation.
///
/// Labels and annotations are copied from the rule when the alert is
/// created, so an alert outlives edits or removal of its rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    /// Name of the rule that raised this alert (lookup key, not ownership).
    pub rule_name: String,
    pub message: String,
    pub severity: Severity,
    pub state: AlertState,
    pub value: f64,
    pub threshold: f64,
    pub started_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Completion time of the last delivery round; the cooldown baseline.
    pub last_sent_at: Option<DateTime<Utc>>,
    /// Number of delivery rounds completed for this alert.
    pub notification_count: u32,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
}

impl Alert {
    pub fn is_firing(&self) -> bool {
        self.state == AlertState::Firing
    }

    /// Marks the alert resolved at `now`.
    pub fn resolve(&mut self, now: DateTime<Utc>) {
        self.state = AlertState::Resolved;
        self.resolved_at = Some(now);
    }

    /// Records a completed delivery round at `now`.
    pub fn mark_sent(&mut self, now: DateTime<Utc>) {
        self.last_sent_at = Some(now);
        self.notification_count += 1;
    }

    /// Title line used by notification channels, e.g. `[CRITICAL] db_down`.
    pub fn title(&self) -> String {
        format!(
            "[{}] {}",
            self.severity.as_str().to_uppercase(),
            self.rule_name
        )
    }
}

/// Format labels map into a human-readable string.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use vigil_common::types::format_labels;
///
/// let mut labels = HashMap::new();
/// labels.insert("service".to_string(), "crawler".to_string());
/// labels.insert("severity".to_string(), "warning".to_string());
/// assert_eq!(format_labels(&labels), "service=crawler, severity=warning");
/// ```
pub fn format_labels(labels: &HashMap<String, String>) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let mut pairs: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.sort();
    pairs.join(", ")
}

/// Labels sorted by key, for channels that render them as a list.
pub fn sorted_labels(labels: &HashMap<String, String>) -> Vec<(&str, &str)> {
    let mut pairs: Vec<(&str, &str)> = labels
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    pairs.sort();
    pairs
}
