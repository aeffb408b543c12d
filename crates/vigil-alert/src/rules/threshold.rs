use crate::rule::{AlertRule, Condition};
use anyhow::Result;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use vigil_common::types::Severity;

/// Tolerance used by [`Comparison::Equal`].
pub const EQUAL_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Greater,
    Less,
    Equal,
}

impl FromStr for Comparison {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "greater" | "gt" | ">" => Ok(Self::Greater),
            "less" | "lt" | "<" => Ok(Self::Less),
            "equal" | "eq" | "==" => Ok(Self::Equal),
            _ => Err(format!("unknown comparison: {s}")),
        }
    }
}

impl std::fmt::Display for Comparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Greater => write!(f, "greater"),
            Self::Less => write!(f, "less"),
            Self::Equal => write!(f, "equal"),
        }
    }
}

impl Comparison {
    pub fn check(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Greater => value > threshold,
            Self::Less => value < threshold,
            Self::Equal => (value - threshold).abs() < EQUAL_EPSILON,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::Greater => "above",
            Self::Less => "below",
            Self::Equal => "equal to",
        }
    }
}

/// Compares a metric reading against a fixed threshold.
pub struct ThresholdCondition {
    comparison: Comparison,
    threshold: f64,
    source: Box<dyn Fn() -> Result<f64> + Send + Sync>,
    last: Mutex<Option<f64>>,
}

impl ThresholdCondition {
    pub fn new(
        comparison: Comparison,
        threshold: f64,
        source: impl Fn() -> Result<f64> + Send + Sync + 'static,
    ) -> Self {
        Self {
            comparison,
            threshold,
            source: Box::new(source),
            last: Mutex::new(None),
        }
    }
}

impl Condition for ThresholdCondition {
    fn check(&self) -> Result<bool> {
        let value = (self.source)()?;
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
        Ok(self.comparison.check(value, self.threshold))
    }

    fn observed_value(&self) -> Option<f64> {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builds a rule that fires while `metric` compares to `threshold`.
pub fn metric_threshold_rule(
    name: &str,
    metric: &str,
    comparison: Comparison,
    threshold: f64,
    severity: Severity,
    source: impl Fn() -> Result<f64> + Send + Sync + 'static,
) -> AlertRule {
    AlertRule::from_condition(
        name,
        format!("{metric} is {} {threshold}", comparison.describe()),
        severity,
        ThresholdCondition::new(comparison, threshold, source),
    )
    .with_threshold(threshold)
    .with_label("metric", metric)
}
