//! Factories for common rules, so callers need not hand-write conditions.

pub mod health;
pub mod threshold;

pub use health::health_rule;
pub use threshold::{metric_threshold_rule, Comparison};
