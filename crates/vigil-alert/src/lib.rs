//! Rule-based alert evaluation and delivery.
//!
//! An [`engine::AlertEngine`] owns a set of [`rule::AlertRule`]s and a set of
//! delivery channels. On every tick it evaluates each rule's condition in
//! registration order, creates, re-notifies (subject to the rule's cooldown)
//! or resolves the rule's alert, and fans notifications out to all enabled
//! channels. Built-in rule factories cover health degradation and metric
//! thresholds.

pub mod config;
pub mod delivery;
pub mod engine;
mod history;
pub mod rule;
pub mod rules;


pub use config::EngineConfig;
pub use engine::{AlertEngine, AlertSummary, TickReport};
pub use rule::{AlertRule, Condition};
