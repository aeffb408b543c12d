//! Standalone alerting daemon: loads rules, channels and probes from TOML
//! and runs an [`vigil_alert::AlertEngine`] until interrupted.

pub mod config;
pub mod probe;
pub mod rule_builder;

#[cfg(test)]
mod tests;
