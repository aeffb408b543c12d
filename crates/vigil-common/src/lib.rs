//! Shared types for the vigil alerting workspace.
//!
//! [`types`] holds the alert record and severity model handed between the
//! rule engine and the notification channels. [`signals`] is the in-process
//! registry of health statuses and gauge values that rule conditions query.

pub mod id;
pub mod signals;
pub mod types;
