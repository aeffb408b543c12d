//! Alert delivery channels.
//!
//! Every sink implements [`DeliveryChannel`]. Channels are independent: the
//! alert engine attempts each enabled channel on its own and only looks at
//! the boolean outcome of [`DeliveryChannel::attempt_delivery`]. Built-in
//! channels are a chat webhook (Slack-compatible payload) and SMTP email;
//! both can be constructed from JSON config through [`plugin::ChannelRegistry`].

pub mod channels;
pub mod error;
pub mod plugin;
pub mod utils;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use vigil_common::types::Alert;

pub use error::{NotifyError, Result};

/// A named notification sink that delivers one alert at a time.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Delivers the alert through this channel.
    ///
    /// # Errors
    ///
    /// Returns an error on transport, authentication or protocol failure.
    async fn send(&self, alert: &Alert) -> Result<()>;

    /// Unique channel name within an engine (e.g. `"ops-slack"`).
    fn name(&self) -> &str;

    /// Channel type name (e.g. `"webhook"`, `"email"`).
    fn channel_type(&self) -> &str;

    fn is_enabled(&self) -> bool;

    /// Disabled channels stay registered but are skipped during delivery.
    fn set_enabled(&self, enabled: bool);

    /// Attempts delivery and reports success. Errors never escape; they are
    /// logged and reported as `false`.
    async fn attempt_delivery(&self, alert: &Alert) -> bool {
        match self.send(alert).await {
            Ok(()) => {
                tracing::debug!(
                    channel = self.name(),
                    rule = %alert.rule_name,
                    "Alert delivered"
                );
                true
            }
            Err(e) => {
                tracing::warn!(
                    channel = self.name(),
                    channel_type = self.channel_type(),
                    rule = %alert.rule_name,
                    error = %e,
                    "Alert delivery failed"
                );
                false
            }
        }
    }
}
