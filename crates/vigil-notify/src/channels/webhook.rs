use super::Switch;
use crate::error::{NotifyError, Result};
use crate::plugin::ChannelPlugin;
use crate::utils::{redact_sensitive_json, truncate_string, MAX_BODY_LENGTH};
use crate::DeliveryChannel;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use vigil_common::types::{sorted_labels, Alert, Severity};

pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Posts alerts to a Slack-compatible incoming webhook as a single
/// colored attachment.
pub struct ChatWebhookChannel {
    name: String,
    url: String,
    username: Option<String>,
    channel: Option<String>,
    client: reqwest::Client,
    enabled: Switch,
}

impl ChatWebhookChannel {
    pub fn new(name: &str, config: WebhookConfig) -> Result<Self> {
        if config.url.trim().is_empty() {
            return Err(NotifyError::InvalidConfig(
                "webhook url must not be empty".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            name: name.to_string(),
            url: config.url,
            username: config.username,
            channel: config.channel,
            client,
            enabled: Switch::new(true),
        })
    }

    /// Builds the JSON message posted to the webhook.
    pub fn render_payload(&self, alert: &Alert) -> Value {
        let mut fields = vec![
            json!({ "title": "Severity", "value": alert.severity.to_string(), "short": true }),
            json!({ "title": "Value", "value": format!("{:.2}", alert.value), "short": true }),
            json!({ "title": "Threshold", "value": format!("{:.2}", alert.threshold), "short": true }),
            json!({
                "title": "Started",
                "value": alert.started_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                "short": true,
            }),
        ];
        for (key, value) in sorted_labels(&alert.labels) {
            if key == "severity" {
                continue;
            }
            fields.push(json!({ "title": key, "value": value, "short": true }));
        }

        let mut payload = json!({
            "text": format!("{} {}", severity_emoji(alert.severity), alert.title()),
            "attachments": [{
                "color": severity_color(alert.severity),
                "title": alert.title(),
                "text": alert.message,
                "fields": fields,
                "footer": "vigil",
                "ts": alert.started_at.timestamp(),
            }],
        });
        if let Some(obj) = payload.as_object_mut() {
            if let Some(username) = &self.username {
                obj.insert("username".to_string(), Value::String(username.clone()));
            }
            if let Some(channel) = &self.channel {
                obj.insert("channel".to_string(), Value::String(channel.clone()));
            }
        }
        payload
    }
}

fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "#36a64f",
        Severity::Warning => "#ff9900",
        Severity::Critical => "#d00000",
    }
}

fn severity_emoji(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => ":information_source:",
        Severity::Warning => ":warning:",
        Severity::Critical => ":rotating_light:",
    }
}

#[async_trait]
impl DeliveryChannel for ChatWebhookChannel {
    async fn send(&self, alert: &Alert) -> Result<()> {
        let payload = self.render_payload(alert);
        let resp = self.client.post(&self.url).json(&payload).send().await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let body = match resp.text().await {
            Ok(text) => truncate_string(&text, MAX_BODY_LENGTH),
            Err(e) => format!("[Failed to read response body: {e}]"),
        };
        Err(NotifyError::ApiError {
            service: "webhook".to_string(),
            status: status.as_u16(),
            body,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn channel_type(&self) -> &str {
        "webhook"
    }

    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }
}

// Plugin

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl WebhookConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            username: None,
            channel: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

pub struct WebhookPlugin;

impl ChannelPlugin for WebhookPlugin {
    fn name(&self) -> &str {
        "webhook"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        let cfg: WebhookConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("webhook: {e}")))?;
        reqwest::Url::parse(&cfg.url)
            .map_err(|e| NotifyError::InvalidConfig(format!("webhook url: {e}")))?;
        Ok(())
    }

    fn create_channel(&self, name: &str, config: &Value) -> Result<Arc<dyn DeliveryChannel>> {
        let cfg: WebhookConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("webhook: {e}")))?;
        Ok(Arc::new(ChatWebhookChannel::new(name, cfg)?))
    }

    fn redact_config(&self, config: &Value) -> Value {
        redact_sensitive_json(config)
    }
}
