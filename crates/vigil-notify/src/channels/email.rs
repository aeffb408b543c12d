use super::Switch;
use crate::error::{NotifyError, Result};
use crate::plugin::ChannelPlugin;
use crate::utils::{escape_html, redact_sensitive_json};
use crate::DeliveryChannel;
use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;
use vigil_common::types::{format_labels, sorted_labels, Alert};

/// How the SMTP session is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpTls {
    /// Plain connection upgraded with STARTTLS (usually port 587).
    StartTls,
    /// TLS from the first byte (usually port 465).
    Implicit,
    /// Unencrypted, for local relays only.
    None,
}

pub struct EmailChannel {
    name: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    recipients: Vec<Mailbox>,
    enabled: Switch,
}

impl EmailChannel {
    pub fn new(name: &str, config: EmailConfig) -> Result<Self> {
        let from: Mailbox = config.from.parse()?;
        if config.recipients.is_empty() {
            return Err(NotifyError::InvalidConfig(
                "email channel needs at least one recipient".to_string(),
            ));
        }
        let recipients = config
            .recipients
            .iter()
            .map(|r| r.parse::<Mailbox>())
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut builder = match config.tls {
            SmtpTls::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            }
            SmtpTls::Implicit => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)?,
            SmtpTls::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host),
        }
        .port(config.smtp_port)
        .timeout(Some(Duration::from_secs(config.timeout_secs)));

        if let (Some(user), Some(pass)) = (config.smtp_username, config.smtp_password) {
            builder = builder.credentials(Credentials::new(user, pass));
        }

        Ok(Self {
            name: name.to_string(),
            transport: builder.build(),
            from,
            recipients,
            enabled: Switch::new(true),
        })
    }

    pub fn subject(alert: &Alert) -> String {
        format!("[vigil] {}", alert.title())
    }

    pub fn format_text(alert: &Alert) -> String {
        let labels_str = format_labels(&alert.labels);
        let labels_line = if labels_str.is_empty() {
            String::new()
        } else {
            format!("\nLabels: {labels_str}")
        };
        format!(
            "Alert: {rule}\nSeverity: {severity}\nState: {state}\nMessage: {message}\nValue: {value:.2}\nThreshold: {threshold:.2}\nStarted: {started}{labels_line}",
            rule = alert.rule_name,
            severity = alert.severity,
            state = alert.state,
            message = alert.message,
            value = alert.value,
            threshold = alert.threshold,
            started = alert.started_at.to_rfc3339(),
            labels_line = labels_line,
        )
    }

    pub fn format_html(alert: &Alert) -> String {
        let mut rows = String::new();
        let mut row = |key: &str, value: &str| {
            let _ = write!(
                rows,
                "<tr><th align=\"left\">{}</th><td>{}</td></tr>",
                escape_html(key),
                escape_html(value)
            );
        };
        row("Severity", alert.severity.as_str());
        row("State", &alert.state.to_string());
        row("Value", &format!("{:.2}", alert.value));
        row("Threshold", &format!("{:.2}", alert.threshold));
        row("Started", &alert.started_at.to_rfc3339());
        for (key, value) in sorted_labels(&alert.labels) {
            row(key, value);
        }

        format!(
            "<html><body><h2>{title}</h2><p>{message}</p><table>{rows}</table></body></html>",
            title = escape_html(&alert.title()),
            message = escape_html(&alert.message),
            rows = rows,
        )
    }

    pub(crate) fn build_message(&self, alert: &Alert) -> Result<Message> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(Self::subject(alert));
        for recipient in &self.recipients {
            builder = builder.to(recipient.clone());
        }
        let message = builder.multipart(MultiPart::alternative_plain_html(
            Self::format_text(alert),
            Self::format_html(alert),
        ))?;
        Ok(message)
    }
}

#[async_trait]
impl DeliveryChannel for EmailChannel {
    async fn send(&self, alert: &Alert) -> Result<()> {
        let message = self.build_message(alert)?;
        self.transport.send(message).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn channel_type(&self) -> &str {
        "email"
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
pub struct EmailConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default = "default_tls")]
    pub tls: SmtpTls,
    #[serde(default)]
    pub smtp_username: Option<String>,
    #[serde(default)]
    pub smtp_password: Option<String>,
    pub from: String,
    pub recipients: Vec<String>,
    #[serde(default = "default_smtp_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_tls() -> SmtpTls {
    SmtpTls::StartTls
}

fn default_smtp_timeout_secs() -> u64 {
    30
}

pub struct EmailPlugin;

impl ChannelPlugin for EmailPlugin {
    fn name(&self) -> &str {
        "email"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        let cfg: EmailConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("email: {e}")))?;
        cfg.from.parse::<Mailbox>()?;
        for recipient in &cfg.recipients {
            recipient.parse::<Mailbox>()?;
        }
        Ok(())
    }

    fn create_channel(&self, name: &str, config: &Value) -> Result<Arc<dyn DeliveryChannel>> {
        let cfg: EmailConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("email: {e}")))?;
        Ok(Arc::new(EmailChannel::new(name, cfg)?))
    }

    fn redact_config(&self, config: &Value) -> Value {
        redact_sensitive_json(config)
    }
}
