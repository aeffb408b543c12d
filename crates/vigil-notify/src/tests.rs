use crate::channels::email::{EmailChannel, EmailConfig, SmtpTls};
use crate::channels::webhook::{ChatWebhookChannel, WebhookConfig};
use crate::plugin::ChannelRegistry;
use crate::{DeliveryChannel, NotifyError};
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use vigil_common::types::{Alert, AlertState, Severity};

fn sample_alert() -> Alert {
    let started = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let mut labels = HashMap::new();
    labels.insert("severity".to_string(), "critical".to_string());
    labels.insert("service".to_string(), "crawler".to_string());
    let mut annotations = HashMap::new();
    annotations.insert("runbook".to_string(), "https://wiki/db".to_string());
    Alert {
        id: "a1".to_string(),
        rule_name: "db_down".to_string(),
        message: "Database unreachable (current value: 1.00, threshold: 1.00)".to_string(),
        severity: Severity::Critical,
        state: AlertState::Firing,
        value: 1.0,
        threshold: 1.0,
        started_at: started,
        resolved_at: None,
        last_sent_at: None,
        notification_count: 0,
        labels,
        annotations,
    }
}

fn email_config(host: &str, port: u16, tls: SmtpTls) -> EmailConfig {
    EmailConfig {
        smtp_host: host.to_string(),
        smtp_port: port,
        tls,
        smtp_username: None,
        smtp_password: None,
        from: "Vigil <alerts@example.com>".to_string(),
        recipients: vec!["oncall@example.com".to_string(), "ops@example.com".to_string()],
        timeout_secs: 2,
    }
}

fn header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Accepts one HTTP request, answers with `status_line` and yields the
/// request body.
async fn serve_once(status_line: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let body_start = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before request completed");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = header_end(&buf) {
                let headers = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
                let len = headers
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= pos + 4 + len {
                    break pos + 4;
                }
            }
        };
        let response =
            format!("{status_line}\r\nContent-Length: 4\r\nConnection: close\r\n\r\nnope");
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        String::from_utf8_lossy(&buf[body_start..]).to_string()
    });
    (format!("http://{addr}/hook"), handle)
}

// ── Plugin registry tests ──

#[test]
fn registry_default_has_builtin_plugins() {
    let registry = ChannelRegistry::default();
    let mut names = registry.plugin_names();
    names.sort();
    assert_eq!(names, vec!["email", "webhook"]);
}

#[test]
fn registry_unknown_plugin_returns_error() {
    let registry = ChannelRegistry::default();
    let config = serde_json::json!({});
    let err = registry
        .create_channel("pager", "p1", &config)
        .err()
        .expect("should return error for unknown plugin");
    assert!(matches!(err, NotifyError::UnknownChannelType(ref t) if t == "pager"));
}

#[test]
fn webhook_plugin_validates_config() {
    let registry = ChannelRegistry::default();

    let valid = serde_json::json!({ "url": "https://hooks.example.com/services/abc" });
    let channel = registry.create_channel("webhook", "ops-chat", &valid).unwrap();
    assert_eq!(channel.name(), "ops-chat");
    assert_eq!(channel.channel_type(), "webhook");
    assert!(channel.is_enabled());

    assert!(registry
        .create_channel("webhook", "x", &serde_json::json!({}))
        .is_err());
    assert!(registry
        .create_channel("webhook", "x", &serde_json::json!({ "url": "not a url" }))
        .is_err());
}

#[test]
fn email_plugin_validates_config() {
    let registry = ChannelRegistry::default();

    let valid = serde_json::json!({
        "smtp_host": "smtp.example.com",
        "smtp_port": 465,
        "tls": "implicit",
        "from": "alerts@example.com",
        "recipients": ["admin@example.com"]
    });
    let channel = registry.create_channel("email", "ops-mail", &valid).unwrap();
    assert_eq!(channel.channel_type(), "email");

    let bad_address = serde_json::json!({
        "smtp_host": "smtp.example.com",
        "from": "not-an-address",
        "recipients": ["admin@example.com"]
    });
    assert!(registry.create_channel("email", "x", &bad_address).is_err());

    let no_recipients = serde_json::json!({
        "smtp_host": "smtp.example.com",
        "from": "alerts@example.com",
        "recipients": []
    });
    assert!(registry.create_channel("email", "x", &no_recipients).is_err());

    assert!(registry
        .create_channel("email", "x", &serde_json::json!({}))
        .is_err());
}

#[test]
fn registry_redacts_secrets() {
    let registry = ChannelRegistry::default();
    let config = serde_json::json!({
        "smtp_host": "smtp.example.com",
        "smtp_password": "hunter2",
        "from": "alerts@example.com",
        "recipients": ["admin@example.com"]
    });
    let redacted = registry.redact_config("email", &config).unwrap();
    assert_eq!(redacted["smtp_password"], "***");
    assert_eq!(redacted["smtp_host"], "smtp.example.com");
}

// ── Channel rendering ──

#[test]
fn webhook_payload_carries_alert_fields() {
    let mut config = WebhookConfig::new("https://hooks.example.com/services/abc");
    config.username = Some("vigil".to_string());
    let channel = ChatWebhookChannel::new("chat", config).unwrap();
    let payload = channel.render_payload(&sample_alert());

    assert_eq!(payload["username"], "vigil");
    assert!(payload.get("channel").is_none());
    let attachment = &payload["attachments"][0];
    assert_eq!(attachment["color"], "#d00000");
    assert_eq!(attachment["title"], "[CRITICAL] db_down");
    assert!(attachment["text"]
        .as_str()
        .unwrap()
        .contains("Database unreachable"));

    let titles: Vec<&str> = attachment["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["title"].as_str().unwrap())
        .collect();
    // severity label is already shown as its own field
    assert_eq!(
        titles,
        vec!["Severity", "Value", "Threshold", "Started", "service"]
    );
}

#[test]
fn webhook_rejects_empty_url() {
    let result = ChatWebhookChannel::new("chat", WebhookConfig::new("  "));
    assert!(matches!(result, Err(NotifyError::InvalidConfig(_))));
}

#[test]
fn email_bodies_render_plain_and_html() {
    let alert = sample_alert();
    let text = EmailChannel::format_text(&alert);
    assert!(text.contains("Alert: db_down"));
    assert!(text.contains("Severity: critical"));
    assert!(text.contains("Threshold: 1.00"));
    assert!(text.contains("Labels: service=crawler, severity=critical"));

    let mut hostile = alert.clone();
    hostile.message = "<script>alert(1)</script>".to_string();
    let html = EmailChannel::format_html(&hostile);
    assert!(html.contains("&lt;script&gt;"));
    assert!(!html.contains("<script>"));
    assert!(html.contains("<th align=\"left\">service</th><td>crawler</td>"));
}

#[test]
fn email_message_is_multipart_alternative() {
    let channel =
        EmailChannel::new("mail", email_config("smtp.example.com", 587, SmtpTls::StartTls))
            .unwrap();
    let message = channel.build_message(&sample_alert()).unwrap();
    let raw = String::from_utf8(message.formatted()).unwrap();
    assert!(raw.contains("Subject: [vigil] [CRITICAL] db_down"));
    assert!(raw.contains("multipart/alternative"));
    assert!(raw.contains("oncall@example.com"));
    assert!(raw.contains("ops@example.com"));
}

// ── Delivery outcome ──

#[tokio::test]
async fn webhook_success_status_delivers() {
    let (url, server) = serve_once("HTTP/1.1 200 OK").await;
    let channel = ChatWebhookChannel::new("chat", WebhookConfig::new(&url)).unwrap();

    assert!(channel.attempt_delivery(&sample_alert()).await);

    let body = server.await.unwrap();
    let posted: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(posted["attachments"][0]["title"], "[CRITICAL] db_down");
}

#[tokio::test]
async fn webhook_error_status_reports_failure() {
    let (url, server) = serve_once("HTTP/1.1 500 Internal Server Error").await;
    let channel = ChatWebhookChannel::new("chat", WebhookConfig::new(&url)).unwrap();

    let err = channel.send(&sample_alert()).await.unwrap_err();
    assert!(matches!(err, NotifyError::ApiError { status: 500, .. }));
    server.await.unwrap();
}

#[tokio::test]
async fn webhook_connection_refused_is_false() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let channel =
        ChatWebhookChannel::new("chat", WebhookConfig::new(&format!("http://{addr}/hook")))
            .unwrap();
    assert!(!channel.attempt_delivery(&sample_alert()).await);
}

#[tokio::test]
async fn email_unreachable_server_is_false() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let channel = EmailChannel::new("mail", email_config("127.0.0.1", port, SmtpTls::None)).unwrap();
    assert!(!channel.attempt_delivery(&sample_alert()).await);
}

#[test]
fn channels_can_be_disabled_in_place() {
    let channel = ChatWebhookChannel::new(
        "chat",
        WebhookConfig::new("https://hooks.example.com/services/abc"),
    )
    .unwrap();
    assert!(channel.is_enabled());
    channel.set_enabled(false);
    assert!(!channel.is_enabled());
    channel.set_enabled(true);
    assert!(channel.is_enabled());
}
