use crate::config::{ProbeConfig, RuleConfig, ServerConfig};
use crate::probe::{latency_gauge, probe_once, run_probe, spawn_probes};
use crate::rule_builder::{build_rule, load_channels, load_rules};
use chrono::{TimeZone, Utc};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use vigil_alert::AlertEngine;
use vigil_common::signals::{HealthStatus, SignalRegistry};
use vigil_common::types::Severity;
use vigil_notify::plugin::ChannelRegistry;

const SAMPLE: &str = r#"
[engine]
interval_secs = 10

[[channels]]
name = "ops-chat"
channel_type = "webhook"
config = { url = "https://hooks.example.com/services/abc", username = "vigil" }

[[channels]]
name = "ops-mail"
channel_type = "email"
enabled = false
[channels.config]
smtp_host = "smtp.example.com"
from = "alerts@example.com"
recipients = ["oncall@example.com"]

[[probes]]
name = "postgres"
addr = "127.0.0.1:5432"

[[rules]]
name = "postgres_down"
rule_type = "health"
component = "postgres"
severity = "critical"
cooldown_secs = 600
labels = { team = "storage" }

[[rules]]
name = "queue_backlog"
rule_type = "threshold"
metric = "queue.depth"
operator = ">"
threshold = 1000.0
duration_secs = 120
annotations = { runbook = "https://wiki/queue" }
"#;

fn rule_config(name: &str, rule_type: &str) -> RuleConfig {
    RuleConfig {
        name: name.to_string(),
        rule_type: rule_type.to_string(),
        description: None,
        severity: Severity::Warning,
        cooldown_secs: 300,
        duration_secs: 0,
        labels: Default::default(),
        annotations: Default::default(),
        component: None,
        metric: None,
        operator: None,
        threshold: None,
    }
}

// ── Config ──

#[test]
fn parses_full_config_with_defaults() {
    let config = ServerConfig::parse(SAMPLE).unwrap();

    assert_eq!(config.engine.interval_secs, 10);
    assert_eq!(config.engine.history_limit, 1000);

    assert_eq!(config.channels.len(), 2);
    assert!(config.channels[0].enabled);
    assert_eq!(config.channels[0].config["username"], "vigil");
    assert!(!config.channels[1].enabled);
    assert_eq!(config.channels[1].config["recipients"][0], "oncall@example.com");

    assert_eq!(config.probes[0].interval_secs, 15);
    assert_eq!(config.probes[0].timeout_secs, 5);

    let health = &config.rules[0];
    assert_eq!(health.severity, Severity::Critical);
    assert_eq!(health.cooldown_secs, 600);
    assert_eq!(health.labels["team"], "storage");
    let threshold = &config.rules[1];
    assert_eq!(threshold.severity, Severity::Warning);
    assert_eq!(threshold.cooldown_secs, 300);
    assert_eq!(threshold.duration_secs, 120);
    assert_eq!(threshold.threshold, Some(1000.0));
}

#[test]
fn empty_config_is_valid() {
    let config = ServerConfig::parse("").unwrap();
    assert_eq!(config.engine.interval_secs, 30);
    assert!(config.rules.is_empty());
    assert!(config.channels.is_empty());
}

#[test]
fn missing_config_file_reports_path() {
    let err = ServerConfig::load("/nonexistent/vigil.toml").unwrap_err();
    assert!(err.to_string().contains("/nonexistent/vigil.toml"));
}

#[test]
fn unknown_severity_is_rejected() {
    let toml = r#"
[[rules]]
name = "x"
rule_type = "health"
severity = "fatal"
"#;
    assert!(ServerConfig::parse(toml).is_err());
}

// ── Rule construction ──

#[test]
fn builds_rules_from_config() {
    let config = ServerConfig::parse(SAMPLE).unwrap();
    let signals = SignalRegistry::new();

    let health = build_rule(&config.rules[0], &signals).unwrap();
    assert_eq!(health.name(), "postgres_down");
    assert_eq!(health.severity(), Severity::Critical);
    assert_eq!(health.cooldown_secs(), 600);
    assert_eq!(health.labels()["component"], "postgres");
    assert_eq!(health.labels()["team"], "storage");

    let threshold = build_rule(&config.rules[1], &signals).unwrap();
    assert_eq!(threshold.threshold(), 1000.0);
    assert_eq!(threshold.duration_secs(), 120);
    assert_eq!(threshold.annotations()["runbook"], "https://wiki/queue");
    assert_eq!(threshold.description(), "queue.depth is above 1000");
}

#[test]
fn description_override_applies() {
    let mut cfg = rule_config("api_down", "health");
    cfg.component = Some("api".to_string());
    cfg.description = Some("Public API unreachable".to_string());
    let rule = build_rule(&cfg, &SignalRegistry::new()).unwrap();
    assert_eq!(rule.description(), "Public API unreachable");
}

#[test]
fn incomplete_rules_are_rejected() {
    let signals = SignalRegistry::new();
    assert!(build_rule(&rule_config("a", "health"), &signals).is_err());
    assert!(build_rule(&rule_config("b", "threshold"), &signals).is_err());
    assert!(build_rule(&rule_config("c", "anomaly"), &signals).is_err());

    let mut bad_operator = rule_config("d", "threshold");
    bad_operator.metric = Some("m".to_string());
    bad_operator.threshold = Some(1.0);
    bad_operator.operator = Some("between".to_string());
    assert!(build_rule(&bad_operator, &signals).is_err());
}

#[test]
fn loading_skips_broken_entries() {
    let mut config = ServerConfig::parse(SAMPLE).unwrap();
    config.rules.push(rule_config("broken", "health"));
    config.channels.push(crate::config::ChannelConfig {
        name: "pager".to_string(),
        channel_type: "pagerduty".to_string(),
        enabled: true,
        config: serde_json::json!({}),
    });

    let engine = AlertEngine::default();
    let signals = SignalRegistry::new();
    assert_eq!(load_rules(&engine, &config.rules, &signals), 2);
    assert_eq!(
        load_channels(&engine, &config.channels, &ChannelRegistry::default()),
        2
    );
    assert_eq!(engine.rule_names(), vec!["postgres_down", "queue_backlog"]);
    let summary = engine.summary();
    assert_eq!(summary.channel_count, 2);
    assert_eq!(summary.enabled_channel_count, 1);
}

#[tokio::test]
async fn configured_threshold_rule_fires_from_signals() {
    let config = ServerConfig::parse(SAMPLE).unwrap();
    let engine = AlertEngine::default();
    let signals = SignalRegistry::new();
    let mut rule = config.rules[1].clone();
    rule.duration_secs = 0;
    load_rules(&engine, &[rule], &signals);

    signals.set_gauge("queue.depth", 5000.0);
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let report = engine.evaluate_once_at(now).await;

    assert_eq!(report.created, vec!["queue_backlog"]);
    assert_eq!(engine.active_alerts()[0].value, 5000.0);
}

// ── Probes ──

fn probe_config(name: &str, addr: String) -> ProbeConfig {
    ProbeConfig {
        name: name.to_string(),
        addr,
        interval_secs: 1,
        timeout_secs: 2,
    }
}

#[tokio::test]
async fn probe_reports_reachable_listener_healthy() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let signals = SignalRegistry::new();

    let outcome = run_probe(&probe_config("db", addr), &signals).await;

    assert_eq!(outcome.status, HealthStatus::Healthy);
    assert_eq!(signals.health("db").unwrap().status, HealthStatus::Healthy);
    assert!(signals.gauge(&latency_gauge("db")).is_some());
}

#[tokio::test]
async fn probe_reports_closed_port_unhealthy() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let outcome = probe_once(&addr, Duration::from_secs(2)).await;
    assert_eq!(outcome.status, HealthStatus::Unhealthy);
    assert!(outcome.latency.is_none());
}

#[tokio::test]
async fn probe_loops_stop_on_cancel() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let signals = SignalRegistry::new();
    let cancel = CancellationToken::new();

    let handles = spawn_probes(&[probe_config("cache", addr)], &signals, &cancel);
    tokio::time::timeout(Duration::from_secs(5), async {
        while signals.health("cache").is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("probe never reported");

    cancel.cancel();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("probe loop did not stop")
            .unwrap();
    }
}
