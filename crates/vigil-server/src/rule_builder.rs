use crate::config::{ChannelConfig, RuleConfig};
use anyhow::{anyhow, Result};
use vigil_alert::engine::AlertEngine;
use vigil_alert::rules::{health_rule, metric_threshold_rule, Comparison};
use vigil_alert::AlertRule;
use vigil_common::signals::SignalRegistry;
use vigil_notify::plugin::ChannelRegistry;

// ── Rule config -> AlertRule ──

/// Builds a rule whose condition reads from `signals`.
pub fn build_rule(cfg: &RuleConfig, signals: &SignalRegistry) -> Result<AlertRule> {
    let rule = match cfg.rule_type.as_str() {
        "health" => {
            let component = cfg
                .component
                .as_deref()
                .ok_or_else(|| anyhow!("health rule '{}' requires `component`", cfg.name))?;
            health_rule(
                &cfg.name,
                component,
                cfg.severity,
                signals.health_query(component),
            )
        }
        "threshold" => {
            let metric = cfg
                .metric
                .as_deref()
                .ok_or_else(|| anyhow!("threshold rule '{}' requires `metric`", cfg.name))?;
            let threshold = cfg
                .threshold
                .ok_or_else(|| anyhow!("threshold rule '{}' requires `threshold`", cfg.name))?;
            let comparison: Comparison = cfg
                .operator
                .as_deref()
                .unwrap_or("greater")
                .parse()
                .map_err(|e: String| anyhow!("{e}"))?;
            metric_threshold_rule(
                &cfg.name,
                metric,
                comparison,
                threshold,
                cfg.severity,
                signals.gauge_query(metric),
            )
        }
        other => return Err(anyhow!("unknown rule_type: {other}")),
    };

    let mut rule = rule
        .with_cooldown_secs(cfg.cooldown_secs)
        .with_duration_secs(cfg.duration_secs);
    if let Some(description) = &cfg.description {
        rule = rule.with_description(description);
    }
    for (k, v) in &cfg.labels {
        rule = rule.with_label(k, v);
    }
    for (k, v) in &cfg.annotations {
        rule = rule.with_annotation(k, v);
    }
    Ok(rule)
}

/// Registers every buildable rule with the engine. Broken entries are logged
/// and skipped. Returns the number of rules registered.
pub fn load_rules(engine: &AlertEngine, rules: &[RuleConfig], signals: &SignalRegistry) -> usize {
    let mut loaded = 0;
    for cfg in rules {
        match build_rule(cfg, signals) {
            Ok(rule) => {
                engine.add_rule(rule);
                loaded += 1;
            }
            Err(e) => {
                tracing::error!(rule = %cfg.name, error = %e, "Failed to build alert rule, skipping");
            }
        }
    }
    loaded
}

/// Creates channels through the plugin registry and registers them with the
/// engine. Broken entries are logged and skipped.
pub fn load_channels(
    engine: &AlertEngine,
    channels: &[ChannelConfig],
    registry: &ChannelRegistry,
) -> usize {
    let mut loaded = 0;
    for cfg in channels {
        match registry.create_channel(&cfg.channel_type, &cfg.name, &cfg.config) {
            Ok(channel) => {
                channel.set_enabled(cfg.enabled);
                engine.add_channel(channel);
                loaded += 1;
            }
            Err(e) => {
                let redacted = registry
                    .redact_config(&cfg.channel_type, &cfg.config)
                    .unwrap_or_default();
                tracing::error!(
                    channel = %cfg.name,
                    channel_type = %cfg.channel_type,
                    config = %redacted,
                    error = %e,
                    "Failed to create delivery channel, skipping"
                );
            }
        }
    }
    loaded
}
