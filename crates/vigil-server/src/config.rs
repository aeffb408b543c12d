use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use vigil_alert::rule::DEFAULT_COOLDOWN_SECS;
use vigil_alert::EngineConfig;
use vigil_common::types::Severity;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub probes: Vec<ProbeConfig>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// One delivery channel; `config` is handed to the matching channel plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    pub channel_type: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_channel_config")]
    pub config: serde_json::Value,
}

/// A TCP reachability probe publishing the health of component `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub name: String,
    /// `host:port`
    pub addr: String,
    #[serde(default = "default_probe_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub name: String,
    /// `"health"` or `"threshold"`.
    pub rule_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default)]
    pub duration_secs: u64,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,

    // health
    #[serde(default)]
    pub component: Option<String>,

    // threshold
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub threshold: Option<f64>,
}

fn default_enabled() -> bool {
    true
}

fn default_channel_config() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn default_probe_interval_secs() -> u64 {
    15
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_severity() -> Severity {
    Severity::Warning
}

fn default_cooldown_secs() -> u64 {
    DEFAULT_COOLDOWN_SECS
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{path}'"))?;
        Self::parse(&content).with_context(|| format!("Failed to parse config file '{path}'"))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }
}
