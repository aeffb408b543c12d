use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between two evaluation ticks of the monitoring loop.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Maximum number of alerts kept in history; oldest are evicted first.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_interval_secs() -> u64 {
    30
}

fn default_history_limit() -> usize {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            history_limit: default_history_limit(),
        }
    }
}

impl EngineConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}
