use crate::config::EngineConfig;
use crate::delivery::{fan_out, DeliveryReport};
use crate::history::AlertHistory;
use crate::rule::AlertRule;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vigil_common::types::{Alert, Severity};
use vigil_notify::DeliveryChannel;

/// Rule table, active alerts and history. Only mutated by evaluation and
/// rule management, never held across an await.
struct EngineState {
    /// Registration order is evaluation order.
    rules: Vec<Arc<AlertRule>>,
    active: HashMap<String, Alert>,
    /// First time each not-yet-firing rule was seen true (sustain window).
    pending_since: HashMap<String, DateTime<Utc>>,
    history: AlertHistory,
}

enum Step {
    Idle,
    Pending,
    Suppressed,
    Created(Alert),
    Renotify(Alert),
    Resolved(Alert),
}

struct Monitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// What a single tick did, by rule name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub created: Vec<String>,
    pub renotified: Vec<String>,
    pub resolved: Vec<String>,
    pub suppressed: Vec<String>,
    /// Rules whose condition returned an error or panicked.
    pub failed_conditions: Vec<String>,
    pub deliveries: Vec<DeliveryReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlertSummary {
    pub active_total: usize,
    pub active_info: usize,
    pub active_warning: usize,
    pub active_critical: usize,
    pub rule_count: usize,
    pub channel_count: usize,
    pub enabled_channel_count: usize,
    pub history_len: usize,
    pub history_capacity: usize,
    pub monitoring: bool,
}

/// Evaluates rules on a schedule and drives alert delivery.
///
/// Construct one per monitoring domain and share it as `Arc<AlertEngine>`;
/// [`start_monitoring`](Self::start_monitoring) needs the `Arc` to spawn the
/// background loop.
pub struct AlertEngine {
    config: EngineConfig,
    state: RwLock<EngineState>,
    channels: RwLock<Vec<Arc<dyn DeliveryChannel>>>,
    /// Keeps ticks single-flight when `evaluate_once` races the loop.
    tick_lock: tokio::sync::Mutex<()>,
    monitor: Mutex<Option<Monitor>>,
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl AlertEngine {
    pub fn new(config: EngineConfig) -> Self {
        let history = AlertHistory::new(config.history_limit);
        Self {
            config,
            state: RwLock::new(EngineState {
                rules: Vec::new(),
                active: HashMap::new(),
                pending_since: HashMap::new(),
                history,
            }),
            channels: RwLock::new(Vec::new()),
            tick_lock: tokio::sync::Mutex::new(()),
            monitor: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn state(&self) -> RwLockReadGuard<'_, EngineState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, EngineState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn channels(&self) -> RwLockReadGuard<'_, Vec<Arc<dyn DeliveryChannel>>> {
        self.channels.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn channels_mut(&self) -> RwLockWriteGuard<'_, Vec<Arc<dyn DeliveryChannel>>> {
        self.channels.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Rules ──

    /// Registers a rule. A rule with the same name is replaced in place and
    /// keeps its evaluation position and any active alert.
    pub fn add_rule(&self, rule: AlertRule) {
        let mut state = self.state_mut();
        let name = rule.name().to_string();
        let severity = rule.severity();
        match state.rules.iter().position(|r| r.name() == name) {
            Some(idx) => {
                state.rules[idx] = Arc::new(rule);
                state.pending_since.remove(&name);
                tracing::info!(rule = %name, %severity, "Alert rule replaced");
            }
            None => {
                state.rules.push(Arc::new(rule));
                tracing::info!(rule = %name, %severity, "Alert rule added");
            }
        }
    }

    /// Removes a rule, resolving its active alert immediately. Returns
    /// `false` if no rule has that name.
    pub fn remove_rule(&self, name: &str) -> bool {
        let now = Utc::now();
        let mut state = self.state_mut();
        let len_before = state.rules.len();
        state.rules.retain(|r| r.name() != name);
        if state.rules.len() == len_before {
            return false;
        }
        state.pending_since.remove(name);
        if let Some(alert) = state.resolve(name, now) {
            tracing::info!(rule = %name, alert_id = %alert.id, "Alert resolved (rule removed)");
        }
        tracing::info!(rule = %name, "Alert rule removed");
        true
    }

    pub fn rule_names(&self) -> Vec<String> {
        self.state()
            .rules
            .iter()
            .map(|r| r.name().to_string())
            .collect()
    }

    pub fn get_rule(&self, name: &str) -> Option<Arc<AlertRule>> {
        self.state().rules.iter().find(|r| r.name() == name).cloned()
    }

    // ── Channels ──

    /// Registers a delivery channel; a channel with the same name is replaced.
    pub fn add_channel(&self, channel: Arc<dyn DeliveryChannel>) {
        let mut channels = self.channels_mut();
        let name = channel.name().to_string();
        let channel_type = channel.channel_type().to_string();
        match channels.iter().position(|c| c.name() == name) {
            Some(idx) => channels[idx] = channel,
            None => channels.push(channel),
        }
        tracing::info!(channel = %name, %channel_type, "Delivery channel registered");
    }

    pub fn remove_channel(&self, name: &str) -> bool {
        let mut channels = self.channels_mut();
        let len_before = channels.len();
        channels.retain(|c| c.name() != name);
        channels.len() < len_before
    }

    /// Enables or disables a channel without unregistering it.
    pub fn set_channel_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.channels().iter().find(|c| c.name() == name) {
            Some(channel) => {
                channel.set_enabled(enabled);
                tracing::info!(channel = %name, enabled, "Delivery channel toggled");
                true
            }
            None => false,
        }
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    fn enabled_channels(&self) -> Vec<Arc<dyn DeliveryChannel>> {
        self.channels()
            .iter()
            .filter(|c| c.is_enabled())
            .cloned()
            .collect()
    }

    // ── Evaluation ──

    pub async fn evaluate_once(&self) -> TickReport {
        self.evaluate_once_at(Utc::now()).await
    }

    /// Runs one tick as if the clock read `now`.
    pub async fn evaluate_once_at(&self, now: DateTime<Utc>) -> TickReport {
        let _tick = self.tick_lock.lock().await;
        let rules = self.state().rules.clone();
        let mut report = TickReport::default();

        for rule in rules {
            let name = rule.name().to_string();
            let condition_met = match evaluate_condition(&rule) {
                Some(met) => met,
                None => {
                    report.failed_conditions.push(name.clone());
                    false
                }
            };

            let step = self.state_mut().step(&rule, condition_met, now);
            let to_deliver = match step {
                Step::Idle | Step::Pending => None,
                Step::Suppressed => {
                    tracing::debug!(rule = %name, "Alert suppressed (cooldown)");
                    report.suppressed.push(name);
                    None
                }
                Step::Created(alert) => {
                    tracing::warn!(
                        rule = %name,
                        alert_id = %alert.id,
                        severity = %alert.severity,
                        value = alert.value,
                        threshold = alert.threshold,
                        "Alert firing"
                    );
                    report.created.push(name);
                    Some(alert)
                }
                Step::Renotify(alert) => {
                    tracing::info!(rule = %name, alert_id = %alert.id, "Alert still firing, re-notifying");
                    report.renotified.push(name);
                    Some(alert)
                }
                Step::Resolved(alert) => {
                    tracing::info!(rule = %name, alert_id = %alert.id, "Alert resolved");
                    report.resolved.push(name);
                    None
                }
            };

            if let Some(alert) = to_deliver {
                let channels = self.enabled_channels();
                let delivery = if channels.is_empty() {
                    tracing::debug!(rule = %alert.rule_name, "No enabled channels");
                    DeliveryReport::default()
                } else {
                    fan_out(channels, &alert).await
                };
                self.state_mut().mark_sent(&alert, now);
                report.deliveries.push(delivery);
            }
        }

        report
    }

    // ── Monitoring loop ──

    /// Starts the background evaluation loop. Returns `false` if it is
    /// already running.
    pub fn start_monitoring(self: &Arc<Self>) -> bool {
        let mut monitor = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        if monitor.as_ref().is_some_and(|m| !m.handle.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            Arc::downgrade(self),
            cancel.clone(),
            self.config.interval(),
        ));
        *monitor = Some(Monitor { cancel, handle });
        tracing::info!(interval_secs = self.config.interval_secs, "Alert monitoring started");
        true
    }

    /// Stops the background loop and waits for it to exit. A tick already in
    /// progress, including its deliveries, completes first. Returns `false`
    /// if the loop was not running.
    pub async fn stop_monitoring(&self) -> bool {
        let monitor = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(monitor) = monitor else {
            return false;
        };

        monitor.cancel.cancel();
        if let Err(e) = monitor.handle.await {
            tracing::error!(error = %e, "Alert monitoring loop ended abnormally");
        }
        tracing::info!("Alert monitoring stopped");
        true
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|m| !m.handle.is_finished())
    }

    // ── Snapshots ──

    /// Active alerts in rule registration order.
    pub fn active_alerts(&self) -> Vec<Alert> {
        let state = self.state();
        state
            .rules
            .iter()
            .filter_map(|r| state.active.get(r.name()).cloned())
            .collect()
    }

    pub fn active_alert(&self, rule_name: &str) -> Option<Alert> {
        self.state().active.get(rule_name).cloned()
    }

    /// The newest `limit` history entries (all when `None`), oldest first.
    pub fn history(&self, limit: Option<usize>) -> Vec<Alert> {
        self.state().history.recent(limit)
    }

    pub fn summary(&self) -> AlertSummary {
        let (channel_count, enabled_channel_count) = {
            let channels = self.channels();
            (
                channels.len(),
                channels.iter().filter(|c| c.is_enabled()).count(),
            )
        };
        let monitoring = self.is_monitoring();
        let state = self.state();
        let count = |severity: Severity| {
            state
                .active
                .values()
                .filter(|a| a.severity == severity)
                .count()
        };
        AlertSummary {
            active_total: state.active.len(),
            active_info: count(Severity::Info),
            active_warning: count(Severity::Warning),
            active_critical: count(Severity::Critical),
            rule_count: state.rules.len(),
            channel_count,
            enabled_channel_count,
            history_len: state.history.len(),
            history_capacity: state.history.capacity(),
            monitoring,
        }
    }
}

impl EngineState {
    /// Advances one rule's lifecycle given this tick's observation.
    fn step(&mut self, rule: &Arc<AlertRule>, condition_met: bool, now: DateTime<Utc>) -> Step {
        // removed or replaced since this tick took its snapshot
        if !self.rules.iter().any(|r| Arc::ptr_eq(r, rule)) {
            return Step::Idle;
        }
        let name = rule.name();

        if !condition_met {
            self.pending_since.remove(name);
            return match self.resolve(name, now) {
                Some(alert) => Step::Resolved(alert),
                None => Step::Idle,
            };
        }

        if let Some(alert) = self.active.get(name) {
            let due = match alert.last_sent_at {
                None => true,
                Some(last) => elapsed_at_least(now - last, rule.cooldown_secs()),
            };
            return if due {
                Step::Renotify(alert.clone())
            } else {
                Step::Suppressed
            };
        }

        if rule.duration_secs() > 0 {
            let since = *self.pending_since.entry(name.to_string()).or_insert(now);
            if !elapsed_at_least(now - since, rule.duration_secs()) {
                return Step::Pending;
            }
        }
        self.pending_since.remove(name);

        let value = rule
            .condition()
            .observed_value()
            .unwrap_or_else(|| rule.threshold());
        let alert = rule.new_alert(value, now);
        self.active.insert(name.to_string(), alert.clone());
        self.history.push(alert.clone());
        Step::Created(alert)
    }

    fn resolve(&mut self, name: &str, now: DateTime<Utc>) -> Option<Alert> {
        let mut alert = self.active.remove(name)?;
        alert.resolve(now);
        self.history.update(&alert.id, |entry| entry.resolve(now));
        Some(alert)
    }

    /// Stamps the delivery baseline on the active alert and its history
    /// entry. The alert may already be gone if its rule was removed while
    /// delivering.
    fn mark_sent(&mut self, alert: &Alert, now: DateTime<Utc>) {
        if let Some(active) = self.active.get_mut(&alert.rule_name) {
            if active.id == alert.id {
                active.mark_sent(now);
            }
        }
        self.history.update(&alert.id, |entry| entry.mark_sent(now));
    }
}

/// Whether `elapsed` covers `secs`. A span too large for `Duration` is never
/// covered.
fn elapsed_at_least(elapsed: Duration, secs: u64) -> bool {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .is_some_and(|span| elapsed >= span)
}

/// Runs a rule's condition, turning errors and panics into `None`.
fn evaluate_condition(rule: &AlertRule) -> Option<bool> {
    match catch_unwind(AssertUnwindSafe(|| rule.condition().check())) {
        Ok(Ok(met)) => Some(met),
        Ok(Err(e)) => {
            tracing::error!(rule = %rule.name(), error = %e, "Alert condition failed");
            None
        }
        Err(_) => {
            tracing::error!(rule = %rule.name(), "Alert condition panicked");
            None
        }
    }
}

async fn run_loop(
    engine: Weak<AlertEngine>,
    cancel: CancellationToken,
    interval: std::time::Duration,
) {
    loop {
        let Some(strong) = engine.upgrade() else {
            tracing::debug!("Alert engine dropped, monitoring loop exiting");
            break;
        };

        // Each tick runs in its own task so a panic cannot take the loop down.
        let tick = tokio::spawn(async move {
            let report = strong.evaluate_once().await;
            tracing::debug!(
                created = report.created.len(),
                renotified = report.renotified.len(),
                resolved = report.resolved.len(),
                "Alert evaluation tick finished"
            );
        });
        if let Err(e) = tick.await {
            tracing::error!(error = %e, "Alert evaluation tick failed");
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
