use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::messages::{alert_message, consumers_block, recovery_message};
use super::registry::MonitoringRegistry;
use super::reminder::ReminderTask;
use crate::config::{MonitoringConfigSource, ParameterConfig};
use crate::metrics::{Parameter, ResourceSnapshot};
use crate::notifications::{deliver_text, NotificationSink};

/// What a single `check` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// No reading was available.
    Skipped,
    /// Within threshold and nothing was pending.
    Normal,
    /// Breaching, but the confirmation window has not elapsed.
    Pending,
    /// A new alert was confirmed and announced.
    Alerted,
    /// Breaching with an alert already active.
    StillAlerting,
    /// Back within threshold; the alert was cleared and recovery announced.
    Recovered,
    /// Back within threshold before a pending breach was confirmed.
    HysteresisVoided,
}

/// Per-parameter alert state machine: confirmation, announcement, reminders, recovery.
pub struct ThresholdEngine {
    registry: Arc<MonitoringRegistry>,
    sink: Arc<dyn NotificationSink>,
    config_source: Arc<dyn MonitoringConfigSource>,
    resources: Arc<dyn ResourceSnapshot>,
    locale: String,
}

impl ThresholdEngine {
    pub fn new(
        registry: Arc<MonitoringRegistry>,
        sink: Arc<dyn NotificationSink>,
        config_source: Arc<dyn MonitoringConfigSource>,
        resources: Arc<dyn ResourceSnapshot>,
        locale: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            sink,
            config_source,
            resources,
            locale: locale.into(),
        }
    }

    pub fn registry(&self) -> &Arc<MonitoringRegistry> {
        &self.registry
    }

    pub fn sink(&self) -> &Arc<dyn NotificationSink> {
        &self.sink
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Feeds one reading for `parameter` through the state machine.
    pub async fn check(
        &self,
        parameter: &Parameter,
        value: Option<f64>,
        config: &ParameterConfig,
    ) -> CheckOutcome {
        let key = parameter.to_string();
        let Some(value) = value else {
            debug!(parameter = %key, "No reading available, skipping this tick.");
            return CheckOutcome::Skipped;
        };

        // Strictly above threshold counts as a breach; equality does not.
        if value > config.threshold {
            if self.registry.update_alert(&key, value, config.threshold) {
                debug!(parameter = %key, value, "Alert still active.");
                self.reconcile_reminder(parameter, config);
                return CheckOutcome::StillAlerting;
            }

            if let Some(window) = config.hysteresis_window() {
                let now = Instant::now();
                match self.registry.hysteresis_start(&key) {
                    None => {
                        info!(
                            parameter = %key,
                            value,
                            ?window,
                            "Breach observed, waiting for confirmation."
                        );
                        self.registry.start_hysteresis(&key, now);
                        return CheckOutcome::Pending;
                    }
                    Some(start) if now.duration_since(start) < window => {
                        debug!(parameter = %key, value, "Breach not yet confirmed.");
                        return CheckOutcome::Pending;
                    }
                    Some(_) => {
                        info!(parameter = %key, value, "Breach confirmed.");
                    }
                }
            }

            self.promote(parameter, value, config).await;
            CheckOutcome::Alerted
        } else {
            let voided = self.registry.clear_hysteresis(&key);
            if let Some(alert) = self.registry.end_alert(&key) {
                self.registry.cancel_reminder(&key);
                info!(
                    parameter = %key,
                    value,
                    threshold = config.threshold,
                    since = %alert.alert_start,
                    "Parameter recovered."
                );
                let message = recovery_message(
                    parameter,
                    value,
                    config.threshold,
                    Local::now(),
                    &self.locale,
                );
                deliver_text(self.sink.as_ref(), &message).await;
                CheckOutcome::Recovered
            } else if voided {
                info!(parameter = %key, value, "Pending breach voided before confirmation.");
                CheckOutcome::HysteresisVoided
            } else {
                CheckOutcome::Normal
            }
        }
    }

    async fn promote(&self, parameter: &Parameter, value: f64, config: &ParameterConfig) {
        let key = parameter.to_string();
        self.registry.clear_hysteresis(&key);
        let generation = self.registry.begin_alert(&key, value, config.threshold);
        warn!(parameter = %key, value, threshold = config.threshold, "New alert.");

        let mut message =
            alert_message(parameter, value, config.threshold, Local::now(), &self.locale);
        if parameter.wants_process_context() {
            if let Some(report) = self.resources.top_consumers().await {
                message.push_str("\n\n");
                message.push_str(&consumers_block(&report, &self.locale));
            }
        }
        deliver_text(self.sink.as_ref(), &message).await;

        if let Some(period) = config.reminder_period() {
            self.arm_reminder(parameter, generation, period);
        }
    }

    /// Keeps the reminder task in line with the current configuration while an
    /// alert is active.
    fn reconcile_reminder(&self, parameter: &Parameter, config: &ParameterConfig) {
        let key = parameter.to_string();
        match config.reminder_period() {
            Some(period) if !self.registry.has_live_reminder(&key) => {
                let Some(alert) = self.registry.alert(&key) else {
                    return;
                };
                warn!(parameter = %key, "Reminder enabled but not running, re-arming.");
                self.arm_reminder(parameter, alert.generation, period);
            }
            None => {
                if self.registry.cancel_reminder(&key) {
                    info!(parameter = %key, "Reminders disabled, cancelled running reminder.");
                }
            }
            Some(_) => {}
        }
    }

    fn arm_reminder(&self, parameter: &Parameter, generation: u64, period: Duration) {
        let task = ReminderTask {
            parameter: parameter.clone(),
            generation,
            registry: Arc::clone(&self.registry),
            sink: Arc::clone(&self.sink),
            config_source: Arc::clone(&self.config_source),
            locale: self.locale.clone(),
        };
        self.registry
            .set_reminder(&parameter.to_string(), task.spawn(period));
    }
}
