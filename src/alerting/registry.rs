use chrono::{DateTime, Local};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// An active alert. Present only between confirmation and recovery.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertState {
    pub current_value: f64,
    pub threshold: f64,
    pub alert_start: DateTime<Local>,
    /// Distinguishes this alert from earlier alerts on the same parameter.
    pub generation: u64,
}

/// A breach waiting out its confirmation window.
#[derive(Debug, Clone, Copy)]
pub struct HysteresisState {
    pub start_time: Instant,
}

/// A running reminder task. Dropping the handle cancels the task.
pub struct ReminderHandle {
    handle: JoinHandle<()>,
    _cancel: oneshot::Sender<()>,
}

impl ReminderHandle {
    pub(crate) fn new(handle: JoinHandle<()>, cancel: oneshot::Sender<()>) -> Self {
        Self {
            handle,
            _cancel: cancel,
        }
    }

    pub fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertDetail {
    pub active: bool,
    pub current_value: f64,
    pub threshold: f64,
    pub alert_start: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReminderDetail {
    pub is_alive: bool,
    pub timer_exists: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitoringStatus {
    pub monitoring_active: bool,
    pub active_alerts: usize,
    pub active_reminders: usize,
    pub alert_details: BTreeMap<String, AlertDetail>,
    pub reminder_details: BTreeMap<String, ReminderDetail>,
}

/// Alert, confirmation and reminder state for every monitored parameter,
/// keyed by the parameter's display name.
#[derive(Default)]
pub struct MonitoringRegistry {
    alerts: DashMap<String, AlertState>,
    hysteresis: DashMap<String, HysteresisState>,
    reminders: DashMap<String, ReminderHandle>,
    next_generation: AtomicU64,
}

impl MonitoringRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a newly confirmed alert and returns its generation.
    pub fn begin_alert(&self, key: &str, value: f64, threshold: f64) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.alerts.insert(
            key.to_string(),
            AlertState {
                current_value: value,
                threshold,
                alert_start: Local::now(),
                generation,
            },
        );
        generation
    }

    /// Refreshes the latest reading of an existing alert. Returns `false` if there is none.
    pub fn update_alert(&self, key: &str, value: f64, threshold: f64) -> bool {
        match self.alerts.get_mut(key) {
            Some(mut alert) => {
                alert.current_value = value;
                alert.threshold = threshold;
                true
            }
            None => false,
        }
    }

    pub fn alert(&self, key: &str) -> Option<AlertState> {
        self.alerts.get(key).map(|a| a.clone())
    }

    /// The alert for `key`, but only if it is still the one with `generation`.
    pub fn current_alert(&self, key: &str, generation: u64) -> Option<AlertState> {
        self.alerts
            .get(key)
            .filter(|a| a.generation == generation)
            .map(|a| a.clone())
    }

    pub fn end_alert(&self, key: &str) -> Option<AlertState> {
        self.alerts.remove(key).map(|(_, alert)| alert)
    }

    pub fn hysteresis_start(&self, key: &str) -> Option<Instant> {
        self.hysteresis.get(key).map(|h| h.start_time)
    }

    pub fn start_hysteresis(&self, key: &str, start_time: Instant) {
        self.hysteresis
            .insert(key.to_string(), HysteresisState { start_time });
    }

    /// Returns `true` if a pending confirmation was discarded.
    pub fn clear_hysteresis(&self, key: &str) -> bool {
        self.hysteresis.remove(key).is_some()
    }

    /// Installs a reminder for `key`, cancelling any previous one.
    pub fn set_reminder(&self, key: &str, reminder: ReminderHandle) {
        self.reminders.insert(key.to_string(), reminder);
    }

    /// Whether a reminder task for `key` is still running. Finished tasks are pruned.
    pub fn has_live_reminder(&self, key: &str) -> bool {
        self.reminders.remove_if(key, |_, r| !r.is_alive());
        self.reminders.contains_key(key)
    }

    /// Cancels the reminder for `key`. Returns `true` if a running one was cancelled.
    pub fn cancel_reminder(&self, key: &str) -> bool {
        self.reminders
            .remove(key)
            .map(|(_, reminder)| reminder.is_alive())
            .unwrap_or(false)
    }

    /// Cancels every reminder and forgets all alert and confirmation state.
    pub fn clear(&self) {
        self.reminders.clear();
        self.alerts.clear();
        self.hysteresis.clear();
    }

    pub fn status(&self, monitoring_active: bool) -> MonitoringStatus {
        let alert_details: BTreeMap<String, AlertDetail> = self
            .alerts
            .iter()
            .map(|entry| {
                let alert = entry.value();
                let detail = AlertDetail {
                    active: true,
                    current_value: alert.current_value,
                    threshold: alert.threshold,
                    alert_start: alert.alert_start.to_rfc3339(),
                };
                (entry.key().clone(), detail)
            })
            .collect();
        let reminder_details: BTreeMap<String, ReminderDetail> = self
            .reminders
            .iter()
            .map(|entry| {
                let detail = ReminderDetail {
                    is_alive: entry.value().is_alive(),
                    timer_exists: true,
                };
                (entry.key().clone(), detail)
            })
            .collect();

        MonitoringStatus {
            monitoring_active,
            active_alerts: alert_details.len(),
            active_reminders: reminder_details.values().filter(|r| r.is_alive).count(),
            alert_details,
            reminder_details,
        }
    }
}
