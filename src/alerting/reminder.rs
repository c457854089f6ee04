use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info};

use super::messages::reminder_message;
use super::registry::{MonitoringRegistry, ReminderHandle};
use crate::config::MonitoringConfigSource;
use crate::metrics::Parameter;
use crate::notifications::{deliver_text, NotificationSink};

/// Everything a reminder task needs, detached from the engine that armed it.
pub(crate) struct ReminderTask {
    pub parameter: Parameter,
    pub generation: u64,
    pub registry: Arc<MonitoringRegistry>,
    pub sink: Arc<dyn NotificationSink>,
    pub config_source: Arc<dyn MonitoringConfigSource>,
    pub locale: String,
}

impl ReminderTask {
    /// Spawns the task with `period` as its first delay.
    pub fn spawn(self, period: Duration) -> ReminderHandle {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let handle = tokio::spawn(self.run(period, cancel_rx));
        ReminderHandle::new(handle, cancel_tx)
    }

    async fn run(self, mut period: Duration, mut cancel_rx: oneshot::Receiver<()>) {
        let key = self.parameter.to_string();
        info!(parameter = %key, ?period, "Reminder armed.");

        loop {
            tokio::select! {
                biased;
                // Fires on an explicit cancel and when the handle is dropped.
                _ = &mut cancel_rx => {
                    debug!(parameter = %key, "Reminder cancelled.");
                    return;
                }
                _ = tokio::time::sleep(period) => {}
            }

            let Some(alert) = self.registry.current_alert(&key, self.generation) else {
                info!(parameter = %key, "Alert no longer active, stopping reminders.");
                return;
            };

            info!(
                parameter = %key,
                value = alert.current_value,
                threshold = alert.threshold,
                "Sending reminder."
            );
            let message = reminder_message(&self.parameter, &alert, Local::now(), &self.locale);
            deliver_text(self.sink.as_ref(), &message).await;

            let config = self.config_source.current().await;
            match config
                .parameter(&self.parameter)
                .and_then(|c| c.reminder_period())
            {
                Some(next) => period = next,
                None => {
                    info!(parameter = %key, "Reminders disabled, not re-arming.");
                    return;
                }
            }
        }
    }
}
