//! Lifecycle of the background resource monitor.
use chrono::Local;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub mod resource_loop;

pub use resource_loop::ResourceMonitor;

use crate::alerting::messages::test_message;
use crate::alerting::{MonitoringStatus, ThresholdEngine};
use crate::config::MonitoringConfigSource;
use crate::metrics::{current_metrics, CurrentMetrics, MetricSource};
use crate::notifications::SenderError;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Monitoring tick panicked: {0}")]
    TickPanicked(String),
    #[error("Test notification failed: {0}")]
    Notification(#[from] SenderError),
}

type LoopSlot = Option<(JoinHandle<()>, watch::Sender<()>)>;

/// Starts, stops and reports on the resource monitoring loop.
pub struct MonitoringService {
    engine: Arc<ThresholdEngine>,
    metrics: Arc<dyn MetricSource>,
    config_source: Arc<dyn MonitoringConfigSource>,
    hostname: String,
    running: Mutex<LoopSlot>,
}

impl MonitoringService {
    pub fn new(
        engine: Arc<ThresholdEngine>,
        metrics: Arc<dyn MetricSource>,
        config_source: Arc<dyn MonitoringConfigSource>,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            metrics,
            config_source,
            hostname: hostname.into(),
            running: Mutex::new(None),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, LoopSlot> {
        // Nothing panics while holding the lock, but stay usable if something did.
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_active(&self) -> bool {
        self.slot()
            .as_ref()
            .is_some_and(|(handle, _)| !handle.is_finished())
    }

    /// Spawns the loop unless it is already running. Returns `true` if it was started.
    pub fn start(&self) -> bool {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|(handle, _)| !handle.is_finished()) {
            info!("Resource monitoring already running.");
            return false;
        }

        let (stop_tx, stop_rx) = watch::channel(());
        let monitor = ResourceMonitor::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.metrics),
            Arc::clone(&self.config_source),
        );
        let handle = tokio::spawn(monitor.run(stop_rx));
        *slot = Some((handle, stop_tx));
        info!("Resource monitoring started.");
        true
    }

    /// Stops the loop, cancels every reminder and forgets all alert state.
    pub async fn stop(&self) -> bool {
        let taken = self.slot().take();
        let Some((mut handle, stop_tx)) = taken else {
            self.engine.registry().clear();
            return false;
        };

        // A tick in flight may still promote an alert, so the loop has to be
        // gone before the registry is cleared.
        if stop_tx.send(()).is_err() {
            warn!("Monitoring loop had already exited.");
        }
        match tokio::time::timeout(STOP_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => info!("Resource monitoring stopped."),
            Ok(Err(e)) => warn!(error = %e, "Monitoring loop ended abnormally."),
            Err(_) => {
                warn!(timeout = ?STOP_TIMEOUT, "Monitoring loop did not stop in time, aborting.");
                handle.abort();
                let _ = handle.await;
            }
        }
        self.engine.registry().clear();
        true
    }

    pub fn status(&self) -> MonitoringStatus {
        self.engine.registry().status(self.is_active())
    }

    /// Sends a sample notification so the operator can check delivery.
    pub async fn send_test_alert(&self) -> Result<(), MonitorError> {
        let message = test_message(&self.hostname, Local::now(), self.engine.locale());
        self.engine.sink().send_text(&message).await?;
        info!("Test alert sent.");
        Ok(())
    }

    /// Current readings for every gauge, including configured mount points.
    pub async fn current_metrics(&self) -> CurrentMetrics {
        let config = self.config_source.current().await;
        current_metrics(self.metrics.as_ref(), config.disk_usage.keys()).await
    }
}
