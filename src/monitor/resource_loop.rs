use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::MonitorError;
use crate::alerting::ThresholdEngine;
use crate::config::MonitoringConfigSource;
use crate::metrics::MetricSource;

/// Poll period while monitoring is globally disabled.
pub const DISABLED_POLL: Duration = Duration::from_secs(10);
/// Pause after a tick that failed unexpectedly.
pub const FAILURE_BACKOFF: Duration = Duration::from_secs(30);

/// The periodic resource check: reads configuration, samples every enabled
/// parameter and feeds the readings to the threshold engine.
pub struct ResourceMonitor {
    engine: Arc<ThresholdEngine>,
    metrics: Arc<dyn MetricSource>,
    config_source: Arc<dyn MonitoringConfigSource>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

impl ResourceMonitor {
    pub fn new(
        engine: Arc<ThresholdEngine>,
        metrics: Arc<dyn MetricSource>,
        config_source: Arc<dyn MonitoringConfigSource>,
    ) -> Self {
        Self {
            engine,
            metrics,
            config_source,
        }
    }

    /// Runs one tick and returns how long to wait before the next one.
    async fn tick(&self) -> Duration {
        let config = self.config_source.current().await;
        if !config.global_enabled {
            debug!("Monitoring globally disabled.");
            return DISABLED_POLL;
        }

        for (parameter, parameter_config) in config.enabled_parameters() {
            let value = self.metrics.value(&parameter).await;
            if value.is_none() {
                warn!(parameter = %parameter, "Reading unavailable, skipping parameter.");
            }
            self.engine.check(&parameter, value, &parameter_config).await;
        }
        config.interval()
    }

    /// A tick with panics turned into errors, so the loop outlives them.
    async fn guarded_tick(&self) -> Result<Duration, MonitorError> {
        AssertUnwindSafe(self.tick())
            .catch_unwind()
            .await
            .map_err(|payload| MonitorError::TickPanicked(panic_message(payload.as_ref())))
    }

    /// Loops until `stop_rx` fires or its sender is dropped.
    pub async fn run(self, mut stop_rx: watch::Receiver<()>) {
        info!("Resource monitoring loop started.");
        loop {
            if stop_rx.has_changed().unwrap_or(true) {
                break;
            }

            let pause = match self.guarded_tick().await {
                Ok(pause) => pause,
                Err(e) => {
                    error!(error = %e, backoff = ?FAILURE_BACKOFF, "Monitoring tick failed.");
                    FAILURE_BACKOFF
                }
            };

            tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        info!("Resource monitoring loop stopped.");
    }
}
