use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

use super::store::JsonConfigStore;
use crate::metrics::Parameter;

const DEFAULT_MONITORING_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderUnit {
    #[default]
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl ReminderUnit {
    pub fn seconds_per_unit(self) -> u64 {
        match self {
            ReminderUnit::Seconds => 1,
            ReminderUnit::Minutes => 60,
            ReminderUnit::Hours => 3_600,
            ReminderUnit::Days => 86_400,
        }
    }
}

/// Thresholds and timers for one monitored quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterConfig {
    pub enabled: bool,
    /// Percent for usage parameters, degrees Celsius for temperature.
    pub threshold: f64,
    pub reminder_enabled: bool,
    /// Expressed in `reminder_unit`.
    pub reminder_interval: f64,
    pub reminder_unit: ReminderUnit,
    pub hysteresis_enabled: bool,
    /// Seconds a breach must persist before it is confirmed.
    pub hysteresis_duration: f64,
}

impl Default for ParameterConfig {
    fn default() -> Self {
        Self::with_threshold(90.0, 300.0)
    }
}

impl ParameterConfig {
    pub fn with_threshold(threshold: f64, reminder_seconds: f64) -> Self {
        Self {
            enabled: false,
            threshold,
            reminder_enabled: false,
            reminder_interval: reminder_seconds,
            reminder_unit: ReminderUnit::Seconds,
            hysteresis_enabled: false,
            hysteresis_duration: 0.0,
        }
    }

    /// Effective reminder period, or `None` when reminders are off.
    pub fn reminder_period(&self) -> Option<Duration> {
        if !self.reminder_enabled {
            return None;
        }
        let seconds = self.reminder_interval * self.reminder_unit.seconds_per_unit() as f64;
        (seconds.is_finite() && seconds > 0.0).then(|| Duration::from_secs_f64(seconds))
    }

    /// Confirmation window, or `None` when breaches alert immediately.
    pub fn hysteresis_window(&self) -> Option<Duration> {
        if !self.hysteresis_enabled {
            return None;
        }
        let seconds = if self.hysteresis_duration.is_finite() {
            self.hysteresis_duration.max(0.0)
        } else {
            0.0
        };
        Some(Duration::from_secs_f64(seconds))
    }

    fn sanitized(mut self, parameter: &str) -> Self {
        if !(self.threshold >= 0.0) {
            warn!(parameter, threshold = self.threshold, "Invalid threshold, clamping to 0.");
            self.threshold = 0.0;
        }
        if !(self.hysteresis_duration >= 0.0) {
            warn!(
                parameter,
                duration = self.hysteresis_duration,
                "Invalid hysteresis duration, clamping to 0."
            );
            self.hysteresis_duration = 0.0;
        }
        if self.reminder_enabled && self.reminder_period().is_none() {
            warn!(
                parameter,
                interval = self.reminder_interval,
                "Reminder enabled with a non-positive interval, disabling reminders."
            );
            self.reminder_enabled = false;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub cpu_usage: ParameterConfig,
    pub ram_usage: ParameterConfig,
    pub cpu_temperature: ParameterConfig,
    /// Keyed by mount point.
    pub disk_usage: BTreeMap<String, ParameterConfig>,
    /// Seconds between ticks while monitoring is enabled.
    pub monitoring_interval: u64,
    pub global_enabled: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            cpu_usage: ParameterConfig::with_threshold(80.0, 300.0),
            ram_usage: ParameterConfig::with_threshold(85.0, 300.0),
            cpu_temperature: ParameterConfig::with_threshold(70.0, 600.0),
            disk_usage: BTreeMap::new(),
            monitoring_interval: DEFAULT_MONITORING_INTERVAL_SECS,
            global_enabled: false,
        }
    }
}

impl MonitoringConfig {
    pub fn parameter(&self, parameter: &Parameter) -> Option<&ParameterConfig> {
        match parameter {
            Parameter::CpuUsage => Some(&self.cpu_usage),
            Parameter::RamUsage => Some(&self.ram_usage),
            Parameter::CpuTemperature => Some(&self.cpu_temperature),
            Parameter::Disk(mount) => self.disk_usage.get(mount),
        }
    }

    /// Every enabled parameter in evaluation order: cpu, ram, temperature, disks.
    pub fn enabled_parameters(&self) -> Vec<(Parameter, ParameterConfig)> {
        let fixed = [
            (Parameter::CpuUsage, &self.cpu_usage),
            (Parameter::RamUsage, &self.ram_usage),
            (Parameter::CpuTemperature, &self.cpu_temperature),
        ];
        let disks = self
            .disk_usage
            .iter()
            .map(|(mount, config)| (Parameter::Disk(mount.clone()), config));

        fixed
            .into_iter()
            .chain(disks)
            .filter(|(_, config)| config.enabled)
            .map(|(parameter, config)| (parameter, config.clone()))
            .collect()
    }

    pub fn interval(&self) -> Duration {
        if self.monitoring_interval == 0 {
            Duration::from_secs(DEFAULT_MONITORING_INTERVAL_SECS)
        } else {
            Duration::from_secs(self.monitoring_interval)
        }
    }

    pub fn sanitized(mut self) -> Self {
        self.cpu_usage = self.cpu_usage.sanitized("cpu_usage");
        self.ram_usage = self.ram_usage.sanitized("ram_usage");
        self.cpu_temperature = self.cpu_temperature.sanitized("cpu_temperature");
        self.disk_usage = self
            .disk_usage
            .into_iter()
            .map(|(mount, config)| {
                let config = config.sanitized(&mount);
                (mount, config)
            })
            .collect();
        self
    }
}

/// Where the monitoring loop and reminder tasks read the current configuration from.
///
/// Implementations must return a complete document every time; reminders call this
/// at fire time so edits take effect on the next reminder.
#[async_trait]
pub trait MonitoringConfigSource: Send + Sync {
    async fn current(&self) -> MonitoringConfig;
}

#[async_trait]
impl MonitoringConfigSource for JsonConfigStore<MonitoringConfig> {
    async fn current(&self) -> MonitoringConfig {
        self.load_async().await.sanitized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    #[test]
    fn reminder_period_uses_unit() {
        let mut config = ParameterConfig::with_threshold(80.0, 2.0);
        assert_eq!(config.reminder_period(), None);

        config.reminder_enabled = true;
        config.reminder_unit = ReminderUnit::Minutes;
        assert_eq!(config.reminder_period(), Some(Duration::from_secs(120)));

        config.reminder_unit = ReminderUnit::Days;
        config.reminder_interval = 0.5;
        assert_eq!(config.reminder_period(), Some(Duration::from_secs(43_200)));
    }

    #[test]
    fn hysteresis_window_only_when_enabled() {
        let mut config = ParameterConfig::with_threshold(80.0, 300.0);
        config.hysteresis_duration = 5.0;
        assert_eq!(config.hysteresis_window(), None);
        config.hysteresis_enabled = true;
        assert_eq!(config.hysteresis_window(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn sanitizing_clamps_invalid_values() {
        let mut config = MonitoringConfig::default();
        config.cpu_usage.threshold = -5.0;
        config.ram_usage.hysteresis_duration = -1.0;
        config.cpu_temperature.reminder_enabled = true;
        config.cpu_temperature.reminder_interval = 0.0;

        let config = config.sanitized();
        assert_eq!(config.cpu_usage.threshold, 0.0);
        assert_eq!(config.ram_usage.hysteresis_duration, 0.0);
        assert!(!config.cpu_temperature.reminder_enabled);
    }

    #[test]
    fn enabled_parameters_follow_evaluation_order() {
        let mut config = MonitoringConfig::default();
        config.ram_usage.enabled = true;
        config.cpu_usage.enabled = true;
        let mut disk = ParameterConfig::default();
        disk.enabled = true;
        config.disk_usage.insert("/".to_string(), disk.clone());
        config
            .disk_usage
            .insert("/mnt/off".to_string(), ParameterConfig::default());

        let names: Vec<String> = config
            .enabled_parameters()
            .into_iter()
            .map(|(p, _)| p.to_string())
            .collect();
        assert_eq!(names, vec!["cpu_usage", "ram_usage", "disk_/"]);
    }

    #[tokio::test]
    async fn legacy_document_gains_hysteresis_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitoring_config.json");
        let stored = json!({
            "cpu_usage": {"enabled": true, "threshold": 75.0},
            "disk_usage": {"/data": {"enabled": true, "threshold": 95}},
            "global_enabled": true
        });
        fs::write(&path, stored.to_string()).unwrap();

        let config = JsonConfigStore::<MonitoringConfig>::new(&path).current().await;
        assert!(config.global_enabled);
        assert_eq!(config.monitoring_interval, 60);
        assert!(config.cpu_usage.enabled);
        assert_eq!(config.cpu_usage.threshold, 75.0);
        assert_eq!(config.cpu_usage.reminder_interval, 300.0);
        assert!(!config.cpu_usage.hysteresis_enabled);
        assert_eq!(config.ram_usage.threshold, 85.0);
        assert_eq!(config.cpu_temperature.reminder_interval, 600.0);

        let disk = &config.disk_usage["/data"];
        assert_eq!(disk.threshold, 95.0);
        assert_eq!(disk.reminder_unit, ReminderUnit::Seconds);
    }

    #[test]
    fn zero_interval_falls_back_to_default() {
        let config = MonitoringConfig {
            monitoring_interval: 0,
            ..MonitoringConfig::default()
        };
        assert_eq!(config.interval(), Duration::from_secs(60));
    }
}
