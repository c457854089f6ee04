use async_trait::async_trait;
use std::path::Path;
use sysinfo::{Components, Disks, System};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{MetricSource, Parameter};

/// Sensor labels preferred for the CPU temperature, in order.
const PREFERRED_TEMPERATURE_SENSORS: [&str; 2] = ["coretemp", "cpu_thermal"];

/// `MetricSource` backed by `sysinfo`.
pub struct SysinfoMetrics {
    system: Mutex<System>,
    disks: Mutex<Disks>,
    components: Mutex<Components>,
}

impl Default for SysinfoMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoMetrics {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            disks: Mutex::new(Disks::new_with_refreshed_list()),
            components: Mutex::new(Components::new_with_refreshed_list()),
        }
    }

    async fn cpu_usage(&self) -> Option<f64> {
        let mut sys = self.system.lock().await;
        // CPU usage is a delta between two refreshes.
        sys.refresh_cpu_usage();
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        sys.refresh_cpu_usage();
        let usage = sys.global_cpu_usage();
        usage.is_finite().then_some(usage as f64)
    }

    async fn ram_usage(&self) -> Option<f64> {
        let mut sys = self.system.lock().await;
        sys.refresh_memory();
        percent_of(sys.used_memory(), sys.total_memory())
    }

    async fn cpu_temperature(&self) -> Option<f64> {
        let mut components = self.components.lock().await;
        components.refresh(true);
        let readings: Vec<(String, Option<f32>)> = components
            .list()
            .iter()
            .map(|c| (c.label().to_string(), c.temperature()))
            .collect();
        let picked = pick_temperature(&readings);
        if picked.is_none() {
            debug!(sensors = readings.len(), "No temperature sensor reported a value.");
        }
        picked
    }

    async fn disk_usage(&self, mount_point: &str) -> Option<f64> {
        let mut disks = self.disks.lock().await;
        disks.refresh(true);
        let target = Path::new(mount_point);
        let disk = disks.list().iter().find(|d| d.mount_point() == target);
        match disk {
            Some(disk) => {
                let total = disk.total_space();
                percent_of(total.saturating_sub(disk.available_space()), total)
            }
            None => {
                warn!(mount_point, "Mount point not found among disks.");
                None
            }
        }
    }
}

#[async_trait]
impl MetricSource for SysinfoMetrics {
    async fn value(&self, parameter: &Parameter) -> Option<f64> {
        match parameter {
            Parameter::CpuUsage => self.cpu_usage().await,
            Parameter::RamUsage => self.ram_usage().await,
            Parameter::CpuTemperature => self.cpu_temperature().await,
            Parameter::Disk(mount) => self.disk_usage(mount).await,
        }
    }
}

fn percent_of(used: u64, total: u64) -> Option<f64> {
    (total > 0).then(|| used as f64 / total as f64 * 100.0)
}

/// Picks the CPU temperature: a preferred sensor if any reports a value,
/// otherwise the first sensor that does.
fn pick_temperature(readings: &[(String, Option<f32>)]) -> Option<f64> {
    let valid = |value: &Option<f32>| value.filter(|v| v.is_finite());

    PREFERRED_TEMPERATURE_SENSORS
        .iter()
        .find_map(|preferred| {
            readings
                .iter()
                .filter(|(label, _)| label.to_ascii_lowercase().contains(preferred))
                .find_map(|(_, value)| valid(value))
        })
        .or_else(|| readings.iter().find_map(|(_, value)| valid(value)))
        .map(f64::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(label: &str, value: Option<f32>) -> (String, Option<f32>) {
        (label.to_string(), value)
    }

    #[test]
    fn prefers_coretemp_over_other_sensors() {
        let readings = vec![
            reading("nvme Composite", Some(40.0)),
            reading("cpu_thermal temp1", Some(55.0)),
            reading("coretemp Package id 0", Some(61.0)),
        ];
        assert_eq!(pick_temperature(&readings), Some(61.0));
    }

    #[test]
    fn falls_back_to_first_reporting_sensor() {
        let readings = vec![
            reading("acpitz", None),
            reading("nvme Composite", Some(40.0)),
            reading("coretemp Core 0", None),
        ];
        assert_eq!(pick_temperature(&readings), Some(40.0));
    }

    #[test]
    fn no_sensors_means_no_reading() {
        assert_eq!(pick_temperature(&[]), None);
        assert_eq!(pick_temperature(&[reading("x", Some(f32::NAN))]), None);
    }

    #[test]
    fn percent_requires_positive_total() {
        assert_eq!(percent_of(50, 200), Some(25.0));
        assert_eq!(percent_of(0, 0), None);
    }
}
