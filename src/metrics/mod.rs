//! Host gauges behind a uniform "give me the value of X" contract.
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

pub mod snapshot;
pub mod system;

pub use snapshot::{ConsumerReport, ResourceSnapshot, SystemResourceSnapshot};
pub use system::SysinfoMetrics;

const DISK_PREFIX: &str = "disk_";

/// A monitored quantity. Its display form is the key used in configuration,
/// alert state and status output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Parameter {
    CpuUsage,
    RamUsage,
    CpuTemperature,
    /// Usage percentage of the filesystem mounted at this path.
    Disk(String),
}

impl Parameter {
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "cpu_usage" => Some(Parameter::CpuUsage),
            "ram_usage" => Some(Parameter::RamUsage),
            "cpu_temperature" => Some(Parameter::CpuTemperature),
            other => other
                .strip_prefix(DISK_PREFIX)
                .filter(|mount| !mount.is_empty())
                .map(|mount| Parameter::Disk(mount.to_string())),
        }
    }

    /// CPU, memory and temperature alerts carry a top-consumers snapshot; disk
    /// alerts do not.
    pub fn wants_process_context(&self) -> bool {
        !matches!(self, Parameter::Disk(_))
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parameter::CpuUsage => f.write_str("cpu_usage"),
            Parameter::RamUsage => f.write_str("ram_usage"),
            Parameter::CpuTemperature => f.write_str("cpu_temperature"),
            Parameter::Disk(mount) => write!(f, "{DISK_PREFIX}{mount}"),
        }
    }
}

/// Source of current readings.
///
/// `None` means no reading is available (missing sensor, unknown mount point),
/// which is distinct from a reading of `0.0`.
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn value(&self, parameter: &Parameter) -> Option<f64>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentMetrics {
    pub cpu_usage: Option<f64>,
    pub ram_usage: Option<f64>,
    pub cpu_temperature: Option<f64>,
    pub disk_usage: BTreeMap<String, Option<f64>>,
}

/// Reads every gauge once, for presentation.
pub async fn current_metrics<'a>(
    source: &dyn MetricSource,
    mount_points: impl IntoIterator<Item = &'a String>,
) -> CurrentMetrics {
    let mut disk_usage = BTreeMap::new();
    for mount in mount_points {
        let value = source.value(&Parameter::Disk(mount.clone())).await;
        disk_usage.insert(mount.clone(), value);
    }
    CurrentMetrics {
        cpu_usage: source.value(&Parameter::CpuUsage).await,
        ram_usage: source.value(&Parameter::RamUsage).await,
        cpu_temperature: source.value(&Parameter::CpuTemperature).await,
        disk_usage,
    }
}
