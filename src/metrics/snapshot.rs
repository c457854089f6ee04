//! Top resource consumers, attached to CPU, memory and temperature alerts.
use async_trait::async_trait;
use serde::Serialize;
use std::cmp::Ordering;
use std::time::Duration;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::sync::Mutex;
use tracing::debug;

use crate::commands::run_command;

pub const TOP_CONSUMERS: usize = 5;
const DOCKER_TIMEOUT: Duration = Duration::from_secs(10);
const DOCKER_STATS_FORMAT: &str = "{{.Name}}\t{{.CPUPerc}}\t{{.MemPerc}}";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessUsage {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerUsage {
    pub name: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsumerReport {
    pub by_cpu: Vec<ProcessUsage>,
    pub by_memory: Vec<ProcessUsage>,
    pub containers: Vec<ContainerUsage>,
}

impl ConsumerReport {
    pub fn is_empty(&self) -> bool {
        self.by_cpu.is_empty() && self.by_memory.is_empty() && self.containers.is_empty()
    }
}

#[async_trait]
pub trait ResourceSnapshot: Send + Sync {
    /// `None` when nothing could be sampled.
    async fn top_consumers(&self) -> Option<ConsumerReport>;
}

/// Samples processes through `sysinfo` and containers through `docker stats`.
pub struct SystemResourceSnapshot {
    system: Mutex<System>,
    include_containers: bool,
}

impl SystemResourceSnapshot {
    pub fn new(include_containers: bool) -> Self {
        Self {
            system: Mutex::new(System::new()),
            include_containers,
        }
    }

    async fn processes(&self) -> Vec<ProcessUsage> {
        let mut sys = self.system.lock().await;
        let kind = ProcessRefreshKind::nothing().with_cpu().with_memory();
        sys.refresh_processes_specifics(ProcessesToUpdate::All, true, kind);
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        sys.refresh_processes_specifics(ProcessesToUpdate::All, true, kind);
        sys.refresh_memory();

        let total_memory = sys.total_memory();
        sys.processes()
            .iter()
            .map(|(pid, process)| ProcessUsage {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().into_owned(),
                cpu_percent: process.cpu_usage() as f64,
                memory_percent: if total_memory > 0 {
                    process.memory() as f64 / total_memory as f64 * 100.0
                } else {
                    0.0
                },
            })
            .collect()
    }

    async fn containers(&self) -> Vec<ContainerUsage> {
        let args = ["stats", "--no-stream", "--format", DOCKER_STATS_FORMAT];
        match run_command("docker", &args, DOCKER_TIMEOUT).await {
            Ok(output) => {
                let mut containers = parse_docker_stats(&output.stdout_text());
                containers.sort_by(|a, b| descending(a.cpu_percent, b.cpu_percent));
                containers.truncate(TOP_CONSUMERS);
                containers
            }
            Err(e) => {
                debug!(error = %e, "Docker stats unavailable.");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl ResourceSnapshot for SystemResourceSnapshot {
    async fn top_consumers(&self) -> Option<ConsumerReport> {
        let processes = self.processes().await;
        let mut report = rank_processes(processes, TOP_CONSUMERS);
        if self.include_containers {
            report.containers = self.containers().await;
        }
        (!report.is_empty()).then_some(report)
    }
}

/// Total order, largest first; NaN sorts last.
fn descending(a: f64, b: f64) -> Ordering {
    let key = |v: f64| if v.is_nan() { f64::NEG_INFINITY } else { v };
    key(b).total_cmp(&key(a))
}

fn rank_processes(processes: Vec<ProcessUsage>, limit: usize) -> ConsumerReport {
    let mut by_cpu = processes.clone();
    by_cpu.sort_by(|a, b| descending(a.cpu_percent, b.cpu_percent));
    by_cpu.truncate(limit);

    let mut by_memory = processes;
    by_memory.sort_by(|a, b| descending(a.memory_percent, b.memory_percent));
    by_memory.truncate(limit);

    ConsumerReport {
        by_cpu,
        by_memory,
        containers: Vec::new(),
    }
}

fn parse_percent(field: &str) -> Option<f64> {
    field.trim().trim_end_matches('%').trim().parse().ok()
}

/// Parses `docker stats` output in `name<TAB>cpu%<TAB>mem%` form, skipping
/// malformed lines.
fn parse_docker_stats(output: &str) -> Vec<ContainerUsage> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let name = fields.next()?.trim();
            let cpu_percent = parse_percent(fields.next()?)?;
            let memory_percent = parse_percent(fields.next()?)?;
            (!name.is_empty()).then(|| ContainerUsage {
                name: name.to_string(),
                cpu_percent,
                memory_percent,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process(pid: u32, cpu: f64, mem: f64) -> ProcessUsage {
        ProcessUsage {
            pid,
            name: format!("proc{pid}"),
            cpu_percent: cpu,
            memory_percent: mem,
        }
    }

    #[test]
    fn ranks_by_cpu_and_memory_independently() {
        let processes = vec![
            process(1, 5.0, 40.0),
            process(2, 90.0, 1.0),
            process(3, 30.0, 20.0),
            process(4, f64::NAN, 10.0),
        ];
        let report = rank_processes(processes, 2);
        let cpu: Vec<u32> = report.by_cpu.iter().map(|p| p.pid).collect();
        let mem: Vec<u32> = report.by_memory.iter().map(|p| p.pid).collect();
        assert_eq!(cpu, vec![2, 3]);
        assert_eq!(mem, vec![1, 3]);
    }

    #[test]
    fn parses_docker_stats_lines() {
        let output = "web\t12.50%\t3.10%\ndb\t0.00%\t45.2%\nbroken line\n\t1%\t1%\n";
        let containers = parse_docker_stats(output);
        assert_eq!(
            containers,
            vec![
                ContainerUsage {
                    name: "web".into(),
                    cpu_percent: 12.5,
                    memory_percent: 3.1,
                },
                ContainerUsage {
                    name: "db".into(),
                    cpu_percent: 0.0,
                    memory_percent: 45.2,
                },
            ]
        );
    }

    #[test]
    fn empty_report_is_detected() {
        assert!(ConsumerReport::default().is_empty());
        assert!(!rank_processes(vec![process(1, 1.0, 1.0)], 5).is_empty());
    }
}
