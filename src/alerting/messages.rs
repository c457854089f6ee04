//! Operator-facing alert texts.
use chrono::{DateTime, Local};

use super::registry::AlertState;
use crate::metrics::{ConsumerReport, Parameter};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn format_value(value: f64) -> String {
    format!("{value:.1}")
}

pub fn alert_message(
    parameter: &Parameter,
    value: f64,
    threshold: f64,
    at: DateTime<Local>,
    locale: &str,
) -> String {
    let value = format_value(value);
    let threshold = format_value(threshold);
    let timestamp = at.format(TIMESTAMP_FORMAT).to_string();
    match parameter {
        Parameter::CpuUsage => t!(
            "alert.cpu",
            locale = locale,
            value = value,
            threshold = threshold,
            timestamp = timestamp
        ),
        Parameter::RamUsage => t!(
            "alert.ram",
            locale = locale,
            value = value,
            threshold = threshold,
            timestamp = timestamp
        ),
        Parameter::CpuTemperature => t!(
            "alert.temperature",
            locale = locale,
            value = value,
            threshold = threshold,
            timestamp = timestamp
        ),
        Parameter::Disk(mount_point) => t!(
            "alert.disk",
            locale = locale,
            mount_point = mount_point,
            value = value,
            threshold = threshold,
            timestamp = timestamp
        ),
    }
    .into_owned()
}

pub fn recovery_message(
    parameter: &Parameter,
    value: f64,
    threshold: f64,
    at: DateTime<Local>,
    locale: &str,
) -> String {
    let value = format_value(value);
    let threshold = format_value(threshold);
    let timestamp = at.format(TIMESTAMP_FORMAT).to_string();
    match parameter {
        Parameter::CpuUsage => t!(
            "recovery.cpu",
            locale = locale,
            value = value,
            threshold = threshold,
            timestamp = timestamp
        ),
        Parameter::RamUsage => t!(
            "recovery.ram",
            locale = locale,
            value = value,
            threshold = threshold,
            timestamp = timestamp
        ),
        Parameter::CpuTemperature => t!(
            "recovery.temperature",
            locale = locale,
            value = value,
            threshold = threshold,
            timestamp = timestamp
        ),
        Parameter::Disk(mount_point) => t!(
            "recovery.disk",
            locale = locale,
            mount_point = mount_point,
            value = value,
            threshold = threshold,
            timestamp = timestamp
        ),
    }
    .into_owned()
}

/// The alert text with the latest reading, plus when the alert started.
pub fn reminder_message(
    parameter: &Parameter,
    alert: &AlertState,
    at: DateTime<Local>,
    locale: &str,
) -> String {
    let body = alert_message(parameter, alert.current_value, alert.threshold, at, locale);
    let since = alert.alert_start.format(TIMESTAMP_FORMAT).to_string();
    let footer = t!("alert.still_active", locale = locale, since = since);
    format!("{body}\n\n{footer}")
}

pub fn test_message(hostname: &str, at: DateTime<Local>, locale: &str) -> String {
    let timestamp = at.format(TIMESTAMP_FORMAT).to_string();
    t!("alert.test", locale = locale, hostname = hostname, timestamp = timestamp).into_owned()
}

/// Renders the top-consumers block appended to CPU, memory and temperature alerts.
pub fn consumers_block(report: &ConsumerReport, locale: &str) -> String {
    let mut sections = Vec::new();

    for (header, processes) in [
        (t!("consumers.by_cpu", locale = locale), &report.by_cpu),
        (t!("consumers.by_memory", locale = locale), &report.by_memory),
    ] {
        if processes.is_empty() {
            continue;
        }
        let mut lines = vec![header.into_owned()];
        for (index, process) in processes.iter().enumerate() {
            lines.push(
                t!(
                    "consumers.process",
                    locale = locale,
                    rank = index + 1,
                    name = process.name,
                    pid = process.pid,
                    cpu = format_value(process.cpu_percent),
                    memory = format_value(process.memory_percent)
                )
                .into_owned(),
            );
        }
        sections.push(lines.join("\n"));
    }

    if !report.containers.is_empty() {
        let mut lines = vec![t!("consumers.containers", locale = locale).into_owned()];
        for (index, container) in report.containers.iter().enumerate() {
            lines.push(
                t!(
                    "consumers.container",
                    locale = locale,
                    rank = index + 1,
                    name = container.name,
                    cpu = format_value(container.cpu_percent),
                    memory = format_value(container.memory_percent)
                )
                .into_owned(),
            );
        }
        sections.push(lines.join("\n"));
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::snapshot::{ContainerUsage, ProcessUsage};
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn alert_carries_value_threshold_and_time() {
        let message = alert_message(&Parameter::RamUsage, 92.04, 85.0, at(), "en");
        assert!(message.contains("RAM"));
        assert!(message.contains("92.0%"));
        assert!(message.contains("85.0%"));
        assert!(message.contains("2024-03-09 14:05:07"));
    }

    #[test]
    fn disk_messages_name_the_mount_point() {
        let disk = Parameter::Disk("/mnt/data".into());
        assert!(alert_message(&disk, 97.0, 90.0, at(), "en").contains("/mnt/data"));
        assert!(recovery_message(&disk, 40.0, 90.0, at(), "en").contains("/mnt/data"));
    }

    #[test]
    fn messages_follow_locale() {
        let english = recovery_message(&Parameter::CpuUsage, 10.0, 80.0, at(), "en");
        let italian = recovery_message(&Parameter::CpuUsage, 10.0, 80.0, at(), "it");
        assert!(english.contains("back to normal"));
        assert!(italian.contains("rientrato"));
    }

    #[test]
    fn reminder_mentions_alert_start() {
        let alert = AlertState {
            current_value: 93.0,
            threshold: 85.0,
            alert_start: at(),
            generation: 1,
        };
        let message = reminder_message(&Parameter::RamUsage, &alert, Local::now(), "en");
        assert!(message.contains("93.0%"));
        assert!(message.contains("Reminder"));
        assert!(message.contains("since 2024-03-09 14:05:07"));
    }

    #[test]
    fn consumers_block_lists_ranked_entries() {
        let report = ConsumerReport {
            by_cpu: vec![ProcessUsage {
                pid: 42,
                name: "postgres".into(),
                cpu_percent: 73.26,
                memory_percent: 12.0,
            }],
            by_memory: Vec::new(),
            containers: vec![ContainerUsage {
                name: "web".into(),
                cpu_percent: 5.0,
                memory_percent: 1.5,
            }],
        };
        let block = consumers_block(&report, "en");
        assert!(block.starts_with("Top processes by CPU:"));
        assert!(block.contains("1. postgres (PID 42): CPU 73.3% | RAM 12.0%"));
        assert!(!block.contains("Top processes by memory:"));
        assert!(block.contains("Top containers:\n1. web: CPU 5.0% | RAM 1.5%"));
    }
}
