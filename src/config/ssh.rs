use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Settings of the authentication log watcher, re-read on every check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshMonitorSettings {
    pub enabled: bool,
    pub auth_log: PathBuf,
    /// Seconds between log scans.
    pub check_interval: u64,
    /// Host name shown in connection notifications.
    pub hostname: String,
    pub check_faillog: bool,
}

impl Default for SshMonitorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            auth_log: PathBuf::from("/var/log/auth.log"),
            check_interval: 10,
            hostname: "server".to_string(),
            check_faillog: true,
        }
    }
}

impl SshMonitorSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.check_interval.max(1))
    }
}
