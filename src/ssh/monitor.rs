use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::parser::{parse_faillog, parse_line, Connection, ConnectionKind, FailedLogin};
use super::tail::LogTailer;
use crate::commands::{run_command, CommandError};
use crate::config::{ConfigError, JsonConfigStore, SshMonitorSettings};
use crate::notifications::{deliver_text, NotificationSink};

const FAILLOG_TIMEOUT: Duration = Duration::from_secs(10);
/// Failure rows shown before the remainder is summarised.
pub const MAX_FAILURE_LINES: usize = 5;
const LOGIN_TIMESTAMP_FORMAT: &str = "%d %b %Y %H:%M";

#[derive(Error, Debug)]
pub enum SshMonitorError {
    #[error("Failed to read {path:?}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to persist log positions: {0}")]
    Positions(#[from] ConfigError),
}

/// Reports accounts with failed login attempts.
#[async_trait]
pub trait FailedLoginSource: Send + Sync {
    async fn failed_logins(&self) -> Result<Vec<FailedLogin>, CommandError>;
}

/// Reads the failure counters through `faillog -a`.
pub struct FaillogCommand;

#[async_trait]
impl FailedLoginSource for FaillogCommand {
    async fn failed_logins(&self) -> Result<Vec<FailedLogin>, CommandError> {
        let output = run_command("faillog", &["-a"], FAILLOG_TIMEOUT).await?;
        Ok(parse_faillog(&output.stdout_text()))
    }
}

/// IPv4 address of the default interface, or loopback when there is none.
pub fn local_ip() -> String {
    match netdev::get_default_interface() {
        Ok(interface) => interface
            .ipv4
            .first()
            .map(|net| net.addr().to_string())
            .unwrap_or_else(|| "127.0.0.1".to_string()),
        Err(e) => {
            debug!(error = %e, "No default interface found.");
            "127.0.0.1".to_string()
        }
    }
}

pub fn connection_message(
    connection: &Connection,
    hostname: &str,
    local_ip: &str,
    at: DateTime<Local>,
    locale: &str,
) -> String {
    let title = match connection.kind {
        ConnectionKind::Ssh => t!("ssh.ssh_title", locale = locale),
        ConnectionKind::Sftp => t!("ssh.sftp_title", locale = locale),
    };
    let user = &connection.user;
    let ip = &connection.ip;
    let auth = connection.auth.as_deref().unwrap_or("-");
    let timestamp = at.format(LOGIN_TIMESTAMP_FORMAT).to_string();
    let lookup = format!("https://ipinfo.io/{ip}");
    let details = t!(
        "ssh.details",
        locale = locale,
        hostname = hostname,
        local_ip = local_ip,
        user = user,
        auth = auth,
        ip = ip,
        timestamp = timestamp,
        lookup = lookup
    );
    format!("{title}\n{details}")
}

pub fn failures_message(failures: &[FailedLogin], locale: &str) -> String {
    let mut lines = vec![t!("ssh.failures_title", locale = locale).into_owned()];
    for failure in failures.iter().take(MAX_FAILURE_LINES) {
        let user = &failure.user;
        let count = failure.failures;
        lines.push(
            t!("ssh.failure_line", locale = locale, user = user, count = count).into_owned(),
        );
    }
    if failures.len() > MAX_FAILURE_LINES {
        let count = failures.len() - MAX_FAILURE_LINES;
        lines.push(t!("ssh.more", locale = locale, count = count).into_owned());
    }
    lines.join("\n")
}

/// Watches the authentication log for new SSH and SFTP sessions.
pub struct SshMonitor {
    settings: JsonConfigStore<SshMonitorSettings>,
    tailer: LogTailer,
    failures: Arc<dyn FailedLoginSource>,
    sink: Arc<dyn NotificationSink>,
    locale: String,
    last_failures: Vec<FailedLogin>,
}

async fn log_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

impl SshMonitor {
    pub fn new(
        settings: JsonConfigStore<SshMonitorSettings>,
        tailer: LogTailer,
        failures: Arc<dyn FailedLoginSource>,
        sink: Arc<dyn NotificationSink>,
        locale: impl Into<String>,
    ) -> Self {
        Self {
            settings,
            tailer,
            failures,
            sink,
            locale: locale.into(),
            last_failures: Vec::new(),
        }
    }


    /// Marks everything already in the auth log as seen.
    async fn prime(&mut self, settings: &SshMonitorSettings) {
        let path = &settings.auth_log;
        if !log_exists(path).await {
            return;
        }
        if let Err(e) = self.tailer.skip_existing(path).await {
            warn!(path = ?path, error = %e, "Failed to skip existing log content.");
            return;
        }
        if let Err(e) = self.tailer.save().await {
            warn!(error = %e, "Failed to persist initial log position.");
        }
    }

    /// One scan of the auth log and, when enabled, of the failure counters.
    pub async fn check(&mut self, settings: &SshMonitorSettings) -> Result<(), SshMonitorError> {
        let path = &settings.auth_log;
        if log_exists(path).await {
            let lines = self
                .tailer
                .read_new_lines(path)
                .await
                .map_err(|source| SshMonitorError::Read {
                    path: path.clone(),
                    source,
                })?;
            let local_ip = local_ip();
            for connection in lines.iter().filter_map(|line| parse_line(line)) {
                info!(
                    kind = %connection.kind,
                    user = %connection.user,
                    ip = %connection.ip,
                    "Login detected."
                );
                let message = connection_message(
                    &connection,
                    &settings.hostname,
                    &local_ip,
                    Local::now(),
                    &self.locale,
                );
                deliver_text(self.sink.as_ref(), &message).await;
            }
        } else {
            warn!(path = ?path, "Auth log not found.");
        }

        if settings.check_faillog {
            self.check_failures().await;
        }

        self.tailer.save().await?;
        Ok(())
    }

    async fn check_failures(&mut self) {
        let failures = match self.failures.failed_logins().await {
            Ok(failures) => failures,
            Err(e) => {
                debug!(error = %e, "Failed login scan unavailable.");
                return;
            }
        };
        if failures.is_empty() || failures == self.last_failures {
            self.last_failures = failures;
            return;
        }
        warn!(accounts = failures.len(), "Failed login attempts detected.");
        deliver_text(self.sink.as_ref(), &failures_message(&failures, &self.locale)).await;
        self.last_failures = failures;
    }

    /// Loops until `stop_rx` fires, re-reading the settings every pass.
    pub async fn run(mut self, mut stop_rx: watch::Receiver<()>) {
        info!("SSH login monitoring started.");
        let initial = self.settings.load_async().await;
        self.prime(&initial).await;

        let mut announced_disabled = false;
        loop {
            if stop_rx.has_changed().unwrap_or(true) {
                break;
            }

            let settings = self.settings.load_async().await;
            if !settings.enabled {
                if !announced_disabled {
                    info!("SSH login monitoring disabled, waiting.");
                    announced_disabled = true;
                }
            } else {
                if announced_disabled {
                    info!("SSH login monitoring re-enabled.");
                    announced_disabled = false;
                }
                if let Err(e) = self.check(&settings).await {
                    error!(error = %e, "SSH log check failed.");
                }
            }

            tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                _ = tokio::time::sleep(settings.interval()) => {}
            }
        }
        info!("SSH login monitoring stopped.");
    }
}
