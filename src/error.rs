use thiserror::Error;

use crate::config::ConfigError;
use crate::monitor::MonitorError;
use crate::notifications::SenderError;

/// Top-level error for process startup and shutdown.
///
/// Background loops never return these; they log and carry on.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Notification error: {0}")]
    Notification(#[from] SenderError),
    #[error("Monitoring error: {0}")]
    Monitor(#[from] MonitorError),
    #[error("Invalid listen address '{0}'")]
    InvalidListenAddress(String),
}
