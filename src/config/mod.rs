//! Application settings (TOML) and the JSON-backed runtime configuration stores.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

pub mod ai;
pub mod monitoring;
pub mod ssh;
pub mod store;

pub use ai::{AiConfig, CameraConfig, CamerasConfig, CategoryToggles};
pub use monitoring::{MonitoringConfig, MonitoringConfigSource, ParameterConfig, ReminderUnit};
pub use ssh::SshMonitorSettings;
pub use store::{merge_defaults, JsonConfigStore};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to parse TOML from config file at {path:?}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to persist {path:?}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },
    #[error("Config I/O task failed: {0}")]
    Task(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub telegram: TelegramConfig,
    /// Directory holding the JSON configuration documents.
    pub config_dir: PathBuf,
    /// Directory for runtime state: log positions, cached models.
    pub state_dir: PathBuf,
    pub log_dir: PathBuf,
    pub language: String,
    /// Address for the read-only status API, e.g. `0.0.0.0:8080`.
    pub web_listen: Option<String>,
    /// TrueType font for camera snapshot labels.
    pub label_font: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            telegram: TelegramConfig::default(),
            config_dir: PathBuf::from("/etc/ssh_monitor"),
            state_dir: PathBuf::from("/var/lib/ssh_monitor"),
            log_dir: PathBuf::from("logs"),
            language: "en".to_string(),
            web_listen: None,
            label_font: PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf"),
        }
    }
}

impl AppConfig {
    /// Loads the TOML file if present, then applies environment overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                let parsed: AppConfig =
                    toml::from_str(&contents).map_err(|source| ConfigError::Toml {
                        path: path.to_path_buf(),
                        source,
                    })?;
                info!(path = ?path, "Loaded application config.");
                parsed
            }
            Some(path) => {
                warn!(path = ?path, "Config file not found, using defaults.");
                AppConfig::default()
            }
            None => AppConfig::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN").filter(|v| !v.is_empty()) {
            self.telegram.bot_token = token;
        }
        if let Some(chat_id) = lookup("TELEGRAM_CHAT_ID").filter(|v| !v.is_empty()) {
            self.telegram.chat_id = chat_id;
        }
        if let Some(language) = lookup("HOSTWATCH_LANGUAGE").filter(|v| !v.is_empty()) {
            self.language = language;
        }
    }

    pub fn monitoring_config_path(&self) -> PathBuf {
        self.config_dir.join("monitoring_config.json")
    }

    pub fn ai_config_path(&self) -> PathBuf {
        self.config_dir.join("ai_config.json")
    }

    pub fn cameras_config_path(&self) -> PathBuf {
        self.config_dir.join("cameras_config.json")
    }

    pub fn ssh_settings_path(&self) -> PathBuf {
        self.config_dir.join("ssh_monitor.json")
    }

    pub fn log_positions_path(&self) -> PathBuf {
        self.state_dir.join("last_position.json")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.state_dir.join("models")
    }
}

/// The camera add-on is opt-in per deployment through `ENABLE_AI_DETECTION=true`.
pub fn ai_detection_available() -> bool {
    parse_flag(std::env::var("ENABLE_AI_DETECTION").ok().as_deref())
}

fn parse_flag(value: Option<&str>) -> bool {
    value
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}
