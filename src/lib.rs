#[macro_use]
extern crate rust_i18n;

// Alert, recovery and camera texts live in the locales directory.
i18n!("locales", fallback = "en");

pub mod alerting;
pub mod commands;
pub mod config;
pub mod detection;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod notifications;
pub mod ssh;
pub mod version;
pub mod web;
