use clap::Parser;
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use hostwatch::alerting::{MonitoringRegistry, ThresholdEngine};
use hostwatch::config::{ai_detection_available, AppConfig, JsonConfigStore, MonitoringConfig};
use hostwatch::detection::snapshot::load_font;
use hostwatch::detection::{DetectionManager, LiveBackend};
use hostwatch::error::AppError;
use hostwatch::logging::init_logging;
use hostwatch::metrics::{SysinfoMetrics, SystemResourceSnapshot};
use hostwatch::monitor::MonitoringService;
use hostwatch::notifications::{NotificationSink, TelegramSink};
use hostwatch::ssh::{FaillogCommand, LogTailer, SshMonitor};
use hostwatch::version::VERSION;
use hostwatch::web::{self, AppState};

#[derive(Parser, Debug)]
#[command(author, version = VERSION, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "hostwatch.toml")]
    config: PathBuf,

    /// Exit successfully without starting anything
    #[arg(long)]
    health_check: bool,

    /// Send a test notification and exit
    #[arg(long)]
    test_notification: bool,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let args = Args::parse();
    if args.health_check {
        return Ok(());
    }

    dotenv().ok();
    let config = AppConfig::load(Some(&args.config))?;
    init_logging(&config.log_dir);
    info!(version = VERSION, "Starting hostwatch.");

    let sink: Arc<dyn NotificationSink> = match TelegramSink::new(&config.telegram) {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            error!(error = %e, "Notification sink is not configured.");
            return Err(e.into());
        }
    };

    let hostname = sysinfo::System::host_name().unwrap_or_else(|| "server".to_string());
    let monitoring_store: Arc<JsonConfigStore<MonitoringConfig>> =
        Arc::new(JsonConfigStore::new(config.monitoring_config_path()));
    let engine = Arc::new(ThresholdEngine::new(
        Arc::new(MonitoringRegistry::new()),
        Arc::clone(&sink),
        monitoring_store.clone(),
        Arc::new(SystemResourceSnapshot::new(true)),
        config.language.clone(),
    ));
    let monitoring = Arc::new(MonitoringService::new(
        engine,
        Arc::new(SysinfoMetrics::new()),
        monitoring_store,
        hostname,
    ));

    if args.test_notification {
        monitoring.send_test_alert().await?;
        info!("Test notification delivered.");
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(());

    monitoring.start();

    let ssh_monitor = SshMonitor::new(
        JsonConfigStore::new(config.ssh_settings_path()),
        LogTailer::new(JsonConfigStore::new(config.log_positions_path())),
        Arc::new(FaillogCommand),
        Arc::clone(&sink),
        config.language.clone(),
    );
    let ssh_handle = tokio::spawn(ssh_monitor.run(shutdown_rx.clone()));

    let detection = if ai_detection_available() {
        let backend = LiveBackend::new(config.models_dir())
            .with_label_font(load_font(&config.label_font));
        let manager = Arc::new(DetectionManager::new(
            Arc::new(backend),
            JsonConfigStore::new(config.ai_config_path()),
            JsonConfigStore::new(config.cameras_config_path()),
            Arc::clone(&sink),
            config.language.clone(),
            true,
        ));
        manager.start_all();
        Some(manager)
    } else {
        info!("AI detection disabled for this deployment.");
        None
    };

    let web_handle = config.web_listen.clone().map(|listen| {
        let state = Arc::new(AppState {
            monitoring: Arc::clone(&monitoring),
            detection: detection.clone(),
        });
        let mut stop_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = stop_rx.changed().await;
            };
            if let Err(e) = web::serve(&listen, state, shutdown).await {
                error!(error = %e, "Status API failed.");
            }
        })
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal, shutting down.");
    }
    info!("Shutdown requested.");
    let _ = shutdown_tx.send(());

    if let Some(manager) = &detection {
        manager.stop_all().await;
    }
    monitoring.stop().await;
    if let Err(e) = ssh_handle.await {
        warn!(error = %e, "SSH monitor ended abnormally.");
    }
    if let Some(handle) = web_handle {
        if let Err(e) = handle.await {
            warn!(error = %e, "Status API task ended abnormally.");
        }
    }
    info!("hostwatch stopped.");
    Ok(())
}
