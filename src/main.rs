pub mod config;
pub mod hms;
pub mod mqtt;
pub mod persistence;
pub mod platform;
pub mod printer_state;
pub mod telemetry;

use crate::hms::Severity;
use crate::mqtt::mqtt_handler::MqttHandler;
use crate::persistence::SettingsStore;
use crate::platform::HostPlatform;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// How often the settings file is checked for operator edits.
const SETTINGS_RELOAD_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let path = SettingsStore::default_path().map_err(|e| eyre!("No settings location: {}", e))?;
    info!("Loading settings from {}", path.display());
    let mut store = SettingsStore::load_or_create(path)
        .await
        .map_err(|e| eyre!("Failed to load settings: {}", e))?;

    let poll_interval = Duration::from_millis(store.settings().link.poll_interval_ms.max(1));
    let mut handler = MqttHandler::new(HostPlatform::new(), store.settings());

    handler.printer_mut().on_report(Box::new(|_status, hms| {
        if hms.top_severity() >= Severity::Error {
            debug!("Report with {} active fault(s) at error level", hms.count_active(Severity::Error));
        }
    }));

    let mut poll = tokio::time::interval(poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut reload = tokio::time::interval(SETTINGS_RELOAD_INTERVAL);
    reload.set_missed_tick_behavior(MissedTickBehavior::Skip);
    reload.tick().await;

    info!("Printer link running, polling every {:?}", poll_interval);
    loop {
        tokio::select! {
            _ = poll.tick() => handler.tick(&mut store).await,
            _ = reload.tick() => match handler.reload_from_settings(&mut store).await {
                Ok(change) if change.changed => info!("Settings reloaded"),
                Ok(_) => {}
                Err(e) => warn!("Failed to reload settings: {}", e),
            },
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Failed to listen for shutdown signal: {}", e);
                }
                break;
            }
        }
    }

    info!("Shutting down printer link");
    handler.shutdown().await;
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    let level = match std::env::var("RUST_LOG").as_deref() {
        Ok("trace") => Level::TRACE,
        Ok("debug") => Level::DEBUG,
        Ok("warn") => Level::WARN,
        Ok("error") => Level::ERROR,
        _ => Level::INFO,
    };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
