use super::SettingsError;
use crate::config::{PrinterSettings, Settings};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = ".config/beaconlink";
const SETTINGS_FILE: &str = "settings.toml";
const SETTINGS_ENV: &str = "BEACONLINK_SETTINGS";

/// What changed when the file was re-read or the printer edited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsChange {
    pub changed: bool,
    pub identity_changed: bool,
    pub pin_cleared: bool,
}

/// Settings file owner. Holds the last loaded state and writes every change
/// back to disk.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    settings: Settings,
}

impl SettingsStore {
    /// `$BEACONLINK_SETTINGS`, else `~/.config/beaconlink/settings.toml`.
    pub fn default_path() -> Result<PathBuf, SettingsError> {
        if let Ok(path) = std::env::var(SETTINGS_ENV) {
            if !path.trim().is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
        let mut path = dirs::home_dir().ok_or(SettingsError::NoHomeDir)?;
        path.push(CONFIG_DIR);
        path.push(SETTINGS_FILE);
        Ok(path)
    }

    /// Loads the file, writing defaults first if it does not exist.
    pub async fn load_or_create(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| SettingsError::io(&path, e))?;

        if !exists {
            warn!("Settings file {} missing, writing defaults", path.display());
            let store = Self {
                path,
                settings: Settings::default(),
            };
            store.save().await?;
            return Ok(store);
        }

        let settings = read_settings(&path).await?;
        info!("Loaded settings from {}", path.display());
        Ok(Self { path, settings })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub async fn save(&self) -> Result<(), SettingsError> {
        write_settings(&self.path, &self.settings).await
    }

    /// Writes `next` and adopts it only once it is on disk.
    async fn commit(&mut self, next: Settings) -> Result<(), SettingsError> {
        write_settings(&self.path, &next).await?;
        self.settings = next;
        Ok(())
    }

    pub async fn store_pinned_cert(&mut self, pem_bundle: &str) -> Result<(), SettingsError> {
        let mut next = self.settings.clone();
        next.tls.pinned_cert = pem_bundle.to_string();
        self.commit(next).await?;
        info!("Pinned certificate saved ({} bytes)", pem_bundle.len());
        Ok(())
    }

    pub async fn clear_pinned_cert(&mut self) -> Result<(), SettingsError> {
        if self.settings.tls.pinned_cert.is_empty() {
            return Ok(());
        }
        let mut next = self.settings.clone();
        next.tls.pinned_cert.clear();
        self.commit(next).await?;
        info!("Pinned certificate cleared");
        Ok(())
    }

    /// Replaces the printer section. A new IP or serial drops the pin.
    pub async fn update_printer(
        &mut self,
        printer: PrinterSettings,
    ) -> Result<SettingsChange, SettingsError> {
        let mut next = self.settings.clone();
        next.printer = printer;
        self.apply(next).await
    }

    /// Re-reads the file from disk, e.g. after an operator edited it.
    pub async fn reload(&mut self) -> Result<SettingsChange, SettingsError> {
        let next = read_settings(&self.path).await?;
        self.apply(next).await
    }

    async fn apply(&mut self, mut next: Settings) -> Result<SettingsChange, SettingsError> {
        let identity_changed = self.settings.printer.identity_differs(&next.printer);
        let pin_cleared = identity_changed && !next.tls.pinned_cert.is_empty();
        if identity_changed {
            next.tls.pinned_cert.clear();
        }

        let changed = next != self.settings;
        if changed {
            self.commit(next).await?;
        }
        if pin_cleared {
            info!("Printer identity changed, pinned certificate dropped");
        }
        Ok(SettingsChange {
            changed,
            identity_changed,
            pin_cleared,
        })
    }
}

async fn write_settings(path: &Path, settings: &Settings) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SettingsError::io(parent, e))?;
        }
    }
    let content = toml::to_string_pretty(settings)?;
    tokio::fs::write(path, content)
        .await
        .map_err(|e| SettingsError::io(path, e))?;
    debug!("Settings written to {}", path.display());
    Ok(())
}

async fn read_settings(path: &Path) -> Result<Settings, SettingsError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| SettingsError::io(path, e))?;
    Ok(toml::from_str(&content)?)
}
