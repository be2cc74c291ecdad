//! # Persistence Module
//!
//! ## Why This Module Exists
//! The link has exactly one piece of durable state: the settings file. It
//! carries the printer endpoint, the operator's HMS ignore list, link tuning
//! and, once the first connection succeeded, the pinned certificate bundle.
//!
//! ## Key Abstractions
//! - **Single TOML file**: human editable, read with `toml` through serde
//! - **Fail-safe defaults**: a missing file is created with defaults so the
//!   link starts in a valid (if unconfigured) state
//! - **Pin ownership**: the pinned certificate is tied to one printer, so the
//!   store drops it whenever the IP or serial changes
//!
//! ```text
//! persistence/
//! └── settings_store.rs  - load, save, reload, pin management
//! ```

pub mod settings_store;

pub use settings_store::{SettingsChange, SettingsStore};

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("No home directory to place the settings file in")]
    NoHomeDir,
}

impl SettingsError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        SettingsError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
