use serde::{Deserialize, Serialize};

use crate::hms::table::DEFAULT_HMS_TTL_MS;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;
pub const DEFAULT_STATUS_LOG_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 32_768;

/// Everything the link reads from the settings file.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub printer: PrinterSettings,
    pub tls: TlsSettings,
    pub link: LinkSettings,
}

/// Printer endpoint and operator choices.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct PrinterSettings {
    pub ip: String,
    pub serial: String,
    pub access_code: String,
    /// Free text list of `HMS_xxxx_xxxx_xxxx_xxxx` codes to suppress.
    pub hms_ignore: String,
}

impl PrinterSettings {
    /// IP, serial and access code are all required before any network action.
    pub fn is_complete(&self) -> bool {
        !self.ip.trim().is_empty()
            && !self.serial.trim().is_empty()
            && !self.access_code.trim().is_empty()
    }

    /// The pinned certificate belongs to one printer. Moving to another
    /// address or serial invalidates it.
    pub fn identity_differs(&self, other: &PrinterSettings) -> bool {
        self.ip.trim() != other.ip.trim() || self.serial.trim() != other.serial.trim()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct TlsSettings {
    /// PEM bundle captured on first use. Empty means nothing is pinned.
    pub pinned_cert: String,
}

impl TlsSettings {
    pub fn has_pin(&self) -> bool {
        self.pinned_cert.contains("-----BEGIN CERTIFICATE-----")
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct LinkSettings {
    pub poll_interval_ms: u64,
    pub hms_ttl_ms: u64,
    pub status_log_interval_ms: u64,
    pub request_full_status_on_connect: bool,
    pub max_message_bytes: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            hms_ttl_ms: DEFAULT_HMS_TTL_MS,
            status_log_interval_ms: DEFAULT_STATUS_LOG_INTERVAL_MS,
            request_full_status_on_connect: true,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}
