//! Closed vocabulary of JSON object keys the report parser cares about.
//!
//! Keys are matched by length first and then by exact byte comparison, so an
//! incoming key never needs to be copied into an owned string. Anything outside
//! the vocabulary becomes [`FieldKey::Unknown`]; its value is still scanned for
//! structure but discarded.

/// Longest key in the vocabulary (`gcode_file_prepare_percent`).
pub const MAX_KNOWN_KEY_LEN: usize = 26;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldKey {
    #[default]
    Unknown,
    Print,
    Data,
    Device,
    Extruder,
    Info,
    Hms,
    Attr,
    Code,
    GcodeState,
    McPercent,
    Percent,
    DownloadProgress,
    DownloadPercent,
    DlPercent,
    DlProgress,
    PreparePer,
    GcodeFilePreparePercent,
    BedTemper,
    BedTemperature,
    BedTargetTemper,
    BedTargetTemperature,
    NozzleTemper,
    NozzleTargetTemper,
    Hnow,
    Htar,
    Temp,
}

impl FieldKey {
    /// Resolves raw key bytes against the vocabulary.
    pub fn intern(raw: &[u8]) -> FieldKey {
        match raw.len() {
            3 => match raw {
                b"hms" => FieldKey::Hms,
                _ => FieldKey::Unknown,
            },
            4 => match raw {
                b"attr" => FieldKey::Attr,
                b"code" => FieldKey::Code,
                b"data" => FieldKey::Data,
                b"info" => FieldKey::Info,
                b"hnow" => FieldKey::Hnow,
                b"htar" => FieldKey::Htar,
                b"temp" => FieldKey::Temp,
                _ => FieldKey::Unknown,
            },
            5 => match raw {
                b"print" => FieldKey::Print,
                _ => FieldKey::Unknown,
            },
            6 => match raw {
                b"device" => FieldKey::Device,
                _ => FieldKey::Unknown,
            },
            7 => match raw {
                b"percent" => FieldKey::Percent,
                _ => FieldKey::Unknown,
            },
            8 => match raw {
                b"extruder" => FieldKey::Extruder,
                _ => FieldKey::Unknown,
            },
            10 => match raw {
                b"mc_percent" => FieldKey::McPercent,
                b"dl_percent" => FieldKey::DlPercent,
                b"bed_temper" => FieldKey::BedTemper,
                _ => FieldKey::Unknown,
            },
            11 => match raw {
                b"gcode_state" => FieldKey::GcodeState,
                b"dl_progress" => FieldKey::DlProgress,
                b"prepare_per" => FieldKey::PreparePer,
                _ => FieldKey::Unknown,
            },
            13 => match raw {
                b"nozzle_temper" => FieldKey::NozzleTemper,
                _ => FieldKey::Unknown,
            },
            15 => match raw {
                b"bed_temperature" => FieldKey::BedTemperature,
                _ => FieldKey::Unknown,
            },
            16 => match raw {
                b"download_percent" => FieldKey::DownloadPercent,
                _ => FieldKey::Unknown,
            },
            17 => match raw {
                b"download_progress" => FieldKey::DownloadProgress,
                b"bed_target_temper" => FieldKey::BedTargetTemper,
                _ => FieldKey::Unknown,
            },
            20 => match raw {
                b"nozzle_target_temper" => FieldKey::NozzleTargetTemper,
                _ => FieldKey::Unknown,
            },
            22 => match raw {
                b"bed_target_temperature" => FieldKey::BedTargetTemperature,
                _ => FieldKey::Unknown,
            },
            26 => match raw {
                b"gcode_file_prepare_percent" => FieldKey::GcodeFilePreparePercent,
                _ => FieldKey::Unknown,
            },
            _ => FieldKey::Unknown,
        }
    }

    pub fn is_known(self) -> bool {
        self != FieldKey::Unknown
    }

    pub fn is_print_progress(self) -> bool {
        matches!(self, FieldKey::McPercent | FieldKey::Percent)
    }

    pub fn is_download_progress(self) -> bool {
        matches!(
            self,
            FieldKey::DownloadProgress
                | FieldKey::DownloadPercent
                | FieldKey::DlPercent
                | FieldKey::DlProgress
                | FieldKey::PreparePer
                | FieldKey::GcodeFilePreparePercent
        )
    }

    pub fn is_bed_temp(self) -> bool {
        matches!(self, FieldKey::BedTemper | FieldKey::BedTemperature)
    }

    pub fn is_bed_target(self) -> bool {
        matches!(
            self,
            FieldKey::BedTargetTemper | FieldKey::BedTargetTemperature
        )
    }

    /// Keys only honoured inside the `print` object, never at the top level.
    pub fn print_scope_only(self) -> bool {
        matches!(
            self,
            FieldKey::DlPercent
                | FieldKey::DlProgress
                | FieldKey::PreparePer
                | FieldKey::GcodeFilePreparePercent
                | FieldKey::BedTemperature
                | FieldKey::BedTargetTemperature
        )
    }
}
