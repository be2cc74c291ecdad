use heapless::{String, Vec};

/// Maximum fault entries carried by a single report.
pub const MAX_REPORT_FAULTS: usize = 20;

/// Capacity of the gcode state token.
pub const GCODE_STATE_CAP: usize = 31;

/// Raw `(attr, code)` pair as delivered in an `hms` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultEntry {
    pub attr: u32,
    pub code: u32,
}

impl FaultEntry {
    pub fn key(&self) -> u64 {
        (u64::from(self.attr) << 32) | u64::from(self.code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BedReading {
    pub temp: f32,
    pub target: f32,
}

/// Fields extracted from one printer status message.
///
/// Produced once per message on the network task and handed to the poll
/// context through the report mailbox. Every field is optional: a message that
/// does not mention a value must not disturb what the application already knows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedReport {
    pub gcode_state: Option<String<GCODE_STATE_CAP>>,
    pub print_progress: Option<u8>,
    pub download_progress: Option<u8>,
    pub bed: Option<BedReading>,
    pub nozzle_temp: Option<f32>,
    pub nozzle_target: Option<f32>,
    pub nozzle_heating: bool,
    pub hms_present: bool,
    pub hms: Vec<FaultEntry, MAX_REPORT_FAULTS>,
    /// Monotonic milliseconds at which the message started arriving.
    pub timestamp: u64,
}

impl ParsedReport {
    pub fn gcode_state(&self) -> Option<&str> {
        self.gcode_state.as_deref()
    }
}
