//! # Health Management System (HMS) Faults
//!
//! The printer reports machine-health problems as `(attr, code)` pairs. This
//! module ranks them, renders them in the vendor's `HMS_xxxx_xxxx_xxxx_xxxx`
//! notation and keeps a bounded table of what is currently active.
//!
//! ```text
//! hms/
//! ├── mod.rs     - Severity, HmsCode formatting
//! ├── table.rs   - fixed-capacity event table with TTL expiry
//! └── ignore.rs  - operator ignore list
//! ```

pub mod ignore;
pub mod table;

pub use ignore::IgnoreList;
pub use table::{HmsEvent, HmsTable, UpsertOutcome, HMS_CAPACITY};

use core::fmt;
use core::fmt::Write as _;

/// Length of `HMS_aaaa_bbbb_cccc_dddd`.
pub const HMS_CODE_LEN: usize = 23;

/// Fault importance, ordered `None < Info < Warning < Error < Fatal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Severity {
    #[default]
    None,
    Info,
    Warning,
    Error,
    Fatal,
}

impl Severity {
    /// Severity lives in the high 16 bits of `code`.
    pub fn from_code(code: u32) -> Severity {
        match code >> 16 {
            1 => Severity::Fatal,
            2 => Severity::Error,
            3 => Severity::Warning,
            4 => Severity::Info,
            _ => Severity::None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::None => "None",
            Severity::Info => "Info",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
            Severity::Fatal => "Fatal",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 64-bit fault identity: `(attr << 32) | code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HmsCode(pub u64);

impl HmsCode {
    pub fn new(attr: u32, code: u32) -> Self {
        HmsCode((u64::from(attr) << 32) | u64::from(code))
    }

    pub fn attr(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn code(self) -> u32 {
        self.0 as u32
    }

    pub fn is_unset(self) -> bool {
        self.0 == 0
    }

    /// Rendered form without touching the heap.
    pub fn render(self) -> heapless::String<HMS_CODE_LEN> {
        let mut out = heapless::String::new();
        // Always exactly HMS_CODE_LEN bytes, so the write cannot overflow.
        let _ = write!(out, "{}", self);
        out
    }
}

impl fmt::Display for HmsCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        write!(
            f,
            "HMS_{:04X}_{:04X}_{:04X}_{:04X}",
            (v >> 48) as u16,
            (v >> 32) as u16,
            (v >> 16) as u16,
            v as u16
        )
    }
}
