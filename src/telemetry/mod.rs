//! # Printer Telemetry Extraction
//!
//! Turns the printer's status stream into compact [`ParsedReport`] values.
//!
//! ## Why This Module Exists
//!
//! Status messages from the printer are large (tens of kilobytes with AMS and
//! camera sections) while the link only needs a dozen fields. Materialising a
//! full JSON document per message would cost more memory than the rest of the
//! link combined, so messages are scanned once, fragment by fragment, and only
//! the interesting values are kept.
//!
//! ```text
//! telemetry/
//! ├── keys.rs    - closed key vocabulary, length-then-bytes matcher
//! ├── parser.rs  - incremental scanner with an explicit context stack
//! └── report.rs  - ParsedReport and its parts
//! ```

pub mod keys;
pub mod parser;
pub mod report;

pub use keys::FieldKey;
pub use parser::{ParseError, StreamParser};
pub use report::{BedReading, FaultEntry, ParsedReport};
