//! Incremental scanner for printer status messages.
//!
//! The parser is fed arbitrary fragments of one message as they come off the
//! socket and keeps only the handful of values a [`ParsedReport`] needs. All
//! state lives in fixed-size buffers: the context stack, the key/value/number
//! accumulators and the report under construction. Oversized tokens are
//! truncated in place, never grown.
//!
//! ```text
//! bytes ──► step() ──► structural() ──► open()/close()  (context stack)
//!                 │                 └─► on_scalar()     (ReportBuilder)
//!                 └─► string / number / literal accumulators
//! ```

use super::keys::FieldKey;
use super::report::{BedReading, FaultEntry, ParsedReport, GCODE_STATE_CAP, MAX_REPORT_FAULTS};
use heapless::{String, Vec};
use thiserror::Error;

/// Deepest nesting accepted before the message is rejected.
pub const MAX_DEPTH: usize = 10;

const KEY_BUF_LEN: usize = 32;
const VALUE_BUF_LEN: usize = 32;
const NUMBER_BUF_LEN: usize = 24;
const LITERAL_BUF_LEN: usize = 5;

/// Raw extruder temperatures above this are firmware fixed-point values.
const FIXED_POINT_THRESHOLD: f64 = 500.0;
const FIXED_POINT_SCALE: f64 = 65536.0;
const MAX_PLAUSIBLE_TEMP: f64 = 500.0;
const HEATING_MARGIN: f32 = 2.0;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("nesting deeper than {} levels", MAX_DEPTH)]
    DepthExceeded,

    #[error("unexpected byte {byte:#04x} at offset {offset}")]
    UnexpectedByte { byte: u8, offset: usize },

    #[error("message must start with an object, found {0:#04x}")]
    UnknownTopLevel(u8),

    #[error("invalid literal")]
    InvalidLiteral,

    #[error("invalid number")]
    InvalidNumber,

    #[error("unterminated string")]
    UnterminatedString,

    #[error("message ended before the root object closed")]
    Truncated,

    #[error("data after the root object at offset {0}")]
    TrailingData(usize),

    #[error("empty message")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Default,
    KeyString,
    ValueString,
    Number,
    Literal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escape {
    None,
    Pending,
    Unicode(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

/// What a container means for the report, decided once when it opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Root,
    Print,
    Data,
    Device,
    Extruder,
    ExtruderInfo,
    ExtruderSlot,
    FaultList,
    FaultEntry,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    KeyOrClose,
    Key,
    Colon,
    Value,
    ValueOrClose,
    CommaOrClose,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    container: Container,
    role: Role,
    /// Key this container hangs under in its parent.
    key: FieldKey,
    /// Key of the member currently being read (objects only).
    member: FieldKey,
    expect: Expect,
}

/// Explicit replacement for recursion: one frame per open object or array.
#[derive(Debug, Default)]
struct ContextStack {
    frames: Vec<Frame, MAX_DEPTH>,
}

impl ContextStack {
    fn clear(&mut self) {
        self.frames.clear();
    }

    fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn top(&self) -> Option<&Frame> {
        self.frames.last()
    }

    fn top_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    fn push(&mut self, container: Container) -> Result<Role, ParseError> {
        let (role, key) = match self.top() {
            None => (
                match container {
                    Container::Object => Role::Root,
                    Container::Array => Role::Other,
                },
                FieldKey::Unknown,
            ),
            Some(parent) => {
                let key = match parent.container {
                    Container::Object => parent.member,
                    Container::Array => parent.key,
                };
                (child_role(parent, container), key)
            }
        };
        let expect = match container {
            Container::Object => Expect::KeyOrClose,
            Container::Array => Expect::ValueOrClose,
        };
        self.frames
            .push(Frame {
                container,
                role,
                key,
                member: FieldKey::Unknown,
                expect,
            })
            .map_err(|_| ParseError::DepthExceeded)?;
        Ok(role)
    }

    fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    /// Key the next scalar value belongs to.
    fn parent_key(&self) -> FieldKey {
        match self.top() {
            Some(frame) if frame.container == Container::Object => frame.member,
            _ => FieldKey::Unknown,
        }
    }

    fn in_fault_list(&self) -> bool {
        self.top()
            .is_some_and(|f| matches!(f.role, Role::FaultList | Role::FaultEntry))
    }

    fn in_fault_entry(&self) -> bool {
        self.top().is_some_and(|f| f.role == Role::FaultEntry)
    }

    fn in_extruder_array(&self) -> bool {
        self.top()
            .is_some_and(|f| matches!(f.role, Role::ExtruderInfo | Role::ExtruderSlot))
    }

    /// `Some(true)` inside `print`, `Some(false)` at the top level.
    fn status_scope(&self) -> Option<bool> {
        match self.top().map(|f| f.role) {
            Some(Role::Print) => Some(true),
            Some(Role::Root) => Some(false),
            _ => None,
        }
    }
}

fn child_role(parent: &Frame, container: Container) -> Role {
    match (parent.role, parent.member, container) {
        (Role::Root, FieldKey::Print, Container::Object) => Role::Print,
        (Role::Root, FieldKey::Data, Container::Object) => Role::Data,
        (Role::Root | Role::Print, FieldKey::Device, Container::Object) => Role::Device,
        (Role::Device, FieldKey::Extruder, Container::Object) => Role::Extruder,
        (Role::Extruder, FieldKey::Info, Container::Array) => Role::ExtruderInfo,
        (Role::ExtruderInfo, _, Container::Object) => Role::ExtruderSlot,
        (Role::Root | Role::Print | Role::Data, FieldKey::Hms, Container::Array) => {
            Role::FaultList
        }
        (Role::FaultList, _, Container::Object) => Role::FaultEntry,
        _ => Role::Other,
    }
}

/// Fixed-capacity byte accumulator that truncates instead of growing.
#[derive(Debug, Clone, Copy)]
struct TokenBuf<const N: usize> {
    buf: [u8; N],
    len: usize,
    truncated: bool,
}

impl<const N: usize> Default for TokenBuf<N> {
    fn default() -> Self {
        Self {
            buf: [0; N],
            len: 0,
            truncated: false,
        }
    }
}

impl<const N: usize> TokenBuf<N> {
    fn clear(&mut self) {
        self.len = 0;
        self.truncated = false;
    }

    fn push(&mut self, b: u8) {
        if self.len < N {
            self.buf[self.len] = b;
            self.len += 1;
        } else {
            self.truncated = true;
        }
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

#[derive(Debug, Clone, Copy)]
struct Number {
    value: f64,
    unsigned: Option<u32>,
}

impl Number {
    fn parse(raw: &[u8]) -> Option<Number> {
        let text = core::str::from_utf8(raw).ok()?;
        let value: f64 = text.trim().parse().ok()?;
        if !value.is_finite() {
            return None;
        }
        Some(Number {
            value,
            unsigned: text.trim().parse::<u32>().ok(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Scalar<'a> {
    Text(&'a [u8]),
    Number(Number),
    /// `true`, `false` or `null`. No tracked field takes one.
    Literal,
}

impl Scalar<'_> {
    /// Numeric view; numeric strings count because the printer sends some
    /// percentages quoted.
    fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Number(n) => Some(n.value),
            Scalar::Text(raw) => Number::parse(raw).map(|n| n.value),
            Scalar::Literal => None,
        }
    }

    fn as_u32(&self) -> Option<u32> {
        match self {
            Scalar::Number(n) => n.unsigned,
            _ => None,
        }
    }
}

/// A value plus whether it came from the `print` object, which outranks the
/// top level.
#[derive(Debug, Clone, Copy, Default)]
struct Scoped<T> {
    value: Option<T>,
    from_print: bool,
}

impl<T> Scoped<T> {
    fn offer(&mut self, value: T, from_print: bool) {
        if self.value.is_none() || from_print || !self.from_print {
            self.value = Some(value);
            self.from_print = from_print;
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PendingFault {
    attr: Option<u32>,
    code: Option<u32>,
}

#[derive(Debug, Default)]
struct ReportBuilder {
    gcode_state: Scoped<String<GCODE_STATE_CAP>>,
    print_progress: Scoped<u8>,
    download_progress: Scoped<u8>,
    bed_temp: Scoped<f32>,
    bed_target: Scoped<f32>,
    nozzle_temp: Scoped<f32>,
    nozzle_target: Scoped<f32>,
    extruder_temp: Option<f32>,
    extruder_heating: bool,
    hms_present: bool,
    hms: Vec<FaultEntry, MAX_REPORT_FAULTS>,
    pending_fault: PendingFault,
    dropped_faults: u32,
}

impl ReportBuilder {
    fn on_status_field(&mut self, key: FieldKey, from_print: bool, value: Scalar<'_>) {
        if !from_print && key.print_scope_only() {
            return;
        }
        match key {
            FieldKey::GcodeState => {
                if let Scalar::Text(raw) = value {
                    self.gcode_state.offer(truncated_str(raw), from_print);
                }
            }
            k if k.is_print_progress() => {
                if let Some(p) = value.as_f64().and_then(progress_percent) {
                    self.print_progress.offer(p, from_print);
                }
            }
            k if k.is_download_progress() => {
                if let Some(p) = value.as_f64().and_then(progress_percent) {
                    self.download_progress.offer(p, from_print);
                }
            }
            k if k.is_bed_temp() => {
                if let Some(t) = value.as_f64() {
                    self.bed_temp.offer(t as f32, from_print);
                }
            }
            k if k.is_bed_target() => {
                if let Some(t) = value.as_f64() {
                    self.bed_target.offer(t as f32, from_print);
                }
            }
            FieldKey::NozzleTemper => {
                if let Some(t) = value.as_f64() {
                    self.nozzle_temp.offer(t as f32, from_print);
                }
            }
            FieldKey::NozzleTargetTemper => {
                if let Some(t) = value.as_f64() {
                    self.nozzle_target.offer(t as f32, from_print);
                }
            }
            _ => {}
        }
    }

    fn on_extruder_field(&mut self, key: FieldKey, value: Scalar<'_>) {
        match key {
            FieldKey::Hnow | FieldKey::Htar => {
                if value.as_f64().is_some_and(|v| v > 0.0) {
                    self.extruder_heating = true;
                }
            }
            FieldKey::Temp => {
                if let Some(t) = value.as_f64().and_then(extruder_temperature) {
                    let t = t as f32;
                    self.extruder_temp = Some(self.extruder_temp.map_or(t, |cur| cur.max(t)));
                }
            }
            _ => {}
        }
    }

    fn on_fault_field(&mut self, key: FieldKey, value: Scalar<'_>) {
        match key {
            FieldKey::Attr => self.pending_fault.attr = value.as_u32(),
            FieldKey::Code => self.pending_fault.code = value.as_u32(),
            _ => {}
        }
    }

    fn begin_fault(&mut self) {
        self.pending_fault = PendingFault::default();
    }

    fn commit_fault(&mut self) {
        let pending = core::mem::take(&mut self.pending_fault);
        if let (Some(attr), Some(code)) = (pending.attr, pending.code) {
            if self.hms.push(FaultEntry { attr, code }).is_err() {
                self.dropped_faults += 1;
            }
        }
    }

    fn build(self, timestamp: u64) -> ParsedReport {
        let bed = match (self.bed_temp.value, self.bed_target.value) {
            (Some(temp), Some(target)) => Some(BedReading { temp, target }),
            _ => None,
        };
        let nozzle_temp = match (self.nozzle_temp.value, self.extruder_temp) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let nozzle_target = self.nozzle_target.value;
        let nozzle_heating = self.extruder_heating
            || matches!((nozzle_temp, nozzle_target), (Some(t), Some(tar)) if tar - t > HEATING_MARGIN);

        ParsedReport {
            gcode_state: self.gcode_state.value,
            print_progress: self.print_progress.value,
            download_progress: self.download_progress.value,
            bed,
            nozzle_temp,
            nozzle_target,
            nozzle_heating,
            hms_present: self.hms_present,
            hms: self.hms,
            timestamp,
        }
    }
}

/// Progress is only meaningful as 0..=100; anything else is discarded.
fn progress_percent(raw: f64) -> Option<u8> {
    if (0.0..=100.0).contains(&raw) {
        Some(raw.trunc() as u8)
    } else {
        None
    }
}

fn extruder_temperature(raw: f64) -> Option<f64> {
    if raw <= FIXED_POINT_THRESHOLD {
        return Some(raw);
    }
    let scaled = raw / FIXED_POINT_SCALE;
    (0.0..=MAX_PLAUSIBLE_TEMP).contains(&scaled).then_some(scaled)
}

fn truncated_str(raw: &[u8]) -> String<GCODE_STATE_CAP> {
    let text = match core::str::from_utf8(raw) {
        Ok(text) => text,
        // Truncation may have split a multi-byte character.
        Err(e) => core::str::from_utf8(&raw[..e.valid_up_to()]).unwrap_or_default(),
    };
    let mut out = String::new();
    for ch in text.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

fn is_number_byte(b: u8) -> bool {
    matches!(b, b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E')
}

/// Streaming parser for one report message at a time.
///
/// Call [`begin`](Self::begin) when a message starts, [`feed`](Self::feed)
/// for every fragment and [`finish`](Self::finish) once the transport says
/// the message is complete. A structural error is sticky until the next
/// `begin`/`reset`.
#[derive(Debug)]
pub struct StreamParser {
    mode: Mode,
    escape: Escape,
    stack: ContextStack,
    key: TokenBuf<KEY_BUF_LEN>,
    text: TokenBuf<VALUE_BUF_LEN>,
    number: TokenBuf<NUMBER_BUF_LEN>,
    literal: TokenBuf<LITERAL_BUF_LEN>,
    builder: ReportBuilder,
    error: Option<ParseError>,
    started: bool,
    complete: bool,
    offset: usize,
    timestamp: u64,
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamParser {
    pub fn new() -> Self {
        Self {
            mode: Mode::Default,
            escape: Escape::None,
            stack: ContextStack::default(),
            key: TokenBuf::default(),
            text: TokenBuf::default(),
            number: TokenBuf::default(),
            literal: TokenBuf::default(),
            builder: ReportBuilder::default(),
            error: None,
            started: false,
            complete: false,
            offset: 0,
            timestamp: 0,
        }
    }

    /// Starts a new message captured at `now_ms`.
    pub fn begin(&mut self, now_ms: u64) {
        self.reset();
        self.timestamp = now_ms;
    }

    /// Drops any partial message and clears the error flag.
    pub fn reset(&mut self) {
        self.mode = Mode::Default;
        self.escape = Escape::None;
        self.stack.clear();
        self.key.clear();
        self.text.clear();
        self.number.clear();
        self.literal.clear();
        self.builder = ReportBuilder::default();
        self.error = None;
        self.started = false;
        self.complete = false;
        self.offset = 0;
        self.timestamp = 0;
    }

    pub fn error(&self) -> Option<ParseError> {
        self.error
    }

    /// Faults that did not fit into the report's bounded list.
    pub fn dropped_faults(&self) -> u32 {
        self.builder.dropped_faults
    }

    /// Consumes one fragment. Returns `false` once the message is malformed.
    pub fn feed(&mut self, bytes: &[u8]) -> bool {
        if self.error.is_some() {
            return false;
        }
        for &b in bytes {
            if let Err(e) = self.step(b) {
                self.error = Some(e);
                return false;
            }
            self.offset += 1;
        }
        true
    }

    pub fn finish(&mut self) -> Option<ParsedReport> {
        self.try_finish().ok()
    }

    /// Flushes a trailing number/literal token and hands out the report.
    pub fn try_finish(&mut self) -> Result<ParsedReport, ParseError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let flushed = match self.mode {
            Mode::Number => self.end_number(),
            Mode::Literal => self.end_literal(),
            Mode::KeyString | Mode::ValueString => Err(ParseError::UnterminatedString),
            Mode::Default => Ok(()),
        };
        let result = flushed.and_then(|_| {
            if !self.started {
                Err(ParseError::Empty)
            } else if !self.complete {
                Err(ParseError::Truncated)
            } else {
                Ok(())
            }
        });
        match result {
            Ok(()) => {
                let builder = core::mem::take(&mut self.builder);
                Ok(builder.build(self.timestamp))
            }
            Err(e) => {
                self.error = Some(e);
                Err(e)
            }
        }
    }

    fn step(&mut self, b: u8) -> Result<(), ParseError> {
        match self.mode {
            Mode::KeyString | Mode::ValueString => self.string_byte(b),
            Mode::Number => {
                if is_number_byte(b) {
                    self.number.push(b);
                    Ok(())
                } else {
                    self.end_number()?;
                    self.structural(b)
                }
            }
            Mode::Literal => {
                if b.is_ascii_alphabetic() {
                    self.literal.push(b);
                    Ok(())
                } else {
                    self.end_literal()?;
                    self.structural(b)
                }
            }
            Mode::Default => self.structural(b),
        }
    }

    fn structural(&mut self, b: u8) -> Result<(), ParseError> {
        if is_whitespace(b) {
            return Ok(());
        }
        let Some(frame) = self.stack.top().copied() else {
            if self.complete {
                return Err(ParseError::TrailingData(self.offset));
            }
            if b != b'{' {
                return Err(ParseError::UnknownTopLevel(b));
            }
            self.started = true;
            return self.open(Container::Object);
        };

        let unexpected = ParseError::UnexpectedByte {
            byte: b,
            offset: self.offset,
        };
        match (frame.expect, b) {
            (Expect::KeyOrClose | Expect::Key, b'"') => {
                self.key.clear();
                self.escape = Escape::None;
                self.mode = Mode::KeyString;
                Ok(())
            }
            (Expect::KeyOrClose | Expect::CommaOrClose, b'}')
                if frame.container == Container::Object =>
            {
                self.close()
            }
            (Expect::ValueOrClose | Expect::CommaOrClose, b']')
                if frame.container == Container::Array =>
            {
                self.close()
            }
            (Expect::Colon, b':') => {
                self.set_expect(Expect::Value);
                Ok(())
            }
            (Expect::CommaOrClose, b',') => {
                let next = match frame.container {
                    Container::Object => Expect::Key,
                    Container::Array => Expect::Value,
                };
                self.set_expect(next);
                Ok(())
            }
            (Expect::Value | Expect::ValueOrClose, _) => self.begin_value(b, unexpected),
            _ => Err(unexpected),
        }
    }

    fn begin_value(&mut self, b: u8, unexpected: ParseError) -> Result<(), ParseError> {
        match b {
            b'{' => self.open(Container::Object),
            b'[' => self.open(Container::Array),
            b'"' => {
                self.text.clear();
                self.escape = Escape::None;
                self.mode = Mode::ValueString;
                Ok(())
            }
            b'-' | b'0'..=b'9' => {
                self.number.clear();
                self.number.push(b);
                self.mode = Mode::Number;
                Ok(())
            }
            b't' | b'f' | b'n' => {
                self.literal.clear();
                self.literal.push(b);
                self.mode = Mode::Literal;
                Ok(())
            }
            _ => Err(unexpected),
        }
    }

    fn set_expect(&mut self, expect: Expect) {
        if let Some(frame) = self.stack.top_mut() {
            frame.expect = expect;
        }
    }

    fn open(&mut self, container: Container) -> Result<(), ParseError> {
        match self.stack.push(container)? {
            Role::FaultList => self.builder.hms_present = true,
            Role::FaultEntry => self.builder.begin_fault(),
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), ParseError> {
        if let Some(frame) = self.stack.pop() {
            if frame.role == Role::FaultEntry {
                self.builder.commit_fault();
            }
        }
        self.value_done();
        Ok(())
    }

    fn value_done(&mut self) {
        if self.stack.is_empty() {
            self.complete = true;
        } else {
            self.set_expect(Expect::CommaOrClose);
        }
    }

    fn string_byte(&mut self, b: u8) -> Result<(), ParseError> {
        match self.escape {
            Escape::Pending => {
                if b == b'u' {
                    self.escape = Escape::Unicode(4);
                    self.push_string_byte(b'?');
                } else {
                    self.escape = Escape::None;
                    let decoded = match b {
                        b'n' => b'\n',
                        b't' => b'\t',
                        b'r' => b'\r',
                        b'b' => 0x08,
                        b'f' => 0x0c,
                        other => other,
                    };
                    self.push_string_byte(decoded);
                }
                return Ok(());
            }
            Escape::Unicode(remaining) => {
                if !b.is_ascii_hexdigit() {
                    return Err(ParseError::UnexpectedByte {
                        byte: b,
                        offset: self.offset,
                    });
                }
                self.escape = if remaining > 1 {
                    Escape::Unicode(remaining - 1)
                } else {
                    Escape::None
                };
                return Ok(());
            }
            Escape::None => {}
        }

        match b {
            b'\\' => {
                self.escape = Escape::Pending;
                Ok(())
            }
            b'"' => self.end_string(),
            _ => {
                self.push_string_byte(b);
                Ok(())
            }
        }
    }

    fn push_string_byte(&mut self, b: u8) {
        match self.mode {
            Mode::KeyString => self.key.push(b),
            _ => self.text.push(b),
        }
    }

    fn end_string(&mut self) -> Result<(), ParseError> {
        let mode = self.mode;
        self.mode = Mode::Default;
        if mode == Mode::KeyString {
            let key = if self.key.truncated {
                FieldKey::Unknown
            } else {
                FieldKey::intern(self.key.as_bytes())
            };
            if let Some(frame) = self.stack.top_mut() {
                frame.member = key;
                frame.expect = Expect::Colon;
            }
            return Ok(());
        }
        let text = self.text;
        self.on_scalar(Scalar::Text(text.as_bytes()));
        self.value_done();
        Ok(())
    }

    fn end_number(&mut self) -> Result<(), ParseError> {
        self.mode = Mode::Default;
        // An over-long number is structurally fine but its value is lost.
        if !self.number.truncated {
            let number =
                Number::parse(self.number.as_bytes()).ok_or(ParseError::InvalidNumber)?;
            self.on_scalar(Scalar::Number(number));
        }
        self.value_done();
        Ok(())
    }

    fn end_literal(&mut self) -> Result<(), ParseError> {
        self.mode = Mode::Default;
        if self.literal.truncated {
            return Err(ParseError::InvalidLiteral);
        }
        match self.literal.as_bytes() {
            b"true" | b"false" | b"null" => self.on_scalar(Scalar::Literal),
            _ => return Err(ParseError::InvalidLiteral),
        }
        self.value_done();
        Ok(())
    }

    fn on_scalar(&mut self, value: Scalar<'_>) {
        let key = self.stack.parent_key();
        if !key.is_known() {
            return;
        }
        if self.stack.in_fault_list() {
            if self.stack.in_fault_entry() {
                self.builder.on_fault_field(key, value);
            }
        } else if self.stack.in_extruder_array() {
            self.builder.on_extruder_field(key, value);
        } else if let Some(from_print) = self.stack.status_scope() {
            self.builder.on_status_field(key, from_print, value);
        }
    }
}
