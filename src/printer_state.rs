//! Client-visible printer state, owned by the poll context.
//!
//! Reports coming out of the mailbox are merged here: a field the report
//! carries replaces the cached value, a field it does not carry leaves the
//! cached value alone. Fault entries then go through the ignore list into the
//! HMS table, stale faults expire, and the report callback fires once.

use crate::hms::{HmsEvent, HmsTable, IgnoreList, Severity, HMS_CAPACITY};
use crate::telemetry::report::GCODE_STATE_CAP;
use crate::telemetry::ParsedReport;
use tracing::{debug, info};

/// Progress value shown while the printer has not reported one.
pub const PROGRESS_UNKNOWN: u8 = 255;

#[derive(Debug, Clone, PartialEq)]
pub struct PrinterStatus {
    pub gcode_state: heapless::String<GCODE_STATE_CAP>,
    pub print_progress: u8,
    pub download_progress: u8,
    pub bed_temp: f32,
    pub bed_target: f32,
    pub bed_valid: bool,
    pub nozzle_temp: f32,
    pub nozzle_target: f32,
    pub nozzle_valid: bool,
    pub nozzle_heating: bool,
    /// Monotonic ms of the last applied report.
    pub last_report_ms: Option<u64>,
}

impl Default for PrinterStatus {
    fn default() -> Self {
        Self {
            gcode_state: heapless::String::new(),
            print_progress: PROGRESS_UNKNOWN,
            download_progress: PROGRESS_UNKNOWN,
            bed_temp: 0.0,
            bed_target: 0.0,
            bed_valid: false,
            nozzle_temp: 0.0,
            nozzle_target: 0.0,
            nozzle_valid: false,
            nozzle_heating: false,
            last_report_ms: None,
        }
    }
}

impl PrinterStatus {
    pub fn gcode_state(&self) -> &str {
        &self.gcode_state
    }

    fn merge(&mut self, report: &ParsedReport) {
        if let Some(state) = report.gcode_state.as_ref() {
            self.gcode_state = state.clone();
        }
        if let Some(progress) = report.print_progress {
            self.print_progress = progress;
        }
        if let Some(progress) = report.download_progress {
            self.download_progress = progress;
        }
        if let Some(bed) = report.bed {
            self.bed_temp = bed.temp;
            self.bed_target = bed.target;
            self.bed_valid = true;
        }
        if let Some(temp) = report.nozzle_temp {
            self.nozzle_temp = temp;
            self.nozzle_valid = true;
        }
        if let Some(target) = report.nozzle_target {
            self.nozzle_target = target;
        }
        // Heating is derived per message; only messages about the nozzle say anything about it.
        if report.nozzle_heating || report.nozzle_temp.is_some() || report.nozzle_target.is_some() {
            self.nozzle_heating = report.nozzle_heating;
        }
        self.last_report_ms = Some(report.timestamp);
    }
}

/// Called once per applied report.
pub type ReportCallback = Box<dyn FnMut(&PrinterStatus, &HmsTable) + Send>;

#[derive(Debug, Clone, PartialEq)]
struct StatusLine {
    state: heapless::String<GCODE_STATE_CAP>,
    print: u8,
    download: u8,
    bed: Option<(i32, i32)>,
    hms_active: usize,
    severity: Severity,
}

/// Emits the status line on change, or at least every `interval_ms`.
#[derive(Debug)]
struct StatusLog {
    interval_ms: u64,
    last_line: Option<StatusLine>,
    last_log_ms: u64,
}

impl StatusLog {
    fn due(&mut self, line: StatusLine, now_ms: u64) -> bool {
        let changed = self.last_line.as_ref() != Some(&line);
        let stale = now_ms.saturating_sub(self.last_log_ms) >= self.interval_ms;
        if !changed && !stale {
            return false;
        }
        self.last_line = Some(line);
        self.last_log_ms = now_ms;
        true
    }
}

pub struct PrinterState {
    status: PrinterStatus,
    hms: HmsTable,
    ignore: IgnoreList,
    callback: Option<ReportCallback>,
    status_log: StatusLog,
    reports_applied: u64,
}

impl std::fmt::Debug for PrinterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrinterState")
            .field("status", &self.status)
            .field("hms", &self.hms)
            .field("ignore", &self.ignore)
            .field("reports_applied", &self.reports_applied)
            .finish()
    }
}

impl PrinterState {
    pub fn new(hms_ttl_ms: u64, status_log_interval_ms: u64) -> Self {
        Self {
            status: PrinterStatus::default(),
            hms: HmsTable::new(hms_ttl_ms),
            ignore: IgnoreList::default(),
            callback: None,
            status_log: StatusLog {
                interval_ms: status_log_interval_ms,
                last_line: None,
                last_log_ms: 0,
            },
            reports_applied: 0,
        }
    }

    pub fn status(&self) -> &PrinterStatus {
        &self.status
    }

    pub fn hms(&self) -> &HmsTable {
        &self.hms
    }

    pub fn ignore_list(&self) -> &IgnoreList {
        &self.ignore
    }

    pub fn set_ignore_list(&mut self, ignore: IgnoreList) {
        if ignore != self.ignore {
            info!("HMS ignore list now has {} entries", ignore.len());
            self.ignore = ignore;
        }
    }

    pub fn set_hms_ttl_ms(&mut self, ttl_ms: u64) {
        self.hms.set_ttl_ms(ttl_ms);
    }

    pub fn set_status_log_interval_ms(&mut self, interval_ms: u64) {
        self.status_log.interval_ms = interval_ms;
    }

    pub fn on_report(&mut self, callback: ReportCallback) {
        self.callback = Some(callback);
    }

    pub fn reports_applied(&self) -> u64 {
        self.reports_applied
    }

    pub fn apply_parsed_report(&mut self, report: &ParsedReport, now_ms: u64) {
        self.status.merge(report);

        for fault in report.hms.iter() {
            if self.ignore.is_ignored_fault(fault.attr, fault.code) {
                debug!("[HMS] ignoring {:016x}", fault.key());
                continue;
            }
            self.hms.upsert(fault.attr, fault.code, now_ms);
        }
        self.hms.expire(now_ms);
        self.reports_applied += 1;

        if let Some(callback) = self.callback.as_mut() {
            callback(&self.status, &self.hms);
        }
        self.log_status_if_needed(now_ms);
    }

    /// Runs every tick, also while offline, so stale faults clear.
    pub fn expire(&mut self, now_ms: u64) -> usize {
        self.hms.expire(now_ms)
    }

    pub fn top_severity(&self) -> Severity {
        self.hms.top_severity()
    }

    pub fn has_problem(&self) -> bool {
        self.hms.has_problem()
    }

    pub fn active_fault_count(&self) -> usize {
        self.hms.count_active_total()
    }

    pub fn active_faults(&self) -> heapless::Vec<HmsEvent, HMS_CAPACITY> {
        self.hms.active_snapshot()
    }

    fn status_line(&self) -> StatusLine {
        let s = &self.status;
        StatusLine {
            state: s.gcode_state.clone(),
            print: s.print_progress,
            download: s.download_progress,
            bed: s
                .bed_valid
                .then(|| (s.bed_temp.round() as i32, s.bed_target.round() as i32)),
            hms_active: self.hms.count_active_total(),
            severity: self.hms.top_severity(),
        }
    }

    fn log_status_if_needed(&mut self, now_ms: u64) -> bool {
        let line = self.status_line();
        if !self.status_log.due(line.clone(), now_ms) {
            return false;
        }
        let bed = match line.bed {
            Some((temp, target)) => format!("{}/{}", temp, target),
            None => "n/a".to_string(),
        };
        info!(
            "Status state={} print={} dl={} bed={} hms={} sev={}",
            if line.state.is_empty() { "-" } else { line.state.as_str() },
            line.print,
            line.download,
            bed,
            line.hms_active,
            line.severity
        );
        true
    }
}
