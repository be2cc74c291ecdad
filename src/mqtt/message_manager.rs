//! Inbound message plumbing between the network task and the poll context.
//!
//! ```text
//! network task                               poll context
//! ────────────                               ────────────
//! publish fragments ──► Reassembler ──► StreamParser
//!                                            │ ParsedReport
//!                                            ▼
//!                        ReportMailbox ══ single slot ══► ReportInbox::try_take
//! ```

use crate::telemetry::{ParsedReport, StreamParser};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Counters written by the network task and read by the poll context.
#[derive(Debug, Default)]
pub struct LinkStats {
    messages: AtomicU64,
    last_message_len: AtomicUsize,
    last_message_ms: AtomicU64,
    parse_failures: AtomicU32,
    rejected_fragments: AtomicU32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStatsSnapshot {
    pub messages: u64,
    pub last_message_len: usize,
    /// Monotonic ms of the last complete message, 0 if none yet.
    pub last_message_ms: u64,
    pub parse_failures: u32,
    pub rejected_fragments: u32,
}

impl LinkStats {
    fn record_message(&self, len: usize, now_ms: u64) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.last_message_len.store(len, Ordering::Relaxed);
        self.last_message_ms.store(now_ms, Ordering::Relaxed);
    }

    fn record_parse_failure(&self) -> u32 {
        self.parse_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn record_rejection(&self) -> u32 {
        self.rejected_fragments.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> LinkStatsSnapshot {
        LinkStatsSnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            last_message_len: self.last_message_len.load(Ordering::Relaxed),
            last_message_ms: self.last_message_ms.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            rejected_fragments: self.rejected_fragments.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Assembly {
    Idle,
    Receiving { expected: usize, received: usize },
    /// Parser gave up; remaining fragments are swallowed.
    Discarding { expected: usize, received: usize },
}

/// Feeds publish fragments for the report topic into the parser.
///
/// Fragments must arrive in order against the length announced by the first
/// one. Anything for another topic, out of order, over the announced length or
/// over `max_message_bytes` is rejected and the partial message dropped.
#[derive(Debug)]
pub struct Reassembler {
    topic: String,
    max_message_bytes: usize,
    parser: StreamParser,
    state: Assembly,
    stats: Arc<LinkStats>,
}

impl Reassembler {
    pub fn new(topic: impl Into<String>, max_message_bytes: usize, stats: Arc<LinkStats>) -> Self {
        Self {
            topic: topic.into(),
            max_message_bytes,
            parser: StreamParser::new(),
            state: Assembly::Idle,
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<LinkStats> {
        &self.stats
    }

    /// Drops any partial message.
    pub fn reset(&mut self) {
        self.parser.reset();
        self.state = Assembly::Idle;
    }

    /// Whole message in one call, as rumqttc delivers it.
    pub fn on_message(&mut self, topic: &str, payload: &[u8], now_ms: u64) -> Option<ParsedReport> {
        self.on_fragment(topic, payload, 0, payload.len(), now_ms)
    }

    pub fn on_fragment(
        &mut self,
        topic: &str,
        fragment: &[u8],
        offset: usize,
        total_len: usize,
        now_ms: u64,
    ) -> Option<ParsedReport> {
        if topic != self.topic {
            return self.reject("foreign topic", topic, total_len);
        }

        let (expected, received, discarding) = match self.state {
            _ if offset == 0 => {
                if total_len == 0 {
                    return self.reject("empty message", topic, total_len);
                }
                if total_len > self.max_message_bytes {
                    let failures = self.stats.record_parse_failure();
                    warn!(
                        "Report of {} bytes exceeds {} byte limit, dropped (failures={})",
                        total_len, self.max_message_bytes, failures
                    );
                    self.reset();
                    return None;
                }
                self.parser.begin(now_ms);
                (total_len, 0, false)
            }
            Assembly::Idle => return self.reject("fragment without start", topic, total_len),
            Assembly::Receiving { expected, received } => (expected, received, false),
            Assembly::Discarding { expected, received } => (expected, received, true),
        };

        if offset != received || total_len != expected {
            return self.reject("out of order", topic, total_len);
        }
        let received = received + fragment.len();
        if received > expected {
            return self.reject("overruns announced length", topic, total_len);
        }

        let mut discarding = discarding;
        if !discarding && !self.parser.feed(fragment) {
            let failures = self.stats.record_parse_failure();
            warn!(
                "Report parse failed: {} (failures={})",
                self.parser.error().map(|e| e.to_string()).unwrap_or_default(),
                failures
            );
            discarding = true;
        }

        if received < expected {
            self.state = if discarding {
                Assembly::Discarding { expected, received }
            } else {
                Assembly::Receiving { expected, received }
            };
            return None;
        }

        self.state = Assembly::Idle;
        if discarding {
            return None;
        }
        match self.parser.try_finish() {
            Ok(report) => {
                self.stats.record_message(expected, now_ms);
                if self.parser.dropped_faults() > 0 {
                    debug!("{} HMS entries did not fit the report", self.parser.dropped_faults());
                }
                Some(report)
            }
            Err(e) => {
                let failures = self.stats.record_parse_failure();
                warn!("Report parse failed: {} (failures={})", e, failures);
                None
            }
        }
    }

    fn reject(&mut self, reason: &str, topic: &str, total_len: usize) -> Option<ParsedReport> {
        let rejected = self.stats.record_rejection();
        debug!(
            "Fragment rejected ({}): topic={} len={} rejected={}",
            reason, topic, total_len, rejected
        );
        self.reset();
        None
    }
}

/// Producer half of the single-slot report handoff.
#[derive(Debug)]
pub struct ReportMailbox {
    slot: watch::Sender<Option<ParsedReport>>,
}

/// Consumer half, owned by the poll context.
#[derive(Debug)]
pub struct ReportInbox {
    slot: watch::Receiver<Option<ParsedReport>>,
}

pub fn report_mailbox() -> (ReportMailbox, ReportInbox) {
    let (tx, rx) = watch::channel(None);
    (ReportMailbox { slot: tx }, ReportInbox { slot: rx })
}

impl ReportMailbox {
    /// Never blocks. An unread report is replaced.
    pub fn publish(&self, report: ParsedReport) {
        self.slot.send_replace(Some(report));
    }
}

impl ReportInbox {
    /// Latest report not yet taken, if any. Never blocks.
    pub fn try_take(&mut self) -> Option<ParsedReport> {
        match self.slot.has_changed() {
            Ok(true) => self.slot.borrow_and_update().clone(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "device/SN/report";

    fn reassembler() -> Reassembler {
        Reassembler::new(TOPIC, 256, Arc::new(LinkStats::default()))
    }

    #[test]
    fn test_whole_message() {
        let mut r = reassembler();
        let payload = br#"{"print":{"gcode_state":"RUNNING","mc_percent":42}}"#;
        let report = r.on_message(TOPIC, payload, 1_000).unwrap();
        assert_eq!(report.gcode_state(), Some("RUNNING"));
        assert_eq!(report.print_progress, Some(42));
        assert_eq!(report.timestamp, 1_000);

        let stats = r.stats().snapshot();
        assert_eq!(stats.messages, 1);
        assert_eq!(stats.last_message_len, payload.len());
        assert_eq!(stats.last_message_ms, 1_000);
    }

    #[test]
    fn test_fragmented_message() {
        let mut r = reassembler();
        let payload = br#"{"print":{"bed_temper":60.5,"bed_target_temper":65}}"#;
        let total = payload.len();
        let (a, rest) = payload.split_at(7);
        let (b, c) = rest.split_at(20);

        assert!(r.on_fragment(TOPIC, a, 0, total, 5).is_none());
        assert!(r.on_fragment(TOPIC, b, a.len(), total, 6).is_none());
        let report = r.on_fragment(TOPIC, c, a.len() + b.len(), total, 7).unwrap();
        let bed = report.bed.unwrap();
        assert_eq!(bed.temp, 60.5);
        assert_eq!(bed.target, 65.0);
        assert_eq!(report.timestamp, 5);
    }

    #[test]
    fn test_foreign_topic_discards_partial() {
        let mut r = reassembler();
        let payload = br#"{"print":{"mc_percent":10}}"#;
        let total = payload.len();
        r.on_fragment(TOPIC, &payload[..5], 0, total, 0);

        assert!(r.on_fragment("device/OTHER/report", &payload[5..], 5, total, 0).is_none());
        // The partial message is gone, so the tail is an orphan.
        assert!(r.on_fragment(TOPIC, &payload[5..], 5, total, 0).is_none());
        assert_eq!(r.stats().snapshot().rejected_fragments, 2);
        assert_eq!(r.stats().snapshot().messages, 0);
    }

    #[test]
    fn test_overrun_rejected() {
        let mut r = reassembler();
        let payload = br#"{"print":{"mc_percent":10}}"#;
        assert!(r.on_fragment(TOPIC, &payload[..10], 0, 12, 0).is_none());
        assert!(r.on_fragment(TOPIC, &payload[10..], 10, 12, 0).is_none());
        assert_eq!(r.stats().snapshot().rejected_fragments, 1);
    }

    #[test]
    fn test_oversized_report_counts_as_parse_failure() {
        let mut r = reassembler();
        assert!(r.on_fragment(TOPIC, b"{", 0, 257, 0).is_none());

        let mut big = br#"{"print":{"mc_percent":10,"pad":""#.to_vec();
        big.resize(300, b'x');
        big.extend_from_slice(br#""}}"#);
        assert!(r.on_message(TOPIC, &big, 5).is_none());

        let stats = r.stats().snapshot();
        assert_eq!(stats.parse_failures, 2);
        assert_eq!(stats.rejected_fragments, 0);
        assert_eq!(stats.messages, 0);

        let report = r.on_message(TOPIC, br#"{"print":{"mc_percent":11}}"#, 10).unwrap();
        assert_eq!(report.print_progress, Some(11));
    }

    #[test]
    fn test_new_message_restarts_assembly() {
        let mut r = reassembler();
        r.on_fragment(TOPIC, br#"{"print":"#, 0, 40, 0);
        let report = r.on_message(TOPIC, br#"{"mc_percent":7}"#, 9).unwrap();
        assert_eq!(report.print_progress, Some(7));
    }

    #[test]
    fn test_parse_failure_counted_once() {
        let mut r = reassembler();
        let payload = br#"{"print":,"x":1,"y":2}"#;
        let total = payload.len();
        assert!(r.on_fragment(TOPIC, &payload[..10], 0, total, 0).is_none());
        assert!(r.on_fragment(TOPIC, &payload[10..], 10, total, 0).is_none());

        let stats = r.stats().snapshot();
        assert_eq!(stats.parse_failures, 1);
        assert_eq!(stats.rejected_fragments, 0);

        // The link keeps working for the next message.
        assert!(r.on_message(TOPIC, br#"{"mc_percent":1}"#, 1).is_some());
    }

    #[test]
    fn test_truncated_message_counts_failure() {
        let mut r = reassembler();
        assert!(r.on_message(TOPIC, br#"{"print":{"mc_percent":1}"#, 0).is_none());
        assert_eq!(r.stats().snapshot().parse_failures, 1);
    }

    #[test]
    fn test_mailbox_overwrites_unread_report() {
        let (mailbox, mut inbox) = report_mailbox();
        assert!(inbox.try_take().is_none());

        let first = ParsedReport {
            print_progress: Some(1),
            ..Default::default()
        };
        let second = ParsedReport {
            print_progress: Some(2),
            ..Default::default()
        };
        mailbox.publish(first);
        mailbox.publish(second);

        assert_eq!(inbox.try_take().unwrap().print_progress, Some(2));
        assert!(inbox.try_take().is_none());
    }
}
