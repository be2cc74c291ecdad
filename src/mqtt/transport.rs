//! Transport-error classification and the hard-reset gate.
//!
//! A lone socket timeout is normal on a busy printer and rumqttc reconnects on
//! its own. A hard reset (tear down the client, maybe re-fetch the certificate)
//! is only worth it when TLS itself failed or errors keep piling up.
//!
//! ```text
//! error ──► classify ──► Transient ─┐
//!                        Tls ───────┼──► ErrorTracker::record ──► Ignore
//!                        Other ─────┘        (20 s window,        HardReset { refetch_cert }
//!                                             30 s cooldown)       Suppressed
//! ```

use rumqttc::tokio_rustls::rustls;
use rumqttc::{ConnectionError, StateError, TlsError};
use std::io;
use tracing::{debug, warn};

pub const ERROR_WINDOW_MS: u64 = 20_000;
pub const ERROR_THRESHOLD: usize = 3;
pub const HARD_RESET_COOLDOWN_MS: u64 = 30_000;

const WINDOW_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFault {
    /// Timeout, EAGAIN or EINTR on the socket.
    Transient,
    /// The TLS stack rejected the session.
    Tls,
    Other,
}

impl TransportFault {
    pub fn classify(err: &ConnectionError) -> Self {
        match err {
            ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => Self::Transient,
            ConnectionError::Io(e) => Self::from_io(e),
            ConnectionError::MqttState(StateError::Io(e)) => Self::from_io(e),
            ConnectionError::Tls(TlsError::Io(e)) => match Self::from_io(e) {
                Self::Other => Self::Tls,
                fault => fault,
            },
            ConnectionError::Tls(_) => Self::Tls,
            _ => Self::Other,
        }
    }

    pub fn from_io(err: &io::Error) -> Self {
        let tls_inside = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<rustls::Error>())
            .is_some();
        if tls_inside {
            return Self::Tls;
        }
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => {
                Self::Transient
            }
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorVerdict {
    /// Leave it to the client's own reconnect.
    Ignore,
    HardReset { refetch_cert: bool },
    /// A reset is due but the cooldown has not elapsed.
    Suppressed,
}

/// Rolling window of recent transport errors plus the reset cooldown.
#[derive(Debug, Default)]
pub struct ErrorTracker {
    recent: heapless::Deque<u64, WINDOW_CAPACITY>,
    last_hard_reset_ms: Option<u64>,
    /// A TLS error was seen but its reset was suppressed.
    tls_pending: bool,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, fault: TransportFault, now_ms: u64) -> ErrorVerdict {
        while let Some(&oldest) = self.recent.front() {
            if now_ms.saturating_sub(oldest) > ERROR_WINDOW_MS {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        if self.recent.is_full() {
            self.recent.pop_front();
        }
        // Capacity was just ensured.
        let _ = self.recent.push_back(now_ms);

        let tls = fault == TransportFault::Tls;
        let count = self.recent.len();
        debug!("Transport error {:?} ({} in window)", fault, count);

        if !tls && count < ERROR_THRESHOLD {
            return ErrorVerdict::Ignore;
        }

        if let Some(last) = self.last_hard_reset_ms {
            if now_ms.saturating_sub(last) < HARD_RESET_COOLDOWN_MS {
                self.tls_pending |= tls;
                debug!("Hard reset suppressed, last one {} ms ago", now_ms - last);
                return ErrorVerdict::Suppressed;
            }
        }

        let refetch_cert = tls || self.tls_pending;
        warn!(
            "Hard reset: {} transport errors in window, tls={}",
            count, refetch_cert
        );
        self.last_hard_reset_ms = Some(now_ms);
        self.recent.clear();
        self.tls_pending = false;
        ErrorVerdict::HardReset { refetch_cert }
    }

    /// A healthy session wipes the error history, not the cooldown.
    pub fn on_connected(&mut self) {
        self.recent.clear();
        self.tls_pending = false;
    }

    pub fn errors_in_window(&self) -> usize {
        self.recent.len()
    }

    pub fn last_hard_reset_ms(&self) -> Option<u64> {
        self.last_hard_reset_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::ConnectReturnCode;
    use rumqttc::tokio_rustls::rustls::CertificateError;

    fn eagain() -> ConnectionError {
        ConnectionError::Io(io::Error::from(io::ErrorKind::WouldBlock))
    }

    #[test]
    fn test_classification() {
        assert_eq!(TransportFault::classify(&eagain()), TransportFault::Transient);
        assert_eq!(
            TransportFault::classify(&ConnectionError::Io(io::Error::from(io::ErrorKind::TimedOut))),
            TransportFault::Transient
        );
        assert_eq!(
            TransportFault::classify(&ConnectionError::NetworkTimeout),
            TransportFault::Transient
        );
        assert_eq!(
            TransportFault::classify(&ConnectionError::Io(io::Error::from(
                io::ErrorKind::ConnectionRefused
            ))),
            TransportFault::Other
        );
        assert_eq!(
            TransportFault::classify(&ConnectionError::ConnectionRefused(
                ConnectReturnCode::NotAuthorized
            )),
            TransportFault::Other
        );

        let bad_cert = io::Error::new(
            io::ErrorKind::InvalidData,
            rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer),
        );
        assert_eq!(
            TransportFault::classify(&ConnectionError::Io(bad_cert)),
            TransportFault::Tls
        );
    }

    #[test]
    fn test_isolated_transient_errors_never_reset() {
        let mut tracker = ErrorTracker::new();
        for i in 0..3 {
            let verdict = tracker.record(TransportFault::Transient, i * 25_000);
            assert_eq!(verdict, ErrorVerdict::Ignore);
            assert_eq!(tracker.errors_in_window(), 1);
        }
        assert_eq!(tracker.last_hard_reset_ms(), None);
    }

    #[test]
    fn test_burst_with_tls_error_resets_exactly_once() {
        let mut tracker = ErrorTracker::new();
        let verdicts = [
            tracker.record(TransportFault::Transient, 0),
            tracker.record(TransportFault::Transient, 2_000),
            tracker.record(TransportFault::Transient, 4_000),
            tracker.record(TransportFault::Tls, 5_000),
        ];
        let resets = verdicts
            .iter()
            .filter(|v| matches!(v, ErrorVerdict::HardReset { .. }))
            .count();
        assert_eq!(resets, 1);
        assert_eq!(verdicts[3], ErrorVerdict::Suppressed);
    }

    #[test]
    fn test_single_tls_error_resets_with_refetch() {
        let mut tracker = ErrorTracker::new();
        assert_eq!(
            tracker.record(TransportFault::Tls, 1_000),
            ErrorVerdict::HardReset { refetch_cert: true }
        );
    }

    #[test]
    fn test_cooldown_then_pending_tls_refetch() {
        let mut tracker = ErrorTracker::new();
        for t in [0, 1_000, 2_000] {
            tracker.record(TransportFault::Other, t);
        }
        assert_eq!(tracker.last_hard_reset_ms(), Some(2_000));

        assert_eq!(tracker.record(TransportFault::Tls, 10_000), ErrorVerdict::Suppressed);

        // After the cooldown the next reset carries the suppressed TLS failure.
        tracker.record(TransportFault::Transient, 33_000);
        tracker.record(TransportFault::Transient, 34_000);
        assert_eq!(
            tracker.record(TransportFault::Transient, 35_000),
            ErrorVerdict::HardReset { refetch_cert: true }
        );
    }

    #[test]
    fn test_connected_clears_window() {
        let mut tracker = ErrorTracker::new();
        tracker.record(TransportFault::Transient, 0);
        tracker.record(TransportFault::Transient, 1_000);
        tracker.on_connected();
        assert_eq!(tracker.errors_in_window(), 0);
        assert_eq!(tracker.record(TransportFault::Transient, 2_000), ErrorVerdict::Ignore);
    }
}
