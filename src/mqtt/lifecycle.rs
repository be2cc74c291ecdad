//! Connection lifecycle for the printer link.
//!
//! The lifecycle never touches sockets itself. The handler feeds it the
//! current environment on every poll plus the events coming back from the
//! network task, and executes whatever [`LinkAction`] it returns. That keeps
//! every transition testable without a printer on the other end.
//!
//! # State Machine
//!
//! ```text
//!                 no pin, rate limit ok
//! Disconnected ─────────────────────────► ConnectingCertFetch
//!   │    ▲  ▲                                 │ fetched   │ failed
//!   │    │  └─────────────────────────────────┼───────────┘
//!   │pin │ hard reset / config invalid        ▼
//!   └────┼──────────────────────────────► ConnectingClient ──(clock ok)──► dial
//!        │                                    ▲      │ ConnAck
//!        │                                    │      ▼
//!        └──────────────────────────────── Connected ──► subscribe once
//!                                  disconnect ┘
//! ```

use super::transport::{ErrorTracker, ErrorVerdict, TransportFault};
use tracing::{debug, info, warn};

/// Minimum spacing between TOFU certificate captures.
pub const CERT_FETCH_INTERVAL_MS: u64 = 60_000;

/// Coarse state visible to the rest of the application.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    ConnectingCertFetch,
    ConnectingClient,
    Connected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Disconnected,
    ConnectingCertFetch,
    ConnectingClient {
        dialing: bool,
        time_sync_requested: bool,
    },
    Connected {
        subscribed: bool,
    },
}

/// Environment sampled by the poll context.
#[derive(Clone, Copy, Debug)]
pub struct LinkInputs {
    pub config_valid: bool,
    pub has_pinned_cert: bool,
    pub network_up: bool,
    pub clock_ready: bool,
    pub now_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkAction {
    None,
    FetchCertificate,
    RequestTimeSync,
    StartClient,
    Subscribe,
    /// Stop the network task. `clear_cert` drops the pinned certificate.
    TearDown { clear_cert: bool },
}

#[derive(Debug)]
pub struct Lifecycle {
    phase: Phase,
    errors: ErrorTracker,
    last_cert_fetch_ms: Option<u64>,
    time_synced: bool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            phase: Phase::Disconnected,
            errors: ErrorTracker::new(),
            last_cert_fetch_ms: None,
            time_synced: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        match self.phase {
            Phase::Disconnected => ConnectionState::Disconnected,
            Phase::ConnectingCertFetch => ConnectionState::ConnectingCertFetch,
            Phase::ConnectingClient { .. } => ConnectionState::ConnectingClient,
            Phase::Connected { .. } => ConnectionState::Connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.phase, Phase::Connected { .. })
    }

    pub fn is_subscribed(&self) -> bool {
        matches!(self.phase, Phase::Connected { subscribed: true })
    }

    pub fn time_synced(&self) -> bool {
        self.time_synced
    }

    pub fn errors(&self) -> &ErrorTracker {
        &self.errors
    }

    /// A network task exists and has to be stopped on teardown.
    fn client_running(&self) -> bool {
        matches!(
            self.phase,
            Phase::ConnectingClient { dialing: true, .. } | Phase::Connected { .. }
        )
    }

    fn set_phase(&mut self, next: Phase) {
        if self.phase != next {
            debug!("Lifecycle {:?} -> {:?}", self.phase, next);
            self.phase = next;
        }
    }

    /// One step of the lifecycle. Called at the poll cadence.
    pub fn poll(&mut self, inputs: LinkInputs) -> LinkAction {
        if !inputs.config_valid || !inputs.network_up {
            if self.phase == Phase::Disconnected {
                return LinkAction::None;
            }
            let running = self.client_running();
            if !inputs.config_valid {
                info!("Printer settings incomplete, link stays down");
            } else {
                warn!("Network down, dropping printer link");
            }
            self.set_phase(Phase::Disconnected);
            return if running {
                LinkAction::TearDown { clear_cert: false }
            } else {
                LinkAction::None
            };
        }

        if self.phase == Phase::Disconnected {
            if !inputs.has_pinned_cert {
                return self.maybe_start_cert_fetch(inputs.now_ms);
            }
            self.set_phase(Phase::ConnectingClient {
                dialing: false,
                time_sync_requested: false,
            });
        }

        match self.phase {
            Phase::Disconnected | Phase::ConnectingCertFetch => LinkAction::None,
            Phase::ConnectingClient {
                dialing: false,
                time_sync_requested,
            } => {
                if !inputs.has_pinned_cert {
                    self.set_phase(Phase::Disconnected);
                    return self.maybe_start_cert_fetch(inputs.now_ms);
                }
                if !inputs.clock_ready {
                    if time_sync_requested {
                        return LinkAction::None;
                    }
                    info!("Clock not ready, deferring TLS connect");
                    self.set_phase(Phase::ConnectingClient {
                        dialing: false,
                        time_sync_requested: true,
                    });
                    return LinkAction::RequestTimeSync;
                }
                self.time_synced = true;
                self.set_phase(Phase::ConnectingClient {
                    dialing: true,
                    time_sync_requested,
                });
                LinkAction::StartClient
            }
            Phase::ConnectingClient { dialing: true, .. } => LinkAction::None,
            Phase::Connected { subscribed: false } => {
                self.set_phase(Phase::Connected { subscribed: true });
                LinkAction::Subscribe
            }
            Phase::Connected { subscribed: true } => LinkAction::None,
        }
    }

    fn maybe_start_cert_fetch(&mut self, now_ms: u64) -> LinkAction {
        let due = self
            .last_cert_fetch_ms
            .map_or(true, |last| now_ms.saturating_sub(last) >= CERT_FETCH_INTERVAL_MS);
        if !due {
            return LinkAction::None;
        }
        self.last_cert_fetch_ms = Some(now_ms);
        self.set_phase(Phase::ConnectingCertFetch);
        LinkAction::FetchCertificate
    }

    /// Outcome of a `FetchCertificate` action, after the bundle was saved.
    pub fn on_cert_fetched(&mut self, pinned: bool) {
        if self.phase != Phase::ConnectingCertFetch {
            return;
        }
        if pinned {
            self.set_phase(Phase::ConnectingClient {
                dialing: false,
                time_sync_requested: false,
            });
        } else {
            self.set_phase(Phase::Disconnected);
        }
    }

    /// `StartClient` could not build a client from the pinned certificate.
    pub fn on_client_failed(&mut self) {
        self.set_phase(Phase::Disconnected);
    }

    pub fn on_subscribe_failed(&mut self) {
        if self.phase == (Phase::Connected { subscribed: true }) {
            self.set_phase(Phase::Connected { subscribed: false });
        }
    }

    pub fn on_connected(&mut self) {
        if !matches!(self.phase, Phase::ConnectingClient { dialing: true, .. }) {
            debug!("Ignoring ConnAck in {:?}", self.phase);
            return;
        }
        info!("Printer link connected");
        self.errors.on_connected();
        self.set_phase(Phase::Connected { subscribed: false });
    }

    /// The session dropped; the client reconnects by itself.
    pub fn on_disconnected(&mut self) {
        if self.is_connected() {
            info!("Printer link lost, waiting for reconnect");
            self.set_phase(Phase::ConnectingClient {
                dialing: true,
                time_sync_requested: false,
            });
        }
    }

    pub fn on_transport_error(&mut self, fault: TransportFault, now_ms: u64) -> LinkAction {
        if !self.client_running() {
            return LinkAction::None;
        }
        match self.errors.record(fault, now_ms) {
            ErrorVerdict::HardReset { refetch_cert } => {
                self.set_phase(Phase::Disconnected);
                LinkAction::TearDown {
                    clear_cert: refetch_cert,
                }
            }
            ErrorVerdict::Ignore | ErrorVerdict::Suppressed => LinkAction::None,
        }
    }

    /// Settings changed: start over. Returns the teardown to run, if any.
    pub fn restart(&mut self, identity_changed: bool) -> LinkAction {
        let running = self.client_running();
        if identity_changed {
            info!("Printer identity changed, certificate will be fetched again");
        }
        self.set_phase(Phase::Disconnected);
        if running {
            LinkAction::TearDown { clear_cert: false }
        } else {
            LinkAction::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(now_ms: u64) -> LinkInputs {
        LinkInputs {
            config_valid: true,
            has_pinned_cert: true,
            network_up: true,
            clock_ready: true,
            now_ms,
        }
    }

    fn connected_lifecycle() -> Lifecycle {
        let mut lc = Lifecycle::new();
        assert_eq!(lc.poll(ready(0)), LinkAction::StartClient);
        lc.on_connected();
        assert_eq!(lc.poll(ready(10)), LinkAction::Subscribe);
        lc
    }

    #[test]
    fn test_invalid_config_takes_no_action() {
        let mut lc = Lifecycle::new();
        let inputs = LinkInputs {
            config_valid: false,
            ..ready(0)
        };
        for t in 0..5 {
            assert_eq!(lc.poll(LinkInputs { now_ms: t * 1_000, ..inputs }), LinkAction::None);
        }
        assert_eq!(lc.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_cert_fetch_is_rate_limited() {
        let mut lc = Lifecycle::new();
        let no_pin = LinkInputs {
            has_pinned_cert: false,
            ..ready(1_000)
        };
        assert_eq!(lc.poll(no_pin), LinkAction::FetchCertificate);
        assert_eq!(lc.state(), ConnectionState::ConnectingCertFetch);
        assert_eq!(lc.poll(no_pin), LinkAction::None);

        lc.on_cert_fetched(false);
        assert_eq!(lc.state(), ConnectionState::Disconnected);
        assert_eq!(lc.poll(LinkInputs { now_ms: 30_000, ..no_pin }), LinkAction::None);
        assert_eq!(lc.poll(LinkInputs { now_ms: 60_999, ..no_pin }), LinkAction::None);
        assert_eq!(
            lc.poll(LinkInputs { now_ms: 61_000, ..no_pin }),
            LinkAction::FetchCertificate
        );
    }

    #[test]
    fn test_fetched_cert_leads_to_client_start() {
        let mut lc = Lifecycle::new();
        let no_pin = LinkInputs {
            has_pinned_cert: false,
            ..ready(0)
        };
        assert_eq!(lc.poll(no_pin), LinkAction::FetchCertificate);
        lc.on_cert_fetched(true);
        assert_eq!(lc.state(), ConnectionState::ConnectingClient);
        assert_eq!(lc.poll(ready(100)), LinkAction::StartClient);
        assert_eq!(lc.poll(ready(200)), LinkAction::None);
    }

    #[test]
    fn test_clock_gate_requests_sync_once() {
        let mut lc = Lifecycle::new();
        let no_clock = LinkInputs {
            clock_ready: false,
            ..ready(0)
        };
        assert_eq!(lc.poll(no_clock), LinkAction::RequestTimeSync);
        assert_eq!(lc.poll(no_clock), LinkAction::None);
        assert_eq!(lc.poll(no_clock), LinkAction::None);
        assert!(!lc.time_synced());

        assert_eq!(lc.poll(ready(5_000)), LinkAction::StartClient);
        assert!(lc.time_synced());
    }

    #[test]
    fn test_connect_subscribes_once() {
        let mut lc = connected_lifecycle();
        assert_eq!(lc.state(), ConnectionState::Connected);
        assert!(lc.is_subscribed());
        assert_eq!(lc.poll(ready(20)), LinkAction::None);
    }

    #[test]
    fn test_failed_subscribe_is_retried() {
        let mut lc = connected_lifecycle();
        lc.on_subscribe_failed();
        assert_eq!(lc.poll(ready(20)), LinkAction::Subscribe);
    }

    #[test]
    fn test_reconnect_resubscribes() {
        let mut lc = connected_lifecycle();
        lc.on_disconnected();
        assert_eq!(lc.state(), ConnectionState::ConnectingClient);
        assert_eq!(lc.poll(ready(100)), LinkAction::None);

        lc.on_connected();
        assert_eq!(lc.poll(ready(200)), LinkAction::Subscribe);
    }

    #[test]
    fn test_tls_error_refetch_waits_for_fetch_interval() {
        let mut lc = Lifecycle::new();
        let no_pin = LinkInputs {
            has_pinned_cert: false,
            ..ready(0)
        };
        assert_eq!(lc.poll(no_pin), LinkAction::FetchCertificate);
        lc.on_cert_fetched(true);
        assert_eq!(lc.poll(ready(1_000)), LinkAction::StartClient);
        lc.on_connected();

        assert_eq!(
            lc.on_transport_error(TransportFault::Tls, 5_000),
            LinkAction::TearDown { clear_cert: true }
        );
        assert_eq!(lc.state(), ConnectionState::Disconnected);

        assert_eq!(lc.poll(LinkInputs { now_ms: 5_050, ..no_pin }), LinkAction::None);
        assert_eq!(lc.poll(LinkInputs { now_ms: 59_999, ..no_pin }), LinkAction::None);
        assert_eq!(
            lc.poll(LinkInputs { now_ms: 60_000, ..no_pin }),
            LinkAction::FetchCertificate
        );
    }

    #[test]
    fn test_identity_change_keeps_fetch_interval() {
        let mut lc = Lifecycle::new();
        let no_pin = LinkInputs {
            has_pinned_cert: false,
            ..ready(0)
        };
        assert_eq!(lc.poll(no_pin), LinkAction::FetchCertificate);
        lc.on_cert_fetched(true);
        assert_eq!(lc.poll(ready(1_000)), LinkAction::StartClient);
        lc.on_connected();

        assert_eq!(lc.restart(true), LinkAction::TearDown { clear_cert: false });
        assert_eq!(lc.poll(LinkInputs { now_ms: 2_000, ..no_pin }), LinkAction::None);
        assert_eq!(lc.state(), ConnectionState::Disconnected);
        assert_eq!(
            lc.poll(LinkInputs { now_ms: 60_000, ..no_pin }),
            LinkAction::FetchCertificate
        );
    }

    #[test]
    fn test_transient_errors_keep_session() {
        let mut lc = connected_lifecycle();
        assert_eq!(lc.on_transport_error(TransportFault::Transient, 1_000), LinkAction::None);
        assert_eq!(lc.on_transport_error(TransportFault::Transient, 30_000), LinkAction::None);
        assert!(lc.is_connected());
    }

    #[test]
    fn test_error_burst_resets_without_refetch() {
        let mut lc = connected_lifecycle();
        lc.on_transport_error(TransportFault::Other, 1_000);
        lc.on_transport_error(TransportFault::Other, 2_000);
        assert_eq!(
            lc.on_transport_error(TransportFault::Other, 3_000),
            LinkAction::TearDown { clear_cert: false }
        );
        // Pin kept, so the next poll dials again.
        assert_eq!(lc.poll(ready(3_050)), LinkAction::StartClient);
    }

    #[test]
    fn test_network_loss_tears_down() {
        let mut lc = connected_lifecycle();
        let offline = LinkInputs {
            network_up: false,
            ..ready(100)
        };
        assert_eq!(lc.poll(offline), LinkAction::TearDown { clear_cert: false });
        assert_eq!(lc.poll(offline), LinkAction::None);
        assert_eq!(lc.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_restart_after_settings_change() {
        let mut lc = connected_lifecycle();
        assert_eq!(lc.restart(true), LinkAction::TearDown { clear_cert: false });
        assert_eq!(lc.restart(true), LinkAction::None);
        let no_pin = LinkInputs {
            has_pinned_cert: false,
            ..ready(50)
        };
        assert_eq!(lc.poll(no_pin), LinkAction::FetchCertificate);
    }
}
