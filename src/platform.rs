//! Collaborator boundary between the printer link and the host it runs on.
//!
//! The link needs four things from its surroundings: whether the network is
//! usable, a monotonic millisecond clock, the wall clock (certificate validity
//! depends on it) and a way to ask for a clock sync. Keeping them behind a
//! trait lets the lifecycle run unchanged against a fake in tests.

use chrono::{DateTime, Datelike, Utc};
use std::time::Instant;
use tracing::{debug, info};

/// Certificates issued to printers are never older than this, so a wall
/// clock before it has not been set yet.
pub const MIN_PLAUSIBLE_YEAR: i32 = 2022;

/// Millisecond clock that can be copied into other tasks.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

pub trait Platform: Send {
    fn network_up(&self) -> bool;

    /// Shared with the network task so both contexts agree on time.
    fn clock(&self) -> MonotonicClock;

    fn monotonic_ms(&self) -> u64 {
        self.clock().now_ms()
    }

    fn wall_clock(&self) -> DateTime<Utc>;

    /// Fire-and-forget request to synchronise the wall clock.
    fn request_time_sync(&mut self);

    /// Stable identifier of this host, used in the MQTT client id.
    fn host_id(&self) -> u64;
}

pub fn clock_is_plausible(now: DateTime<Utc>) -> bool {
    now.year() >= MIN_PLAUSIBLE_YEAR
}

/// Platform backed by the operating system.
///
/// The OS owns NTP, so a sync request is only logged. Reachability is left to
/// the socket layer: the host is assumed online and connection errors surface
/// through the transport.
#[derive(Debug)]
pub struct HostPlatform {
    clock: MonotonicClock,
    host_id: u64,
}

impl HostPlatform {
    pub fn new() -> Self {
        let host_id = read_machine_id().unwrap_or_else(|| u64::from(std::process::id()));
        debug!("Host id {:012x}", host_id);
        Self {
            clock: MonotonicClock::new(),
            host_id,
        }
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for HostPlatform {
    fn network_up(&self) -> bool {
        true
    }

    fn clock(&self) -> MonotonicClock {
        self.clock
    }

    fn wall_clock(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn request_time_sync(&mut self) {
        info!("Wall clock not plausible yet, waiting for the system to sync time");
    }

    fn host_id(&self) -> u64 {
        self.host_id
    }
}

fn read_machine_id() -> Option<u64> {
    let raw = std::fs::read_to_string("/etc/machine-id").ok()?;
    parse_machine_id(&raw)
}

/// First 48 bits of the machine id, matching the width of a MAC address.
fn parse_machine_id(raw: &str) -> Option<u64> {
    let hex = raw.trim().get(..12)?;
    u64::from_str_radix(hex, 16).ok()
}
