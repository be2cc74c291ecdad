//! # Printer MQTT Link
//!
//! Keeps a TLS MQTT session to one printer on the local network, pins the
//! printer's certificate on first contact and hands every status report to
//! the poll context.
//!
//! ## Why This Module Exists
//!
//! The printer runs its own broker on port 8883 behind a certificate from a
//! private CA, issued to its serial number rather than its IP. A plain MQTT
//! client can neither verify it nor recover cleanly when the printer reboots,
//! changes address or swaps its certificate. This module wraps rumqttc with
//! the trust handling and recovery policy the printer needs.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - endpoint, topics and MqttOptions from settings
//! ├── cert_fetch.rs       - TOFU certificate capture (statum machine)
//! ├── tls.rs              - rustls verifiers for capture and pinned sessions
//! ├── lifecycle.rs        - connection FSM, returns actions to execute
//! ├── transport.rs        - error classification and hard-reset backoff
//! ├── message_manager.rs  - reassembly, parsing, single-slot report mailbox
//! └── mqtt_handler.rs     - poll-context driver and network task
//! ```
//!
//! ## Contexts
//!
//! Two tasks cooperate. The network task owns the rumqttc event loop and
//! parses every report as it arrives; the poll context runs the lifecycle,
//! applies the newest report and publishes requests. They share nothing but
//! the report mailbox, an event channel and atomic counters.

pub mod cert_fetch;
pub mod config;
pub mod lifecycle;
pub mod message_manager;
pub mod mqtt_handler;
pub mod tls;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;
