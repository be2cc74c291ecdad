use crate::config::{LinkSettings, PrinterSettings};
use rumqttc::tokio_rustls::rustls::ClientConfig;
use rumqttc::{MqttOptions, TlsConfiguration, Transport};
use std::sync::Arc;
use std::time::Duration;

pub const MQTT_PORT: u16 = 8883;
pub const MQTT_USER: &str = "bblp";
pub const CLIENT_ID_PREFIX: &str = "beaconlink";
pub const KEEP_ALIVE: Duration = Duration::from_secs(30);
/// Packet ceiling handed to rumqttc. Reports above `max_message_bytes` but
/// below this still reach the reassembler, which drops them without
/// touching the session.
pub const TRANSPORT_PACKET_LIMIT: usize = 1024 * 1024;
/// Socket-level bound on the TLS handshake and the TOFU round-trip.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything needed to reach one printer, derived from settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub serial: String,
    pub access_code: String,
    pub client_id: String,
    pub report_topic: String,
    pub request_topic: String,
    pub max_message_bytes: usize,
    pub keep_alive: Duration,
}

impl MqttConfig {
    /// `None` while IP, serial or access code is missing.
    pub fn from_settings(
        printer: &PrinterSettings,
        link: &LinkSettings,
        host_id: u64,
    ) -> Option<Self> {
        if !printer.is_complete() {
            return None;
        }
        let serial = printer.serial.trim().to_string();
        Some(Self {
            host: printer.ip.trim().to_string(),
            port: MQTT_PORT,
            access_code: printer.access_code.trim().to_string(),
            client_id: client_id(host_id),
            report_topic: report_topic(&serial),
            request_topic: request_topic(&serial),
            serial,
            max_message_bytes: link.max_message_bytes,
            keep_alive: KEEP_ALIVE,
        })
    }

    pub fn broker_url(&self) -> String {
        format!("mqtts://{}:{}", self.host, self.port)
    }

    /// Always above `max_message_bytes` plus MQTT framing.
    pub fn incoming_packet_limit(&self) -> usize {
        TRANSPORT_PACKET_LIMIT.max(self.max_message_bytes.saturating_mul(2))
    }

    /// rumqttc options for a TLS session trusting `tls`.
    pub fn mqtt_options(&self, tls: Arc<ClientConfig>) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options
            .set_credentials(MQTT_USER, self.access_code.clone())
            .set_keep_alive(self.keep_alive)
            .set_clean_session(true)
            .set_max_packet_size(self.incoming_packet_limit(), self.max_message_bytes)
            .set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(tls)));
        options
    }
}

pub fn report_topic(serial: &str) -> String {
    format!("device/{}/report", serial)
}

pub fn request_topic(serial: &str) -> String {
    format!("device/{}/request", serial)
}

pub fn client_id(host_id: u64) -> String {
    format!("{}-{:x}", CLIENT_ID_PREFIX, host_id)
}
