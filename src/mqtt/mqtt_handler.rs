use std::sync::Arc;
use std::time::Duration;

use rumqttc::tokio_rustls::rustls::ClientConfig;
use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use serde_json::json;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::cert_fetch::fetch_certificate;
use super::config::{MqttConfig, HANDSHAKE_TIMEOUT};
use super::lifecycle::{ConnectionState, Lifecycle, LinkAction, LinkInputs};
use super::message_manager::{
    report_mailbox, LinkStats, LinkStatsSnapshot, Reassembler, ReportInbox, ReportMailbox,
};
use super::tls::pinned_client_config;
use super::transport::TransportFault;
use crate::config::{LinkSettings, Settings};
use crate::hms::IgnoreList;
use crate::persistence::{SettingsChange, SettingsError, SettingsStore};
use crate::platform::{clock_is_plausible, MonotonicClock, Platform};
use crate::printer_state::PrinterState;

const EVENT_CHANNEL_CAPACITY: usize = 16;
const REQUEST_CHANNEL_CAPACITY: usize = 10;
/// Pause between reconnect attempts after a transport error.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);
const HEARTBEAT_INTERVAL_MS: u64 = 10_000;

/// What the network task reports back to the poll context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Disconnected,
    TransportError(TransportFault),
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Printer link is not connected")]
    NotConnected,

    #[error("Failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("MQTT client rejected request: {0}")]
    Client(#[from] rumqttc::ClientError),
}

#[derive(Clone, Debug, Default)]
pub struct MQTTStatus {
    pub connection_state: ConnectionState,
    pub subscribed: bool,
    pub stats: LinkStatsSnapshot,
    pub errors_in_window: usize,
    pub last_hard_reset_ms: Option<u64>,
    pub messages_sent: u64,
}

/// Owns the rumqttc event loop. Runs as its own tokio task and never waits on
/// the poll context: reports go through the mailbox, events through `try_send`.
struct NetworkTask {
    eventloop: EventLoop,
    reassembler: Reassembler,
    mailbox: Arc<ReportMailbox>,
    events: mpsc::Sender<LinkEvent>,
    clock: MonotonicClock,
    connected: bool,
}

impl NetworkTask {
    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        self.connected = true;
                        self.emit(LinkEvent::Connected);
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let now = self.clock.now_ms();
                        if let Some(report) =
                            self.reassembler.on_message(&publish.topic, &publish.payload, now)
                        {
                            self.mailbox.publish(report);
                        }
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => debug!("Subscription acknowledged"),
                    Ok(Event::Incoming(Packet::Disconnect)) => self.lost(),
                    Ok(_) => {}
                    Err(e) => {
                        let fault = TransportFault::classify(&e);
                        warn!("MQTT transport error ({:?}): {}", fault, e);
                        self.lost();
                        self.emit(LinkEvent::TransportError(fault));
                        tokio::select! {
                            _ = &mut shutdown => break,
                            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                        }
                    }
                },
            }
        }
        debug!("Network task stopped");
    }

    fn lost(&mut self) {
        self.reassembler.reset();
        if self.connected {
            self.connected = false;
            self.emit(LinkEvent::Disconnected);
        }
    }

    fn emit(&self, event: LinkEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!("Dropping link event: {}", e);
        }
    }
}

/// Client half plus the running network task.
pub struct NetworkHandle {
    client: AsyncClient,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl NetworkHandle {
    pub fn spawn(
        config: &MqttConfig,
        tls: Arc<ClientConfig>,
        mailbox: Arc<ReportMailbox>,
        stats: Arc<LinkStats>,
        events: mpsc::Sender<LinkEvent>,
        clock: MonotonicClock,
    ) -> Self {
        let (client, eventloop) =
            AsyncClient::new(config.mqtt_options(tls), REQUEST_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = NetworkTask {
            eventloop,
            reassembler: Reassembler::new(
                config.report_topic.clone(),
                config.max_message_bytes,
                stats,
            ),
            mailbox,
            events,
            clock,
            connected: false,
        };
        let task = tokio::spawn(task.run(shutdown_rx));
        Self {
            client,
            shutdown_tx: Some(shutdown_tx),
            task,
        }
    }

    pub fn client(&self) -> &AsyncClient {
        &self.client
    }

    pub async fn shutdown(mut self) {
        let _ = self.client.try_disconnect();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut self.task).await.is_err() {
            warn!("Network task did not stop in time, aborting");
            self.task.abort();
        }
    }
}

/// The "pushall" request that makes the printer send a complete report.
pub fn full_status_request(sequence_id: u64) -> serde_json::Value {
    json!({
        "pushing": {
            "sequence_id": sequence_id.to_string(),
            "command": "pushall",
        }
    })
}

/// The printer link as seen by the poll context.
///
/// Drives the [`Lifecycle`], runs its actions (TOFU fetch, client start,
/// subscribe, teardown), drains the report mailbox into [`PrinterState`] and
/// publishes requests to the printer.
pub struct MqttHandler<P: Platform> {
    platform: P,
    config: Option<MqttConfig>,
    link: LinkSettings,
    lifecycle: Lifecycle,
    printer: PrinterState,
    network: Option<NetworkHandle>,
    mailbox: Arc<ReportMailbox>,
    inbox: ReportInbox,
    stats: Arc<LinkStats>,
    events_tx: mpsc::Sender<LinkEvent>,
    events_rx: mpsc::Receiver<LinkEvent>,
    status_tx: watch::Sender<MQTTStatus>,
    last_heartbeat_ms: u64,
    sequence_id: u64,
    messages_sent: u64,
}

impl<P: Platform> MqttHandler<P> {
    pub fn new(platform: P, settings: &Settings) -> Self {
        let config = MqttConfig::from_settings(&settings.printer, &settings.link, platform.host_id());
        match &config {
            Some(c) => info!("Printer link configured for {} ({})", c.broker_url(), c.serial),
            None => warn!("Printer IP, serial or access code missing, link stays down"),
        }

        let mut printer =
            PrinterState::new(settings.link.hms_ttl_ms, settings.link.status_log_interval_ms);
        printer.set_ignore_list(IgnoreList::parse(&settings.printer.hms_ignore));

        let (mailbox, inbox) = report_mailbox();
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (status_tx, _) = watch::channel(MQTTStatus::default());

        Self {
            platform,
            config,
            link: settings.link.clone(),
            lifecycle: Lifecycle::new(),
            printer,
            network: None,
            mailbox: Arc::new(mailbox),
            inbox,
            stats: Arc::new(LinkStats::default()),
            events_tx,
            events_rx,
            status_tx,
            last_heartbeat_ms: 0,
            sequence_id: 0,
            messages_sent: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    pub fn printer(&self) -> &PrinterState {
        &self.printer
    }

    pub fn printer_mut(&mut self) -> &mut PrinterState {
        &mut self.printer
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn config(&self) -> Option<&MqttConfig> {
        self.config.as_ref()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<MQTTStatus> {
        self.status_tx.subscribe()
    }

    pub fn link_stats(&self) -> LinkStatsSnapshot {
        self.stats.snapshot()
    }

    /// One pass of the poll context.
    pub async fn tick(&mut self, store: &mut SettingsStore) {
        let now = self.platform.monotonic_ms();

        self.drain_events(store, now).await;

        let inputs = LinkInputs {
            config_valid: self.config.is_some(),
            has_pinned_cert: store.settings().tls.has_pin(),
            network_up: self.platform.network_up(),
            clock_ready: clock_is_plausible(self.platform.wall_clock()),
            now_ms: now,
        };
        let action = self.lifecycle.poll(inputs);
        self.execute(action, store).await;

        if let Some(report) = self.inbox.try_take() {
            self.printer.apply_parsed_report(&report, now);
        }
        self.printer.expire(now);

        self.heartbeat(now);
        self.publish_status();
    }

    async fn drain_events(&mut self, store: &mut SettingsStore, now: u64) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                LinkEvent::Connected => self.lifecycle.on_connected(),
                LinkEvent::Disconnected => self.lifecycle.on_disconnected(),
                LinkEvent::TransportError(fault) => {
                    let action = self.lifecycle.on_transport_error(fault, now);
                    self.execute(action, store).await;
                }
            }
        }
    }

    async fn execute(&mut self, action: LinkAction, store: &mut SettingsStore) {
        match action {
            LinkAction::None => {}
            LinkAction::RequestTimeSync => self.platform.request_time_sync(),
            LinkAction::FetchCertificate => self.fetch_and_pin(store).await,
            LinkAction::StartClient => self.start_client(store).await,
            LinkAction::Subscribe => self.subscribe(),
            LinkAction::TearDown { clear_cert } => {
                self.stop_network().await;
                if clear_cert {
                    if let Err(e) = store.clear_pinned_cert().await {
                        error!("Failed to clear pinned certificate: {}", e);
                    }
                }
            }
        }
    }

    async fn fetch_and_pin(&mut self, store: &mut SettingsStore) {
        let Some(config) = self.config.as_ref() else {
            self.lifecycle.on_cert_fetched(false);
            return;
        };
        info!("TOFU: fetching certificate from {}", config.broker_url());

        let pinned = match fetch_certificate(&config.host, config.port, HANDSHAKE_TIMEOUT).await {
            Ok(bundle) => match store.store_pinned_cert(&bundle.pem).await {
                Ok(()) => true,
                Err(e) => {
                    error!("TOFU: failed to save certificate: {}", e);
                    false
                }
            },
            Err(e) => {
                warn!("TOFU: certificate fetch failed: {}", e);
                false
            }
        };
        self.lifecycle.on_cert_fetched(pinned);
    }

    async fn start_client(&mut self, store: &mut SettingsStore) {
        let Some(config) = self.config.as_ref() else {
            self.lifecycle.on_client_failed();
            return;
        };
        match pinned_client_config(&store.settings().tls.pinned_cert) {
            Ok(tls) => {
                info!("Connecting to {} as {}", config.broker_url(), config.client_id);
                self.inbox.try_take();
                self.network = Some(NetworkHandle::spawn(
                    config,
                    tls,
                    self.mailbox.clone(),
                    self.stats.clone(),
                    self.events_tx.clone(),
                    self.platform.clock(),
                ));
            }
            Err(e) => {
                warn!("Pinned certificate unusable, dropping it: {}", e);
                if let Err(e) = store.clear_pinned_cert().await {
                    error!("Failed to clear pinned certificate: {}", e);
                }
                self.lifecycle.on_client_failed();
            }
        }
    }

    fn subscribe(&mut self) {
        let (Some(network), Some(config)) = (self.network.as_ref(), self.config.as_ref()) else {
            self.lifecycle.on_subscribe_failed();
            return;
        };
        match network
            .client()
            .try_subscribe(config.report_topic.clone(), QoS::AtMostOnce)
        {
            Ok(()) => info!("Subscribed to {}", config.report_topic),
            Err(e) => {
                warn!("Subscribe to {} failed: {}", config.report_topic, e);
                self.lifecycle.on_subscribe_failed();
                return;
            }
        }
        if self.link.request_full_status_on_connect {
            if let Err(e) = self.request_full_status() {
                warn!("Full status request failed: {}", e);
            }
        }
    }

    async fn stop_network(&mut self) {
        if let Some(network) = self.network.take() {
            info!("Stopping printer link");
            network.shutdown().await;
        }
        // Events from the stopped task no longer apply.
        while self.events_rx.try_recv().is_ok() {}
    }

    /// Sends a JSON request document to the printer's request topic.
    pub fn publish_request(&mut self, request: &serde_json::Value) -> Result<(), PublishError> {
        if !self.lifecycle.is_connected() {
            return Err(PublishError::NotConnected);
        }
        let (Some(network), Some(config)) = (self.network.as_ref(), self.config.as_ref()) else {
            return Err(PublishError::NotConnected);
        };
        let payload = serde_json::to_vec(request)?;
        let len = payload.len();
        network
            .client()
            .try_publish(config.request_topic.clone(), QoS::AtMostOnce, false, payload)?;
        self.messages_sent += 1;
        debug!("Published {} bytes to {}", len, config.request_topic);
        Ok(())
    }

    /// Asks the printer to send a complete status report.
    pub fn request_full_status(&mut self) -> Result<(), PublishError> {
        self.sequence_id += 1;
        let request = full_status_request(self.sequence_id);
        self.publish_request(&request)
    }

    /// Re-reads the settings file and restarts the link if the endpoint moved.
    pub async fn reload_from_settings(
        &mut self,
        store: &mut SettingsStore,
    ) -> Result<SettingsChange, SettingsError> {
        let change = store.reload().await?;
        if change.changed {
            let settings = store.settings().clone();
            self.apply_settings(&settings, change.identity_changed).await;
        }
        Ok(change)
    }

    async fn apply_settings(&mut self, settings: &Settings, identity_changed: bool) {
        self.printer
            .set_ignore_list(IgnoreList::parse(&settings.printer.hms_ignore));
        self.printer.set_hms_ttl_ms(settings.link.hms_ttl_ms);
        self.printer
            .set_status_log_interval_ms(settings.link.status_log_interval_ms);
        self.link = settings.link.clone();

        let config =
            MqttConfig::from_settings(&settings.printer, &settings.link, self.platform.host_id());
        if config == self.config && !identity_changed {
            return;
        }
        info!("Printer endpoint changed, restarting link");
        self.config = config;
        if let LinkAction::TearDown { .. } = self.lifecycle.restart(identity_changed) {
            self.stop_network().await;
        }
    }

    pub async fn shutdown(&mut self) {
        self.stop_network().await;
    }

    fn heartbeat(&mut self, now: u64) {
        if !self.lifecycle.is_connected()
            || now.saturating_sub(self.last_heartbeat_ms) < HEARTBEAT_INTERVAL_MS
        {
            return;
        }
        self.last_heartbeat_ms = now;
        let stats = self.stats.snapshot();
        let age = if stats.messages == 0 {
            "never".to_string()
        } else {
            format!("{}ms", now.saturating_sub(stats.last_message_ms))
        };
        info!(
            "Link ok subscribed={} last_msg_age={} last_len={} msgs={} parse_failures={} rejected={}",
            self.lifecycle.is_subscribed(),
            age,
            stats.last_message_len,
            stats.messages,
            stats.parse_failures,
            stats.rejected_fragments
        );
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(MQTTStatus {
            connection_state: self.lifecycle.state(),
            subscribed: self.lifecycle.is_subscribed(),
            stats: self.stats.snapshot(),
            errors_in_window: self.lifecycle.errors().errors_in_window(),
            last_hard_reset_ms: self.lifecycle.errors().last_hard_reset_ms(),
            messages_sent: self.messages_sent,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrinterSettings;
    use crate::hms::Severity;
    use crate::mqtt::test_support::{der, serve_once, CA_PEM, LEAF_PEM};
    use crate::telemetry::{FaultEntry, ParsedReport};
    use chrono::{DateTime, TimeZone, Utc};

    #[derive(Debug)]
    struct FakePlatform {
        clock: MonotonicClock,
        wall: DateTime<Utc>,
        network_up: bool,
        sync_requests: usize,
    }

    impl FakePlatform {
        fn new() -> Self {
            Self {
                clock: MonotonicClock::new(),
                wall: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
                network_up: true,
                sync_requests: 0,
            }
        }
    }

    impl Platform for FakePlatform {
        fn network_up(&self) -> bool {
            self.network_up
        }

        fn clock(&self) -> MonotonicClock {
            self.clock
        }

        fn wall_clock(&self) -> DateTime<Utc> {
            self.wall
        }

        fn request_time_sync(&mut self) {
            self.sync_requests += 1;
        }

        fn host_id(&self) -> u64 {
            0xbeac
        }
    }

    fn printer(ip: &str) -> PrinterSettings {
        PrinterSettings {
            ip: ip.into(),
            serial: "01P00A123456789".into(),
            access_code: "12345678".into(),
            hms_ignore: "HMS_0001_0002_0003_0004".into(),
        }
    }

    async fn store_with(printer: PrinterSettings, pin: Option<&str>) -> (tempfile::TempDir, SettingsStore) {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SettingsStore::load_or_create(dir.path().join("settings.toml"))
            .await
            .unwrap();
        store.update_printer(printer).await.unwrap();
        if let Some(pem) = pin {
            store.store_pinned_cert(pem).await.unwrap();
        }
        (dir, store)
    }

    #[tokio::test]
    async fn test_unconfigured_link_stays_down() {
        let (_dir, mut store) = store_with(PrinterSettings::default(), None).await;
        let mut handler = MqttHandler::new(FakePlatform::new(), store.settings());
        assert!(handler.config().is_none());

        for _ in 0..3 {
            handler.tick(&mut store).await;
        }
        assert_eq!(handler.state(), ConnectionState::Disconnected);
        assert!(handler.network.is_none());
    }

    #[tokio::test]
    async fn test_publish_refused_while_disconnected() {
        let (_dir, store) = store_with(printer("10.0.0.9"), None).await;
        let mut handler = MqttHandler::new(FakePlatform::new(), store.settings());
        let err = handler.publish_request(&json!({"print": {"command": "pause"}}));
        assert!(matches!(err, Err(PublishError::NotConnected)));
    }

    #[tokio::test]
    async fn test_clock_gate_requests_sync() {
        let (_dir, mut store) = store_with(printer("10.0.0.9"), Some(CA_PEM)).await;
        let mut platform = FakePlatform::new();
        platform.wall = Utc.with_ymd_and_hms(1970, 1, 1, 0, 1, 0).unwrap();
        let mut handler = MqttHandler::new(platform, store.settings());

        handler.tick(&mut store).await;
        handler.tick(&mut store).await;
        assert_eq!(handler.state(), ConnectionState::ConnectingClient);
        assert_eq!(handler.platform().sync_requests, 1);
        assert!(handler.network.is_none());
    }

    #[tokio::test]
    async fn test_tofu_fetch_pins_certificate() {
        let port = serve_once(vec![der(LEAF_PEM), der(CA_PEM)]).await;
        let (_dir, mut store) = store_with(printer("127.0.0.1"), None).await;
        let mut handler = MqttHandler::new(FakePlatform::new(), store.settings());
        if let Some(config) = handler.config.as_mut() {
            config.port = port;
        }

        handler.tick(&mut store).await;
        assert!(store.settings().tls.has_pin());
        assert_eq!(handler.state(), ConnectionState::ConnectingClient);
        handler.shutdown().await;
    }

    /// Client whose requests queue up without a broker behind them.
    fn idle_network(config: &MqttConfig) -> NetworkHandle {
        let tls = pinned_client_config(CA_PEM).unwrap();
        let (client, eventloop) =
            AsyncClient::new(config.mqtt_options(tls), REQUEST_CHANNEL_CAPACITY);
        let task = tokio::spawn(async move {
            let _eventloop = eventloop;
            std::future::pending::<()>().await
        });
        NetworkHandle {
            client,
            shutdown_tx: None,
            task,
        }
    }

    fn connect(handler: &mut MqttHandler<FakePlatform>) {
        let inputs = LinkInputs {
            config_valid: true,
            has_pinned_cert: true,
            network_up: true,
            clock_ready: true,
            now_ms: 0,
        };
        assert_eq!(handler.lifecycle.poll(inputs), LinkAction::StartClient);
        let network = idle_network(handler.config().unwrap());
        handler.network = Some(network);
        handler.lifecycle.on_connected();
        assert_eq!(
            handler.lifecycle.poll(LinkInputs { now_ms: 10, ..inputs }),
            LinkAction::Subscribe
        );
    }

    #[test]
    fn test_full_status_request_document() {
        let request = full_status_request(7);
        assert_eq!(
            request,
            json!({"pushing": {"sequence_id": "7", "command": "pushall"}})
        );
        assert!(request["pushing"]["sequence_id"].is_string());
    }

    #[tokio::test]
    async fn test_subscribe_requests_full_status() {
        let (_dir, mut store) = store_with(printer("10.0.0.9"), Some(CA_PEM)).await;
        let mut handler = MqttHandler::new(FakePlatform::new(), store.settings());
        connect(&mut handler);

        handler.execute(LinkAction::Subscribe, &mut store).await;
        assert!(handler.lifecycle.is_subscribed());
        assert_eq!(handler.messages_sent, 1);
        assert_eq!(handler.sequence_id, 1);

        handler.request_full_status().unwrap();
        assert_eq!(handler.sequence_id, 2);
        assert_eq!(handler.messages_sent, 2);
    }

    #[tokio::test]
    async fn test_full_status_on_connect_can_be_disabled() {
        let (_dir, mut store) = store_with(printer("10.0.0.9"), Some(CA_PEM)).await;
        let mut settings = store.settings().clone();
        settings.link.request_full_status_on_connect = false;
        let mut handler = MqttHandler::new(FakePlatform::new(), &settings);
        connect(&mut handler);

        handler.execute(LinkAction::Subscribe, &mut store).await;
        assert!(handler.lifecycle.is_subscribed());
        assert_eq!(handler.messages_sent, 0);
    }

    #[tokio::test]
    async fn test_reports_are_applied_and_filtered() {
        let (_dir, mut store) = store_with(printer("10.0.0.9"), None).await;
        let mut platform = FakePlatform::new();
        platform.network_up = false;
        let mut handler = MqttHandler::new(platform, store.settings());

        let mut report = ParsedReport {
            print_progress: Some(55),
            hms_present: true,
            ..Default::default()
        };
        report.hms.push(FaultEntry { attr: 0x0001_0002, code: 0x0003_0004 }).unwrap();
        report.hms.push(FaultEntry { attr: 0x0300_1200, code: 0x0002_0001 }).unwrap();
        handler.mailbox.publish(report);

        handler.tick(&mut store).await;
        assert_eq!(handler.printer().status().print_progress, 55);
        assert_eq!(handler.printer().active_fault_count(), 1);
        assert_eq!(handler.printer().top_severity(), Severity::Error);
        assert_eq!(handler.printer().reports_applied(), 1);

        handler.tick(&mut store).await;
        assert_eq!(handler.printer().reports_applied(), 1);
    }

    #[tokio::test]
    async fn test_reload_restarts_on_identity_change() {
        let (_dir, mut store) = store_with(printer("10.0.0.9"), Some(CA_PEM)).await;
        let mut handler = MqttHandler::new(FakePlatform::new(), store.settings());

        let mut edited = store.settings().clone();
        edited.printer.ip = "10.0.0.10".into();
        edited.printer.hms_ignore = String::new();
        tokio::fs::write(store.path(), toml::to_string_pretty(&edited).unwrap())
            .await
            .unwrap();

        let change = handler.reload_from_settings(&mut store).await.unwrap();
        assert!(change.identity_changed);
        assert!(!store.settings().tls.has_pin());
        assert_eq!(handler.config().unwrap().host, "10.0.0.10");
        assert!(handler.printer().ignore_list().is_empty());
        assert_eq!(handler.state(), ConnectionState::Disconnected);
    }
}
