//! Trust-on-first-use certificate capture.
//!
//! Opens a throwaway TLS connection to the printer's MQTT port with
//! verification disabled, keeps the presented chain and turns it into the
//! PEM bundle that every later session is pinned to.
//!
//! # State Machine
//!
//! ```text
//! Dialing ──handshake()──► Handshaken(PeerChain) ──encode()──► Encoded(PemBundle)
//! ```
//!
//! CA certificates from the chain are preferred. When the printer sends none
//! marked as CA, the leaf itself is pinned instead.

use super::tls::capture_client_config;
use pem::{EncodeConfig, LineEnding, Pem};
use rumqttc::tokio_rustls::rustls::pki_types::{CertificateDer, ServerName};
use rumqttc::tokio_rustls::TlsConnector;
use statum::{machine, state};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum CertFetchError {
    #[error("Invalid printer address: {0}")]
    InvalidHost(String),

    #[error("Failed to connect: {0}")]
    Connect(#[source] std::io::Error),

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] std::io::Error),

    #[error("No answer within {0:?}")]
    Timeout(Duration),

    #[error("Printer presented no certificate")]
    NoPeerCertificate,

    #[error("Failed to encode certificate: {0}")]
    Encode(String),
}

/// Chain exactly as the printer presented it, leaf first.
#[derive(Debug, Clone)]
pub struct PeerChain {
    pub certs: Vec<CertificateDer<'static>>,
}

/// What gets persisted and pinned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PemBundle {
    pub pem: String,
    pub cert_count: usize,
    /// No CA in the chain, the leaf was pinned instead.
    pub leaf_fallback: bool,
}

#[state]
#[derive(Debug, Clone)]
pub enum FetchStage {
    Dialing,
    Handshaken(PeerChain),
    Encoded(PemBundle),
}

#[machine]
#[derive(Debug)]
pub struct CertFetch<S: FetchStage> {
    host: String,
    port: u16,
    timeout: Duration,
}

impl<S: FetchStage> CertFetch<S> {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl CertFetch<Dialing> {
    pub fn create(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self::new(host.into(), port, timeout)
    }

    pub async fn handshake(self) -> Result<CertFetch<Handshaken>, CertFetchError> {
        let endpoint = self.endpoint();
        debug!("TOFU: connecting to {}", endpoint);

        let server_name = ServerName::try_from(self.host.as_str())
            .map_err(|_| CertFetchError::InvalidHost(self.host.clone()))?
            .to_owned();
        let connector = TlsConnector::from(capture_client_config());

        let capture = async {
            let tcp = TcpStream::connect(&endpoint)
                .await
                .map_err(CertFetchError::Connect)?;
            let tls = connector
                .connect(server_name, tcp)
                .await
                .map_err(CertFetchError::Handshake)?;
            let (_, session) = tls.get_ref();
            Ok::<_, CertFetchError>(
                session
                    .peer_certificates()
                    .map(|certs| certs.iter().map(|c| c.clone().into_owned()).collect::<Vec<_>>())
                    .unwrap_or_default(),
            )
        };

        let certs = tokio::time::timeout(self.timeout, capture)
            .await
            .map_err(|_| CertFetchError::Timeout(self.timeout))??;

        if certs.is_empty() {
            return Err(CertFetchError::NoPeerCertificate);
        }
        debug!("TOFU: printer presented {} certificate(s)", certs.len());
        Ok(self.transition_with(PeerChain { certs }))
    }
}

impl CertFetch<Handshaken> {
    pub fn encode(self) -> Result<CertFetch<Encoded>, CertFetchError> {
        let bundle = match self.get_state_data() {
            Some(chain) => encode_chain(&chain.certs)?,
            None => return Err(CertFetchError::NoPeerCertificate),
        };
        Ok(self.transition_with(bundle))
    }
}

impl CertFetch<Encoded> {
    pub fn into_bundle(self) -> Result<PemBundle, CertFetchError> {
        self.get_state_data()
            .cloned()
            .ok_or_else(|| CertFetchError::Encode("bundle missing".to_string()))
    }
}

/// Full capture: connect, handshake, pick certificates, encode.
pub async fn fetch_certificate(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<PemBundle, CertFetchError> {
    let bundle = CertFetch::create(host, port, timeout)
        .handshake()
        .await?
        .encode()?
        .into_bundle()?;

    if bundle.leaf_fallback {
        warn!("TOFU: no CA in chain, pinned the leaf certificate");
    } else {
        info!("TOFU: pinned {} CA certificate(s)", bundle.cert_count);
    }
    Ok(bundle)
}

fn is_ca(der: &CertificateDer<'_>) -> bool {
    x509_parser::parse_x509_certificate(der.as_ref())
        .map(|(_, cert)| cert.is_ca())
        .unwrap_or(false)
}

pub fn encode_chain(chain: &[CertificateDer<'_>]) -> Result<PemBundle, CertFetchError> {
    let cas: Vec<&CertificateDer<'_>> = chain.iter().filter(|der| is_ca(der)).collect();
    let leaf_fallback = cas.is_empty();
    let selected: Vec<&CertificateDer<'_>> = if leaf_fallback {
        chain.iter().take(1).collect()
    } else {
        cas
    };

    let config = EncodeConfig::new().set_line_ending(LineEnding::LF);
    let pem: String = selected
        .iter()
        .map(|der| pem::encode_config(&Pem::new("CERTIFICATE", der.as_ref().to_vec()), config))
        .collect();
    if pem.is_empty() {
        return Err(CertFetchError::Encode("empty certificate chain".to_string()));
    }

    Ok(PemBundle {
        pem,
        cert_count: selected.len(),
        leaf_fallback,
    })
}
