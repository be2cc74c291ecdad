//! Certificates and a loopback TLS endpoint standing in for a printer.

use super::tls::parse_pem_bundle;
use rumqttc::tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rumqttc::tokio_rustls::rustls::ServerConfig;
use rumqttc::tokio_rustls::TlsAcceptor;
use std::sync::Arc;
use tokio::net::TcpListener;

pub const CA_PEM: &str = include_str!("../../testdata/printer_ca.pem");
pub const LEAF_PEM: &str = include_str!("../../testdata/printer_leaf.pem");
pub const LEAF_KEY: &str = include_str!("../../testdata/printer_leaf.key");

pub fn der(pem_text: &str) -> CertificateDer<'static> {
    parse_pem_bundle(pem_text).unwrap().remove(0)
}

/// Serves one TLS handshake presenting `chain` and returns the port.
pub async fn serve_once(chain: Vec<CertificateDer<'static>>) -> u16 {
    let key = pem::parse(LEAF_KEY).unwrap();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.into_contents()));
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        if let Ok((tcp, _)) = listener.accept().await {
            let _ = acceptor.accept(tcp).await;
        }
    });
    port
}
