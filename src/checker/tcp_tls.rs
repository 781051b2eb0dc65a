//! TCP+TLS handshake checker.

use super::{crypto_provider, Checker, Outcome, CONNECT_TIMEOUT, READ_TIMEOUT};
use crate::db::Service;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::RootCertStore;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

const DEFAULT_PORT: u16 = 443;

/// Checker for `tcp-tls://` services.
///
/// Connects and completes a TLS handshake against the webpki root set, then
/// closes the connection. No application data is exchanged; a finished
/// handshake is the whole health signal.
pub struct TcpTlsChecker;

#[async_trait]
impl Checker for TcpTlsChecker {
    async fn check(&self, service: &Service) -> Outcome {
        match handshake(&service.url).await {
            Ok(()) => Outcome::Ok,
            Err(detail) => Outcome::Failed(detail),
        }
    }
}

/// Split `tcp-tls://host[:port]` into host and port, defaulting to 443 when
/// the port is absent or unparseable.
pub fn parse_tcp_tls_url(url: &str) -> (String, u16) {
    let stripped = url.strip_prefix("tcp-tls://").unwrap_or(url);
    match stripped.split_once(':') {
        Some((host, port)) => (
            host.to_string(),
            port.parse().unwrap_or(DEFAULT_PORT),
        ),
        None => (stripped.to_string(), DEFAULT_PORT),
    }
}

async fn handshake(url: &str) -> Result<(), String> {
    let (host, port) = parse_tcp_tls_url(url);

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| e.to_string())?
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));

    let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host.as_str(), port)))
        .await
        .map_err(|_| format!("connect timed out after {:?}", CONNECT_TIMEOUT))?
        .map_err(|e| e.to_string())?;

    let server_name = ServerName::try_from(host).map_err(|e| e.to_string())?;
    tokio::time::timeout(READ_TIMEOUT, connector.connect(server_name, stream))
        .await
        .map_err(|_| format!("handshake timed out after {:?}", READ_TIMEOUT))?
        .map_err(|e| e.to_string())?;

    Ok(())
}
