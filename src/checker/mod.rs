//! Service checkers.
//!
//! A check probes one service and reduces whatever happened (response code,
//! transport error, TLS failure, pattern mismatch) to a single [`Outcome`].
//! Checkers never return errors to the caller; every failure mode becomes
//! `Outcome::Failed` with human-readable detail.

mod http;
mod tcp_tls;

pub use http::*;
pub use tcp_tls::*;

use crate::db::Service;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Connect timeout applied by every checker.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Read/handshake timeout applied by every checker.
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// The result of one check attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Failed(String),
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok)
    }

    /// Render the canonical status string: `"ok"` for success, the failure
    /// detail verbatim otherwise. This string is both machine state and the
    /// diagnostic text shown to the user and stored in history.
    pub fn into_status(self) -> String {
        match self {
            Outcome::Ok => "ok".to_string(),
            Outcome::Failed(detail) => detail,
        }
    }
}

/// Probing protocol, selected by URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    Http,
    Https,
    TcpTls,
}

impl CheckMode {
    /// Pure scheme-based selection. `None` means the URL is not checkable.
    pub fn from_url(url: &str) -> Option<CheckMode> {
        // tcp-tls targets are host[:port], not full URLs; match the prefix
        // before handing anything to the URL parser.
        if url.starts_with("tcp-tls://") {
            return Some(CheckMode::TcpTls);
        }
        match Url::parse(url) {
            Ok(parsed) => match parsed.scheme() {
                "http" => Some(CheckMode::Http),
                "https" => Some(CheckMode::Https),
                _ => None,
            },
            Err(_) => None,
        }
    }
}

/// Strategy interface for probing one service.
#[async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, service: &Service) -> Outcome;
}

/// Default checker: dispatches on the URL scheme.
pub struct ProtocolChecker {
    http: HttpChecker,
    tcp_tls: TcpTlsChecker,
}

impl ProtocolChecker {
    pub fn new() -> Arc<dyn Checker> {
        Arc::new(Self {
            http: HttpChecker,
            tcp_tls: TcpTlsChecker,
        })
    }
}

#[async_trait]
impl Checker for ProtocolChecker {
    async fn check(&self, service: &Service) -> Outcome {
        match CheckMode::from_url(&service.url) {
            Some(CheckMode::Http) | Some(CheckMode::Https) => self.http.check(service).await,
            Some(CheckMode::TcpTls) => self.tcp_tls.check(service).await,
            None => Outcome::Failed("invalid url scheme".to_string()),
        }
    }
}

/// Parse a `"k1:v1,k2:v2"` header string into key/value pairs.
///
/// Parsing is lenient: segments without a `:` separator are dropped, keys and
/// values are trimmed, and an empty input yields no headers.
pub fn parse_headers(headers: &str) -> Vec<(String, String)> {
    if headers.trim().is_empty() {
        return Vec::new();
    }
    headers
        .split(',')
        .filter_map(|segment| {
            let (key, value) = segment.split_once(':')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

pub(crate) fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}
