//! HTTP(S) checker.

use super::{
    crypto_provider, parse_headers, Checker, Outcome, CONNECT_TIMEOUT, READ_TIMEOUT,
};
use crate::db::Service;

use async_trait::async_trait;
use regex::Regex;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use sha1::{Digest, Sha1};
use std::sync::Arc;

const BODY_METHODS: [&str; 4] = ["POST", "PUT", "PATCH", "DELETE"];

/// Checker for `http://` and `https://` services.
///
/// Applies the configured method, headers and body, classifies the response
/// status, and optionally requires the body to match a pattern. When a SHA-1
/// certificate fingerprint is configured on an https target, CA-chain and
/// hostname validation are replaced by a fingerprint match against the
/// server's leaf certificate (pinning).
pub struct HttpChecker;

#[async_trait]
impl Checker for HttpChecker {
    async fn check(&self, service: &Service) -> Outcome {
        match request(service).await {
            Ok(outcome) => outcome,
            Err(detail) => Outcome::Failed(detail),
        }
    }
}

async fn request(service: &Service) -> Result<Outcome, String> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(READ_TIMEOUT);

    if service.url.starts_with("https://") && !service.sha1_certificate.is_empty() {
        let fingerprint = parse_fingerprint(&service.sha1_certificate)
            .ok_or_else(|| "invalid certificate fingerprint".to_string())?;
        builder = builder.use_preconfigured_tls(pinned_tls_config(fingerprint)?);
    }

    let client = builder.build().map_err(|e| e.to_string())?;

    let method_name = if service.method.is_empty() {
        "GET".to_string()
    } else {
        service.method.to_uppercase()
    };
    let method = reqwest::Method::from_bytes(method_name.as_bytes())
        .map_err(|_| format!("invalid http method: {}", method_name))?;

    let mut req = client.request(method, &service.url);
    for (key, value) in parse_headers(&service.headers) {
        req = req.header(key, value);
    }
    if BODY_METHODS.contains(&method_name.as_str()) && !service.body.is_empty() {
        req = req.body(service.body.clone().into_bytes());
    }

    let response = req.send().await.map_err(|e| e.to_string())?;
    let status = response.status();

    if !status.is_success() {
        let reason = status.canonical_reason().unwrap_or("");
        return Ok(Outcome::Failed(
            format!("{} {}", status.as_u16(), reason).trim_end().to_string(),
        ));
    }

    if !service.response_pattern.is_empty() {
        let body = response.text().await.map_err(|e| e.to_string())?;
        return Ok(match_pattern(
            &body,
            &service.response_pattern,
            service.use_regex_pattern,
        ));
    }

    Ok(Outcome::Ok)
}

fn match_pattern(body: &str, pattern: &str, use_regex: bool) -> Outcome {
    if use_regex {
        match Regex::new(pattern) {
            Ok(re) if re.is_match(body) => Outcome::Ok,
            Ok(_) => Outcome::Failed("pattern mismatch".to_string()),
            Err(e) => Outcome::Failed(format!("invalid response pattern: {}", e)),
        }
    } else if body.contains(pattern) {
        Outcome::Ok
    } else {
        Outcome::Failed("pattern mismatch".to_string())
    }
}

/// Normalize a fingerprint like `AB:12:...` or `ab12...` into raw SHA-1 bytes.
fn parse_fingerprint(fingerprint: &str) -> Option<Vec<u8>> {
    let cleaned: String = fingerprint
        .chars()
        .filter(|c| !matches!(c, ':' | ' ' | '-'))
        .collect();
    let bytes = hex::decode(cleaned).ok()?;
    if bytes.len() == Sha1::output_size() {
        Some(bytes)
    } else {
        None
    }
}

fn pinned_tls_config(fingerprint: Vec<u8>) -> Result<rustls::ClientConfig, String> {
    let provider = crypto_provider();
    let verifier = PinnedCertVerifier {
        fingerprint,
        provider: provider.clone(),
    };
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| e.to_string())?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    Ok(config)
}

/// Certificate verifier that trusts exactly one leaf certificate, identified
/// by its SHA-1 fingerprint. CA-chain and hostname validation do not apply in
/// this mode; the fingerprint is the whole trust decision.
#[derive(Debug)]
struct PinnedCertVerifier {
    fingerprint: Vec<u8>,
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let digest = Sha1::digest(end_entity.as_ref());
        if digest.as_slice() == self.fingerprint.as_slice() {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::ApplicationVerificationFailure,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
