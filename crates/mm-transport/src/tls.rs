//! TLS material shared by the h2 and WebSocket adapters (§4.5: "TLS is
//! mandatory for all transports").
//!
//! Mirrors `quic`'s approach: generate an ephemeral self-signed ECDSA
//! certificate per process start and skip peer-certificate verification by
//! default, since identity is established one layer up by `PEER_HELLO` plus
//! per-stream E2E keys rather than by the transport certificate. A
//! `strict` deployment instead supplies a real certificate/CA and this
//! module is bypassed in favor of configured `rustls` configs (wiring left
//! to `mm-config`, which owns certificate/CA file loading).

use std::sync::Arc;

use crate::TransportError;

/// Generate a fresh self-signed certificate + rustls configs trusting any
/// peer certificate. Used for both the h2 and WebSocket adapters' default
/// (non-strict) TLS mode.
pub fn ephemeral_configs() -> Result<(Arc<rustls::ServerConfig>, Arc<rustls::ClientConfig>), TransportError> {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["muti-metroo".to_string()])
            .map_err(|e| TransportError::Tls(e.to_string()))?;
    let cert_der = rustls::pki_types::CertificateDer::from(cert.der().to_vec());
    let key_der = rustls::pki_types::PrivatePkcs8KeyDer::from(key_pair.serialize_der());

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der.into())
        .map_err(|e| TransportError::Tls(e.to_string()))?;

    let client_config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_no_client_auth();

    Ok((Arc::new(server_config), Arc::new(client_config)))
}

#[derive(Debug)]
struct AcceptAnyServerCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
