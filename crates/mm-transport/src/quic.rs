//! QUIC transport adapter: `quinn` over `rustls`, with an ephemeral
//! self-signed certificate generated via `rcgen` when no certificate is
//! configured. QUIC natively multiplexes streams, so [`QuicConnection`]
//! opens a fresh bidirectional stream per call rather than sharing one.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use quinn::{ClientConfig, Endpoint, RecvStream, SendStream, ServerConfig};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

use crate::{ByteStream, Connection, Listener, Transport, TransportError};

/// ALPN protocol identifier advertised by both ends of a Muti Metroo QUIC
/// link.
const ALPN: &[u8] = b"muti-metroo/1";

/// Generates a fresh self-signed ECDSA certificate for a QUIC endpoint.
///
/// Agents authenticate each other at the application layer (the
/// `PEER_HELLO` handshake plus, for streams, per-session X25519 keys), so
/// the transport-layer certificate only needs to establish an encrypted
/// channel, not an identity — a fresh ephemeral cert per process start is
/// sufficient and avoids provisioning a CA.
fn generate_self_signed() -> Result<(rustls::pki_types::CertificateDer<'static>, rustls::pki_types::PrivatePkcs8KeyDer<'static>), TransportError> {
    let rcgen::CertifiedKey { cert, key_pair } = rcgen::generate_simple_self_signed(vec![
        "muti-metroo".to_string(),
    ])
    .map_err(|e| TransportError::Tls(e.to_string()))?;
    let cert_der = rustls::pki_types::CertificateDer::from(cert.der().to_vec());
    let key_der = rustls::pki_types::PrivatePkcs8KeyDer::from(key_pair.serialize_der());
    Ok((cert_der, key_der))
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

/// QUIC transport over a single local `Endpoint` usable for both dialing
/// and listening.
pub struct QuicTransport {
    endpoint: Endpoint,
}

impl QuicTransport {
    /// Bind a new endpoint. Connections it dials trust any peer
    /// certificate (identity is verified above the transport layer);
    /// connections it accepts present an ephemeral self-signed cert.
    pub fn bind(local_addr: SocketAddr) -> Result<Self, TransportError> {
        let (cert, key) = generate_self_signed()?;

        let mut server_crypto = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert], key.into())
            .map_err(|e| TransportError::Tls(e.to_string()))?;
        server_crypto.alpn_protocols = vec![ALPN.to_vec()];
        let server_config = ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(server_crypto)
                .map_err(|e| TransportError::Tls(e.to_string()))?,
        ));

        let mut client_crypto = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
            .with_no_client_auth();
        client_crypto.alpn_protocols = vec![ALPN.to_vec()];
        let client_config = ClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(client_crypto)
                .map_err(|e| TransportError::Tls(e.to_string()))?,
        ));

        let mut endpoint = Endpoint::server(server_config, local_addr)
            .map_err(|e| TransportError::Listen(e.to_string()))?;
        endpoint.set_default_client_config(client_config);

        Ok(QuicTransport { endpoint })
    }
}

#[async_trait]
impl Transport for QuicTransport {
    async fn dial(&self, addr: &str) -> Result<Box<dyn Connection>, TransportError> {
        let socket_addr: SocketAddr = addr
            .parse()
            .map_err(|e| TransportError::Dial(format!("invalid address '{addr}': {e}")))?;
        let connecting = self
            .endpoint
            .connect(socket_addr, "muti-metroo")
            .map_err(|e| TransportError::Dial(e.to_string()))?;
        let connection = connecting
            .await
            .map_err(|e| TransportError::Dial(e.to_string()))?;
        debug!(%addr, "quic connection established");
        Ok(Box::new(QuicConnection { connection }))
    }

    async fn listen(&self, _addr: &str) -> Result<Box<dyn Listener>, TransportError> {
        Ok(Box::new(QuicListener {
            endpoint: self.endpoint.clone(),
        }))
    }
}

pub struct QuicListener {
    endpoint: Endpoint,
}

#[async_trait]
impl Listener for QuicListener {
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError> {
        let incoming = self
            .endpoint
            .accept()
            .await
            .ok_or(TransportError::ConnectionClosed)?;
        let connection = incoming
            .await
            .map_err(|e| TransportError::Listen(e.to_string()))?;
        Ok(Box::new(QuicConnection { connection }))
    }
}

pub struct QuicConnection {
    connection: quinn::Connection,
}

#[async_trait]
impl Connection for QuicConnection {
    fn multiplexed(&self) -> bool {
        true
    }

    async fn open_stream(&self) -> Result<Box<dyn ByteStream>, TransportError> {
        let (send, recv) = self
            .connection
            .open_bi()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        Ok(Box::new(QuicByteStream { send, recv }))
    }

    async fn accept_stream(&self) -> Result<Box<dyn ByteStream>, TransportError> {
        let (send, recv) = self
            .connection
            .accept_bi()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        Ok(Box::new(QuicByteStream { send, recv }))
    }

    async fn close(&self) {
        self.connection.close(0u32.into(), b"closed");
    }
}

/// Combines a QUIC bidirectional stream's independent send/receive halves
/// into a single `AsyncRead + AsyncWrite` handle.
struct QuicByteStream {
    send: SendStream,
    recv: RecvStream,
}

impl AsyncRead for QuicByteStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.recv).poll_read(cx, buf)
    }
}

impl AsyncWrite for QuicByteStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.send).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.send).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.send).poll_shutdown(cx)
    }
}
