//! QUIC transport using quinn
//!
//! ```text
//! Client                                 Server
//!   │                                      │
//!   │── QUIC handshake (TLS 1.3, "perf") ─>│
//!   │<─────────────────────────────────────│
//!   │                                      │
//!   │== bidi stream 0 ====================│  one benchmark exchange
//!   │== bidi stream 4 ====================│  (another, concurrently)
//!   │== ...                               │
//! ```
//!
//! Each exchange gets its own bidirectional stream. `finish()` on the send
//! half is the native half-close.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use quinn::{
    ClientConfig, Connection, ConnectionError, Endpoint, RecvStream, SendStream, ServerConfig,
    TransportConfig, VarInt,
};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

use super::{ALPN, BenchStream, HalfClose, PathSummary, SERVER_NAME, TransportSettings};
use crate::cert::Identity;
use crate::error::{Error, Result};

fn varint(v: u64) -> VarInt {
    VarInt::from_u64(v).unwrap_or(VarInt::MAX)
}

fn transport_config(settings: &TransportSettings) -> TransportConfig {
    let mut transport = TransportConfig::default();
    transport
        .receive_window(varint(settings.receive_window))
        .stream_receive_window(varint(settings.stream_receive_window))
        .send_window(settings.send_window)
        .max_concurrent_bidi_streams(VarInt::from_u32(settings.max_concurrent_streams))
        .keep_alive_interval(settings.keep_alive_interval);
    transport
}

fn server_config(identity: &Identity, settings: &TransportSettings) -> Result<ServerConfig> {
    let mut crypto = rustls::ServerConfig::builder_with_provider(super::crypto_provider())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_no_client_auth()
        .with_single_cert(identity.cert_chain.clone(), identity.clone_key())?;
    crypto.alpn_protocols = vec![ALPN.to_vec()];
    settings.install_key_log(&mut crypto.key_log);

    let quic_crypto =
        QuicServerConfig::try_from(crypto).map_err(|e| Error::setup(e.to_string()))?;
    let mut server_config = ServerConfig::with_crypto(Arc::new(quic_crypto));
    server_config.transport_config(Arc::new(transport_config(settings)));
    Ok(server_config)
}

fn client_config(settings: &TransportSettings) -> Result<ClientConfig> {
    let mut crypto = rustls::ClientConfig::builder_with_provider(super::crypto_provider())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
        .with_no_client_auth();
    crypto.alpn_protocols = vec![ALPN.to_vec()];
    settings.install_key_log(&mut crypto.key_log);

    let quic_crypto =
        QuicClientConfig::try_from(crypto).map_err(|e| Error::setup(e.to_string()))?;
    let mut client_config = ClientConfig::new(Arc::new(quic_crypto));
    client_config.transport_config(Arc::new(transport_config(settings)));
    Ok(client_config)
}

/// Accepts any server certificate. See the module-level security model in
/// [`crate::transport`].
#[derive(Debug)]
pub(super) struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _: &[u8],
        _: &CertificateDer<'_>,
        _: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _: &[u8],
        _: &CertificateDer<'_>,
        _: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
        ]
    }
}

/// One bidirectional QUIC stream.
pub struct QuicStream {
    send: SendStream,
    recv: RecvStream,
}

impl QuicStream {
    fn new(send: SendStream, recv: RecvStream) -> Self {
        Self { send, recv }
    }
}

impl AsyncRead for QuicStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        AsyncRead::poll_read(Pin::new(&mut self.recv), cx, buf)
    }
}

impl AsyncWrite for QuicStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        AsyncWrite::poll_write(Pin::new(&mut self.send), cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_flush(Pin::new(&mut self.send), cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_shutdown(Pin::new(&mut self.send), cx)
    }
}

#[async_trait]
impl BenchStream for QuicStream {
    fn id(&self) -> u64 {
        self.send.id().index()
    }

    fn half_close(&self) -> HalfClose {
        HalfClose::Native
    }

    async fn close_send(&mut self) -> io::Result<()> {
        self.send
            .finish()
            .map_err(|e| io::Error::new(io::ErrorKind::NotConnected, e))
    }
}

/// Dialed QUIC connection together with the endpoint that owns its socket.
pub struct QuicClient {
    endpoint: Endpoint,
    connection: Connection,
}

impl QuicClient {
    pub(super) async fn connect(addr: SocketAddr, settings: &TransportSettings) -> Result<Self> {
        let bind_addr = if addr.is_ipv6() {
            SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0)
        } else {
            SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)
        };

        let mut endpoint =
            Endpoint::client(bind_addr).map_err(|source| Error::Connect { addr, source })?;
        endpoint.set_default_client_config(client_config(settings)?);

        let connection = endpoint
            .connect(addr, SERVER_NAME)?
            .await
            .map_err(|e| Error::Connect {
                addr,
                source: io::Error::other(e),
            })?;
        debug!("QUIC connected to {}", addr);
        Ok(Self {
            endpoint,
            connection,
        })
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub(super) async fn open_stream(&self) -> Result<QuicStream> {
        let (send, recv) = self.connection.open_bi().await?;
        Ok(QuicStream::new(send, recv))
    }

    pub(super) async fn close(self) {
        self.connection.close(0u32.into(), b"done");
        self.endpoint.wait_idle().await;
    }
}

/// Server endpoint.
pub struct QuicListener {
    endpoint: Endpoint,
}

impl QuicListener {
    pub(super) fn bind(
        addr: SocketAddr,
        identity: &Identity,
        settings: &TransportSettings,
    ) -> Result<Self> {
        let endpoint = Endpoint::server(server_config(identity, settings)?, addr)?;
        Ok(Self { endpoint })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.endpoint.local_addr()?)
    }

    pub(super) async fn accept(&self) -> Result<quinn::Incoming> {
        self.endpoint
            .accept()
            .await
            .ok_or_else(|| Error::setup("QUIC endpoint closed"))
    }
}

/// Next bidirectional stream, or `None` once the peer closed the connection.
pub(super) async fn accept_stream(connection: &Connection) -> Result<Option<QuicStream>> {
    match connection.accept_bi().await {
        Ok((send, recv)) => Ok(Some(QuicStream::new(send, recv))),
        Err(ConnectionError::ApplicationClosed(_)) | Err(ConnectionError::LocallyClosed) => {
            debug!("QUIC connection from {} closed", connection.remote_address());
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

pub(super) fn path_summary(connection: &Connection) -> PathSummary {
    let stats = connection.stats();
    PathSummary {
        rtt_us: stats.path.rtt.as_micros() as u64,
        cwnd: stats.path.cwnd,
        sent_packets: stats.path.sent_packets,
        lost_packets: stats.path.lost_packets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::generate_identity;
    use crate::error::ErrorKind;
    use std::time::Duration;

    #[tokio::test]
    async fn test_refused_handshake_is_setup_error() {
        let identity = generate_identity().unwrap();
        let settings = TransportSettings {
            insecure_skip_verify: true,
            ..Default::default()
        };
        let listener =
            QuicListener::bind("127.0.0.1:0".parse().unwrap(), &identity, &settings).unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok(incoming) = listener.accept().await {
                incoming.refuse();
            }
            // keep the endpoint alive while the refusal goes out
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let err = tokio::time::timeout(Duration::from_secs(5), QuicClient::connect(addr, &settings))
            .await
            .unwrap()
            .err()
            .unwrap();
        assert!(matches!(err, Error::Connect { .. }), "got {}", err);
        assert_eq!(err.kind(), ErrorKind::Setup);
    }
}
