//! TLS over TCP transport
//!
//! A TLS connection carries exactly one benchmark exchange. Half-close is
//! emulated: `close_send` sends `close_notify` and shuts down the TCP write
//! side, after which the peer reads EOF while our read side stays open.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};
use tracing::{debug, warn};

use super::quic::SkipServerVerification;
use super::{ALPN, BenchStream, HalfClose, SERVER_NAME, TransportSettings};
use crate::cert::Identity;
use crate::error::{Error, Result};
use crate::net;

/// Pause after a failed TCP accept, so a persistent failure such as running
/// out of file descriptors does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

fn acceptor(identity: &Identity, settings: &TransportSettings) -> Result<TlsAcceptor> {
    let mut config = rustls::ServerConfig::builder_with_provider(super::crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(identity.cert_chain.clone(), identity.clone_key())?;
    config.alpn_protocols = vec![ALPN.to_vec()];
    settings.install_key_log(&mut config.key_log);
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn connector(settings: &TransportSettings) -> Result<TlsConnector> {
    let mut config = rustls::ClientConfig::builder_with_provider(super::crypto_provider())
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
        .with_no_client_auth();
    config.alpn_protocols = vec![ALPN.to_vec()];
    settings.install_key_log(&mut config.key_log);
    Ok(TlsConnector::from(Arc::new(config)))
}

/// The single stream of a TLS connection.
pub struct TlsBenchStream(TlsStream<TcpStream>);

impl AsyncRead for TlsBenchStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl AsyncWrite for TlsBenchStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}

#[async_trait]
impl BenchStream for TlsBenchStream {
    fn id(&self) -> u64 {
        0
    }

    fn half_close(&self) -> HalfClose {
        HalfClose::Emulated
    }

    async fn close_send(&mut self) -> io::Result<()> {
        self.0.shutdown().await
    }
}

/// Dialed TLS connection. Its stream can be taken once.
pub struct TlsClient {
    stream: Option<TlsBenchStream>,
    remote: SocketAddr,
}

impl TlsClient {
    pub(super) async fn connect(addr: SocketAddr, settings: &TransportSettings) -> Result<Self> {
        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|source| Error::Connect { addr, source })?;
        net::configure_stream(&tcp, settings.tcp_nodelay, settings.socket_buffer_size)?;

        let server_name = ServerName::try_from(SERVER_NAME)
            .map_err(|e| Error::setup(format!("invalid server name: {}", e)))?;
        let tls = connector(settings)?
            .connect(server_name, tcp)
            .await
            .map_err(|source| Error::Connect { addr, source })?;
        debug!("TLS connected to {}", addr);

        Ok(Self {
            stream: Some(TlsBenchStream(TlsStream::Client(tls))),
            remote: addr,
        })
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub(super) fn take_stream(&mut self) -> Result<TlsBenchStream> {
        self.stream
            .take()
            .ok_or_else(|| Error::setup("TLS/TCP connections carry a single stream"))
    }
}

/// Bound TCP socket plus the acceptor for the server identity.
pub struct TlsListener {
    tcp: TcpListener,
    acceptor: TlsAcceptor,
    settings: TransportSettings,
}

impl TlsListener {
    pub(super) fn bind(
        addr: SocketAddr,
        identity: &Identity,
        settings: &TransportSettings,
    ) -> Result<Self> {
        Ok(Self {
            tcp: net::create_tcp_listener(addr)?,
            acceptor: acceptor(identity, settings)?,
            settings: settings.clone(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.tcp.local_addr()?)
    }

    /// Accept the next TCP connection. Per-connection accept errors are
    /// logged and skipped.
    pub(super) async fn accept(&self) -> Result<TlsIncoming> {
        loop {
            match self.tcp.accept().await {
                Ok((stream, peer)) => {
                    if let Err(e) = net::configure_stream(
                        &stream,
                        self.settings.tcp_nodelay,
                        self.settings.socket_buffer_size,
                    ) {
                        warn!("Failed to configure socket from {}: {}", peer, e);
                    }
                    return Ok(TlsIncoming {
                        stream,
                        peer,
                        acceptor: self.acceptor.clone(),
                    });
                }
                Err(e) => {
                    warn!("Failed to accept TCP connection: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
}

/// Accepted TCP connection awaiting its TLS handshake.
pub struct TlsIncoming {
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
}

impl TlsIncoming {
    pub fn remote_addr(&self) -> SocketAddr {
        self.peer
    }

    pub(super) async fn handshake(self) -> Result<TlsBenchStream> {
        let tls = self.acceptor.accept(self.stream).await?;
        Ok(TlsBenchStream(TlsStream::Server(tls)))
    }
}

/// Server side of a TLS connection.
pub struct TlsServer {
    stream: Option<TlsBenchStream>,
    remote: SocketAddr,
}

impl TlsServer {
    pub(super) fn new(stream: TlsBenchStream, remote: SocketAddr) -> Self {
        Self {
            stream: Some(stream),
            remote,
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// The connection's only stream, then `None`.
    pub(super) fn take_stream(&mut self) -> Option<TlsBenchStream> {
        self.stream.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_failed_handshake_is_setup_error() {
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = tcp.local_addr().unwrap();
        tokio::spawn(async move {
            // accept and hang up before any TLS
            if let Ok((stream, _)) = tcp.accept().await {
                drop(stream);
            }
        });

        let err = TlsClient::connect(addr, &TransportSettings::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Connect { .. }), "got {}", err);
        assert_eq!(err.kind(), ErrorKind::Setup);
    }
}
