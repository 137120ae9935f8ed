//! Transport connectors
//!
//! Two transports carry the same benchmark protocol:
//!
//! - [`Transport::Quic`]: QUIC, many independent bidirectional streams per
//!   connection, each with native half-close.
//! - [`Transport::Tls`]: TLS over TCP, one stream per connection. Opening a
//!   stream hands out the connection itself, and half-close is emulated by
//!   sending `close_notify` and shutting down the TCP write side.
//!
//! The copy loops in [`crate::protocol`] only see [`BenchStream`].
//!
//! # Security Model
//!
//! The server presents an ephemeral self-signed certificate, so clients cannot
//! verify it. Clients therefore refuse to connect unless
//! [`TransportSettings::insecure_skip_verify`] is set. This is a measurement
//! tool, not a secure channel.

pub mod quic;
pub mod tls;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::crypto::CryptoProvider;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::cert::Identity;
use crate::error::{Error, Result};
use crate::keylog::KeyLogFile;

/// ALPN identifier spoken by both transports.
pub const ALPN: &[u8] = b"perf";

/// Name the client presents in SNI. The server certificate is issued for it.
pub const SERVER_NAME: &str = "localhost";

/// Default bound on connection establishment.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Flow control windows large enough that they never cap throughput.
pub const DEFAULT_WINDOW: u64 = 1 << 30;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Quic,
    Tls,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Quic => write!(f, "QUIC"),
            Transport::Tls => write!(f, "TLS/TCP"),
        }
    }
}

impl std::str::FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "quic" => Ok(Transport::Quic),
            "tls" | "tcp" | "tls-tcp" => Ok(Transport::Tls),
            _ => Err(format!("Invalid transport: {}. Valid options: quic, tls", s)),
        }
    }
}

/// How a transport closes the send side of a stream. `Native` streams have
/// independent directions; `Emulated` ones rely on a write shutdown that keeps
/// the read half open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalfClose {
    Native,
    Emulated,
}

/// A reliable, ordered, bidirectional byte stream with send-side close.
#[async_trait]
pub trait BenchStream: AsyncRead + AsyncWrite + Send + Unpin {
    /// Identifier of the stream within its connection.
    fn id(&self) -> u64;

    fn half_close(&self) -> HalfClose;

    /// Signal end of data on the send side. Reads keep working afterwards.
    async fn close_send(&mut self) -> io::Result<()>;
}

/// In-memory pipe, for exercising the protocol without sockets.
#[async_trait]
impl BenchStream for tokio::io::DuplexStream {
    fn id(&self) -> u64 {
        0
    }

    fn half_close(&self) -> HalfClose {
        HalfClose::Native
    }

    async fn close_send(&mut self) -> io::Result<()> {
        tokio::io::AsyncWriteExt::shutdown(self).await
    }
}

/// Transport tuning, built once and passed to the connectors.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub handshake_timeout: Duration,
    pub receive_window: u64,
    pub stream_receive_window: u64,
    pub send_window: u64,
    pub max_concurrent_streams: u32,
    pub keep_alive_interval: Option<Duration>,
    pub tcp_nodelay: bool,
    pub socket_buffer_size: Option<usize>,
    /// Accept any server certificate. Required, since servers only present
    /// throwaway self-signed identities.
    pub insecure_skip_verify: bool,
    pub key_log: Option<Arc<KeyLogFile>>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            receive_window: DEFAULT_WINDOW,
            stream_receive_window: DEFAULT_WINDOW,
            send_window: DEFAULT_WINDOW,
            max_concurrent_streams: 100,
            keep_alive_interval: Some(Duration::from_secs(5)),
            tcp_nodelay: true,
            socket_buffer_size: None,
            insecure_skip_verify: false,
            key_log: None,
        }
    }
}

impl TransportSettings {
    fn install_key_log(&self, key_log: &mut Arc<dyn rustls::KeyLog>) {
        if let Some(log) = &self.key_log {
            *key_log = log.clone();
        }
    }

    fn require_insecure(&self) -> Result<()> {
        if self.insecure_skip_verify {
            Ok(())
        } else {
            Err(Error::setup(
                "server certificates are self-signed and cannot be verified; \
                 enable insecure_skip_verify (--insecure) to benchmark",
            ))
        }
    }
}

pub(crate) fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Path statistics captured when a connection ends.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PathSummary {
    pub rtt_us: u64,
    pub cwnd: u64,
    pub sent_packets: u64,
    pub lost_packets: u64,
}

/// Client side of an established connection.
pub enum ClientConnection {
    Quic(quic::QuicClient),
    Tls(tls::TlsClient),
}

impl ClientConnection {
    /// Dial `addr`. Establishment is bounded by the handshake timeout.
    pub async fn connect(
        transport: Transport,
        addr: SocketAddr,
        settings: &TransportSettings,
    ) -> Result<Self> {
        settings.require_insecure()?;
        debug!("Dialing {} via {}", addr, transport);

        let connecting = async {
            match transport {
                Transport::Quic => quic::QuicClient::connect(addr, settings)
                    .await
                    .map(ClientConnection::Quic),
                Transport::Tls => tls::TlsClient::connect(addr, settings)
                    .await
                    .map(ClientConnection::Tls),
            }
        };

        let conn = tokio::time::timeout(settings.handshake_timeout, connecting)
            .await
            .map_err(|_| Error::HandshakeTimeout {
                addr,
                timeout: settings.handshake_timeout,
            })??;
        info!("Connected to {} via {}", addr, transport);
        Ok(conn)
    }

    pub fn transport(&self) -> Transport {
        match self {
            ClientConnection::Quic(_) => Transport::Quic,
            ClientConnection::Tls(_) => Transport::Tls,
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        match self {
            ClientConnection::Quic(c) => c.remote_addr(),
            ClientConnection::Tls(c) => c.remote_addr(),
        }
    }

    /// Open a new stream. On TLS/TCP this yields the connection itself, once.
    pub async fn open_stream(&mut self) -> Result<Box<dyn BenchStream>> {
        match self {
            ClientConnection::Quic(c) => Ok(Box::new(c.open_stream().await?)),
            ClientConnection::Tls(c) => Ok(Box::new(c.take_stream()?)),
        }
    }

    pub fn path_summary(&self) -> Option<PathSummary> {
        match self {
            ClientConnection::Quic(c) => Some(quic::path_summary(c.connection())),
            ClientConnection::Tls(_) => None,
        }
    }

    /// Close the connection and wait for the close to reach the peer.
    pub async fn close(self) {
        match self {
            ClientConnection::Quic(c) => c.close().await,
            ClientConnection::Tls(_) => {}
        }
    }
}

/// Bound server socket.
pub enum Listener {
    Quic(quic::QuicListener),
    Tls(tls::TlsListener),
}

impl Listener {
    pub async fn bind(
        transport: Transport,
        addr: SocketAddr,
        identity: &Identity,
        settings: &TransportSettings,
    ) -> Result<Self> {
        let listener = match transport {
            Transport::Quic => Listener::Quic(quic::QuicListener::bind(addr, identity, settings)?),
            Transport::Tls => Listener::Tls(tls::TlsListener::bind(addr, identity, settings)?),
        };
        info!(
            "{} server listening on {}",
            transport,
            listener.local_addr()?
        );
        Ok(listener)
    }

    pub fn transport(&self) -> Transport {
        match self {
            Listener::Quic(_) => Transport::Quic,
            Listener::Tls(_) => Transport::Tls,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        match self {
            Listener::Quic(l) => l.local_addr(),
            Listener::Tls(l) => l.local_addr(),
        }
    }

    /// Wait for the next incoming connection. An error means the listener
    /// itself is no longer usable.
    pub async fn accept(&self) -> Result<Incoming> {
        match self {
            Listener::Quic(l) => l.accept().await.map(Incoming::Quic),
            Listener::Tls(l) => l.accept().await.map(Incoming::Tls),
        }
    }
}

/// A connection attempt that has not finished its handshake yet.
pub enum Incoming {
    Quic(quinn::Incoming),
    Tls(tls::TlsIncoming),
}

impl Incoming {
    pub fn remote_addr(&self) -> SocketAddr {
        match self {
            Incoming::Quic(i) => i.remote_address(),
            Incoming::Tls(i) => i.remote_addr(),
        }
    }

    /// Complete the handshake, bounded by `timeout`.
    pub async fn establish(self, timeout: Duration) -> Result<ServerConnection> {
        let addr = self.remote_addr();
        let handshake = async {
            match self {
                Incoming::Quic(i) => i
                    .await
                    .map(ServerConnection::Quic)
                    .map_err(Error::from),
                Incoming::Tls(i) => i
                    .handshake()
                    .await
                    .map(|stream| ServerConnection::Tls(tls::TlsServer::new(stream, addr))),
            }
        };
        tokio::time::timeout(timeout, handshake)
            .await
            .map_err(|_| Error::HandshakeTimeout { addr, timeout })?
    }
}

/// Server side of an established connection.
pub enum ServerConnection {
    Quic(quinn::Connection),
    Tls(tls::TlsServer),
}

impl ServerConnection {
    pub fn remote_addr(&self) -> SocketAddr {
        match self {
            ServerConnection::Quic(c) => c.remote_address(),
            ServerConnection::Tls(c) => c.remote_addr(),
        }
    }

    /// Wait for the peer's next stream. `None` once the peer is done with
    /// the connection.
    pub async fn accept_stream(&mut self) -> Result<Option<Box<dyn BenchStream>>> {
        match self {
            ServerConnection::Quic(c) => Ok(quic::accept_stream(c)
                .await?
                .map(|s| Box::new(s) as Box<dyn BenchStream>)),
            ServerConnection::Tls(c) => Ok(c
                .take_stream()
                .map(|s| Box::new(s) as Box<dyn BenchStream>)),
        }
    }

    pub fn path_summary(&self) -> Option<PathSummary> {
        match self {
            ServerConnection::Quic(c) => Some(quic::path_summary(c)),
            ServerConnection::Tls(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_from_str() {
        assert_eq!("quic".parse::<Transport>(), Ok(Transport::Quic));
        assert_eq!("QUIC".parse::<Transport>(), Ok(Transport::Quic));
        assert_eq!("tls".parse::<Transport>(), Ok(Transport::Tls));
        assert_eq!("tcp".parse::<Transport>(), Ok(Transport::Tls));
        assert!("udp".parse::<Transport>().is_err());
    }

    #[test]
    fn test_default_settings() {
        let settings = TransportSettings::default();
        assert_eq!(settings.handshake_timeout, Duration::from_secs(5));
        assert_eq!(settings.receive_window, 1 << 30);
        assert!(!settings.insecure_skip_verify);
    }

    #[tokio::test]
    async fn test_connect_requires_explicit_insecure() {
        let settings = TransportSettings::default();
        let addr = "127.0.0.1:9".parse().unwrap();
        let err = ClientConnection::connect(Transport::Quic, addr, &settings)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Setup(_)));
    }
}
