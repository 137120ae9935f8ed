//! Socket helpers: address resolution, TCP listener creation, stream tuning.

use std::io;
use std::net::SocketAddr;

use socket2::{Domain, Protocol, SockAddr, SockRef, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// Resolve `host:port` to the first address it yields.
pub async fn resolve(address: &str) -> io::Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host(address).await?;
    addrs.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", address),
        )
    })
}

/// Create a TCP listener bound to `addr`.
///
/// An unspecified IPv6 address accepts IPv4 peers too.
pub fn create_tcp_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;

    if let SocketAddr::V6(v6) = addr
        && v6.ip().is_unspecified()
    {
        socket.set_only_v6(false)?;
        debug!("Set IPV6_V6ONLY=false for {}", addr);
    }

    socket.bind(&SockAddr::from(addr))?;
    socket.listen(1024)?;

    // Convert to non-blocking for tokio
    socket.set_nonblocking(true)?;
    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

/// Apply Nagle and socket buffer settings. Buffer sizes are advisory: the
/// kernel may clamp them, and a refusal is only logged.
pub fn configure_stream(
    stream: &TcpStream,
    nodelay: bool,
    buffer_size: Option<usize>,
) -> io::Result<()> {
    stream.set_nodelay(nodelay)?;

    if let Some(size) = buffer_size {
        let sock = SockRef::from(stream);
        if let Err(e) = sock.set_send_buffer_size(size) {
            debug!("Failed to set SO_SNDBUF to {}: {}", size, e);
        }
        if let Err(e) = sock.set_recv_buffer_size(size) {
            debug!("Failed to set SO_RCVBUF to {}: {}", size, e);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_literal() {
        let addr = resolve("127.0.0.1:4433").await.unwrap();
        assert_eq!(addr, "127.0.0.1:4433".parse().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let addr = resolve("localhost:4433").await.unwrap();
        assert_eq!(addr.port(), 4433);
        assert!(addr.ip().is_loopback());
    }

    #[tokio::test]
    async fn test_resolve_missing_port_fails() {
        assert!(resolve("127.0.0.1").await.is_err());
    }

    #[tokio::test]
    async fn test_listener_ephemeral_port() {
        let listener = create_tcp_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let local = listener.local_addr().unwrap();
        assert_ne!(local.port(), 0);

        let client = TcpStream::connect(local).await.unwrap();
        configure_stream(&client, true, Some(256 * 1024)).unwrap();
        assert!(client.nodelay().unwrap());
    }
}
