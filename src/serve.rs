//! Server mode implementation
//!
//! Listens for connections and answers every stream on them. Each connection
//! and each stream runs in its own task, so a failing peer only ends its own
//! handler.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cert;
use crate::error::Result;
use crate::protocol;
use crate::size::{bandwidth_to_human, bytes_to_human};
use crate::trace::{self, ConnectionTrace, Role, TraceEvent};
use crate::transport::{
    BenchStream, Incoming, Listener, ServerConnection, Transport, TransportSettings,
};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub transport: Transport,
    pub settings: TransportSettings,
    pub trace_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 4433)),
            transport: Transport::default(),
            settings: TransportSettings::default(),
            trace_dir: None,
        }
    }
}

pub struct Server {
    config: ServerConfig,
    listener: Listener,
}

impl Server {
    /// Generate the server identity and bind the listener.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let identity = cert::generate_identity()?;
        let listener =
            Listener::bind(config.transport, config.listen, &identity, &config.settings).await?;
        Ok(Self { config, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) -> Result<()> {
        let transport = self.listener.transport();
        let handshake_timeout = self.config.settings.handshake_timeout;
        let trace_dir = self.config.trace_dir;

        loop {
            let incoming = self.listener.accept().await?;
            debug!("Incoming connection from {}", incoming.remote_addr());

            let trace_dir = trace_dir.clone();
            tokio::spawn(async move {
                handle_connection(incoming, transport, handshake_timeout, trace_dir).await;
            });
        }
    }
}

async fn handle_connection(
    incoming: Incoming,
    transport: Transport,
    handshake_timeout: Duration,
    trace_dir: Option<PathBuf>,
) {
    let remote = incoming.remote_addr();
    let mut conn = match incoming.establish(handshake_timeout).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!("Handshake with {} failed: {}", remote, e);
            return;
        }
    };
    info!("{} connection from {}", transport, remote);

    let trace = trace::start(trace_dir.as_deref(), Role::Server);
    trace::emit(&trace, TraceEvent::ConnectionStarted { transport, remote });

    let mut streams = JoinSet::new();
    loop {
        match conn.accept_stream().await {
            Ok(Some(stream)) => {
                streams.spawn(handle_stream(stream, remote, trace.clone()));
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Connection from {} failed: {}", remote, e);
                break;
            }
        }
    }
    while streams.join_next().await.is_some() {}

    finish_connection(&conn, &trace);
}

fn finish_connection(conn: &ServerConnection, trace: &Option<Arc<ConnectionTrace>>) {
    debug!("Connection from {} finished", conn.remote_addr());
    trace::emit(
        trace,
        TraceEvent::ConnectionClosed {
            path: conn.path_summary(),
        },
    );
}

async fn handle_stream(
    mut stream: Box<dyn BenchStream>,
    remote: SocketAddr,
    trace: Option<Arc<ConnectionTrace>>,
) {
    let id = stream.id();
    trace::emit(&trace, TraceEvent::StreamOpened { stream: id });

    match protocol::respond(stream.as_mut(), &mut ()).await {
        Ok(exchange) => {
            info!(
                "{} stream {}: received {} in {:.2}s ({}), sent {} in {:.2}s ({})",
                remote,
                id,
                bytes_to_human(exchange.upload_bytes),
                exchange.upload_took.as_secs_f64(),
                bandwidth_to_human(exchange.upload_bytes, exchange.upload_took),
                bytes_to_human(exchange.download_bytes),
                exchange.download_took.as_secs_f64(),
                bandwidth_to_human(exchange.download_bytes, exchange.download_took),
            );
            trace::emit(
                &trace,
                TraceEvent::ExchangeComplete {
                    stream: id,
                    upload_bytes: exchange.upload_bytes,
                    download_bytes: exchange.download_bytes,
                    upload_ms: exchange.upload_took.as_millis() as u64,
                    download_ms: exchange.download_took.as_millis() as u64,
                },
            );
        }
        Err(e) => {
            warn!("{} stream {} failed: {}", remote, id, e);
            trace::emit(
                &trace,
                TraceEvent::ExchangeFailed {
                    stream: id,
                    error: e.to_string(),
                },
            );
        }
    }
}
