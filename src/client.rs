//! Client mode implementation
//!
//! Connects to a server, runs one exchange on one stream and reports it.

use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::net;
use crate::protocol::{self, Exchange, TransferSpec};
use crate::size::{bytes_to_human, rate_to_human};
use crate::stats::{DEFAULT_REPORT_INTERVAL, Reporter, Sample};
use crate::trace::{self, Role, TraceEvent};
use crate::transport::{ClientConnection, Transport, TransportSettings};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port` of the server.
    pub address: String,
    pub transport: Transport,
    pub spec: TransferSpec,
    pub settings: TransportSettings,
    pub report_interval: Duration,
    /// Bound on the whole run, connection setup included.
    pub deadline: Option<Duration>,
    pub trace_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:4433".to_string(),
            transport: Transport::default(),
            spec: TransferSpec::default(),
            settings: TransportSettings::default(),
            report_interval: DEFAULT_REPORT_INTERVAL,
            deadline: None,
            trace_dir: None,
        }
    }
}

/// Result of a successful client run.
#[derive(Debug, Clone, Copy)]
pub struct RunReport {
    pub exchange: Exchange,
    /// The final record, as written to the output.
    pub record: Sample,
}

pub struct Client {
    config: ClientConfig,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Run one exchange, writing JSON records to `out`.
    pub async fn run<W: Write + Send>(&self, out: W) -> Result<RunReport> {
        let started = Instant::now();
        match self.config.deadline {
            Some(deadline) => tokio::time::timeout(deadline, self.run_inner(started, out))
                .await
                .map_err(|_| Error::Deadline(deadline))?,
            None => self.run_inner(started, out).await,
        }
    }

    async fn run_inner<W: Write + Send>(&self, started: Instant, out: W) -> Result<RunReport> {
        let config = &self.config;
        info!("Connecting to {} via {}...", config.address, config.transport);

        let addr = net::resolve(&config.address)
            .await
            .map_err(|e| Error::setup(format!("cannot resolve {}: {}", config.address, e)))?;
        let mut conn = ClientConnection::connect(config.transport, addr, &config.settings).await?;

        let trace = trace::start(config.trace_dir.as_deref(), Role::Client);
        trace::emit(
            &trace,
            TraceEvent::ConnectionStarted {
                transport: conn.transport(),
                remote: conn.remote_addr(),
            },
        );

        let mut stream = conn.open_stream().await?;
        let stream_id = stream.id();
        trace::emit(&trace, TraceEvent::StreamOpened { stream: stream_id });

        let mut reporter = Reporter::new(out, started, config.report_interval);
        let exchange = match protocol::initiate(stream.as_mut(), config.spec, &mut reporter).await
        {
            Ok(exchange) => exchange,
            Err(e) => {
                trace::emit(
                    &trace,
                    TraceEvent::ExchangeFailed {
                        stream: stream_id,
                        error: e.to_string(),
                    },
                );
                trace::emit(
                    &trace,
                    TraceEvent::ConnectionClosed {
                        path: conn.path_summary(),
                    },
                );
                return Err(e);
            }
        };
        let record = reporter.finish()?;

        info!(
            "uploaded {}: {:.2}s ({})",
            bytes_to_human(exchange.upload_bytes),
            exchange.upload_took.as_secs_f64(),
            rate_to_human(exchange.upload_bytes, exchange.upload_took)
        );
        info!(
            "downloaded {}: {:.2}s ({})",
            bytes_to_human(exchange.download_bytes),
            exchange.download_took.as_secs_f64(),
            rate_to_human(exchange.download_bytes, exchange.download_took)
        );

        trace::emit(
            &trace,
            TraceEvent::ExchangeComplete {
                stream: stream_id,
                upload_bytes: exchange.upload_bytes,
                download_bytes: exchange.download_bytes,
                upload_ms: exchange.upload_took.as_millis() as u64,
                download_ms: exchange.download_took.as_millis() as u64,
            },
        );
        drop(stream);

        let path = conn.path_summary();
        if let Some(path) = &path
            && path.lost_packets > 0
        {
            warn!("{} packets lost during the run", path.lost_packets);
        }
        trace::emit(&trace, TraceEvent::ConnectionClosed { path });
        conn.close().await;

        Ok(RunReport { exchange, record })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.transport, Transport::Quic);
        assert_eq!(config.spec, TransferSpec::new(0, 0));
        assert_eq!(config.report_interval, Duration::from_secs(1));
        assert!(config.deadline.is_none());
    }

    #[tokio::test]
    async fn test_unresolvable_address_is_setup_error() {
        let client = Client::new(ClientConfig {
            address: "not an address".to_string(),
            ..Default::default()
        });
        let err = client.run(Vec::new()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Setup);
    }

    #[tokio::test]
    async fn test_deadline() {
        let client = Client::new(ClientConfig {
            address: "127.0.0.1:9".to_string(),
            settings: TransportSettings {
                insecure_skip_verify: true,
                handshake_timeout: Duration::from_secs(30),
                ..Default::default()
            },
            deadline: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let err = client.run(Vec::new()).await.unwrap_err();
        assert!(matches!(err, Error::Deadline(_)));
    }
}
