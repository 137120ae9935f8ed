//! Configuration file support
//!
//! Loads configuration from ~/.config/perf/config.toml. Every value is
//! optional; command-line flags take precedence.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::size::parse_size;
use crate::transport::{Transport, TransportSettings};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub client: ClientDefaults,

    #[serde(default)]
    pub server: ServerDefaults,

    #[serde(default)]
    pub transport: TransportDefaults,
}

/// Default settings for client mode
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientDefaults {
    /// Server address (host:port)
    pub server_address: Option<String>,

    /// Bytes to upload (e.g., "10M")
    pub upload_bytes: Option<String>,

    /// Bytes to download (e.g., "10M")
    pub download_bytes: Option<String>,

    /// Transport (quic, tls)
    pub transport: Option<Transport>,

    /// Interval between progress records (e.g., "1s", "500ms")
    pub interval: Option<String>,

    /// Overall run deadline (e.g., "30s")
    pub deadline: Option<String>,

    /// Log file path (null to disable)
    pub log_file: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    pub log_level: Option<String>,
}

/// Default settings for server mode
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerDefaults {
    /// Listen address (e.g., "0.0.0.0:4433")
    pub listen: Option<String>,

    /// Transport (quic, tls)
    pub transport: Option<Transport>,

    /// Log file path (null to disable)
    pub log_file: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    pub log_level: Option<String>,
}

/// Transport tuning shared by both modes
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TransportDefaults {
    /// Handshake timeout (e.g., "5s")
    pub handshake_timeout: Option<String>,

    /// QUIC connection receive window (e.g., "1G")
    pub receive_window: Option<String>,

    /// QUIC per-stream receive window
    pub stream_receive_window: Option<String>,

    /// QUIC send window
    pub send_window: Option<String>,

    /// Concurrent QUIC streams a peer may open
    pub max_concurrent_streams: Option<u32>,

    /// QUIC keep-alive interval, "0s" to disable
    pub keep_alive_interval: Option<String>,

    /// Disable Nagle on TCP
    pub tcp_nodelay: Option<bool>,

    /// TCP socket buffer size (e.g., "4M")
    pub socket_buffer_size: Option<String>,

    /// NSS key log file
    pub key_log_file: Option<String>,

    /// Trace directory, overridden by QLOGDIR
    pub trace_dir: Option<String>,
}

fn duration(field: &str, value: &str) -> anyhow::Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| anyhow::anyhow!("invalid {} '{}': {}", field, value, e))
}

fn size(field: &str, value: &str) -> anyhow::Result<u64> {
    parse_size(value).map_err(|e| anyhow::anyhow!("invalid {}: {}", field, e))
}

impl TransportDefaults {
    /// Overlay the configured values onto `settings`.
    pub fn apply(&self, settings: &mut TransportSettings) -> anyhow::Result<()> {
        if let Some(v) = &self.handshake_timeout {
            settings.handshake_timeout = duration("handshake_timeout", v)?;
        }
        if let Some(v) = &self.receive_window {
            settings.receive_window = size("receive_window", v)?;
        }
        if let Some(v) = &self.stream_receive_window {
            settings.stream_receive_window = size("stream_receive_window", v)?;
        }
        if let Some(v) = &self.send_window {
            settings.send_window = size("send_window", v)?;
        }
        if let Some(v) = self.max_concurrent_streams {
            settings.max_concurrent_streams = v;
        }
        if let Some(v) = &self.keep_alive_interval {
            let interval = duration("keep_alive_interval", v)?;
            settings.keep_alive_interval = (!interval.is_zero()).then_some(interval);
        }
        if let Some(v) = self.tcp_nodelay {
            settings.tcp_nodelay = v;
        }
        if let Some(v) = &self.socket_buffer_size {
            settings.socket_buffer_size = Some(size("socket_buffer_size", v)? as usize);
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from the default path.
    /// Returns default config if file doesn't exist.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents)
                .map_err(|e| anyhow::anyhow!("invalid config {}: {}", path.display(), e))
        } else {
            Ok(Self::default())
        }
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("perf")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.client.server_address.is_none());
        assert!(config.server.listen.is_none());
        assert!(config.transport.handshake_timeout.is_none());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[client]
server_address = "10.0.0.2:4433"
upload_bytes = "10M"
download_bytes = "1G"
transport = "tls"
interval = "500ms"

[server]
listen = "[::]:4433"
transport = "quic"
log_level = "debug"

[transport]
handshake_timeout = "2s"
receive_window = "64M"
max_concurrent_streams = 16
keep_alive_interval = "0s"
tcp_nodelay = false
socket_buffer_size = "4M"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(
            config.client.server_address.as_deref(),
            Some("10.0.0.2:4433")
        );
        assert_eq!(config.client.transport, Some(Transport::Tls));
        assert_eq!(config.server.transport, Some(Transport::Quic));
        assert_eq!(config.server.log_level.as_deref(), Some("debug"));

        let mut settings = TransportSettings::default();
        config.transport.apply(&mut settings).unwrap();
        assert_eq!(settings.handshake_timeout, Duration::from_secs(2));
        assert_eq!(settings.receive_window, 64 * 1024 * 1024);
        assert_eq!(settings.stream_receive_window, 1 << 30);
        assert_eq!(settings.max_concurrent_streams, 16);
        assert_eq!(settings.keep_alive_interval, None);
        assert!(!settings.tcp_nodelay);
        assert_eq!(settings.socket_buffer_size, Some(4 * 1024 * 1024));
    }

    #[test]
    fn test_invalid_size_is_reported() {
        let config: Config = toml::from_str("[transport]\nsend_window = \"lots\"\n").unwrap();
        let err = config
            .transport
            .apply(&mut TransportSettings::default())
            .unwrap_err();
        assert!(err.to_string().contains("send_window"));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert!(config.client.upload_bytes.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[client]\nupload_bytes = \"1K\"\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.client.upload_bytes.as_deref(), Some("1K"));
    }
}
