//! perf - bulk transfer benchmark over QUIC and TLS/TCP

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use perf::client::{Client, ClientConfig};
use perf::config::Config;
use perf::keylog::KeyLogFile;
use perf::protocol::TransferSpec;
use perf::serve::{Server, ServerConfig};
use perf::size::parse_size;
use perf::stats::DEFAULT_REPORT_INTERVAL;
use perf::transport::{Transport, TransportSettings};

const DEFAULT_LISTEN: &str = "0.0.0.0:4433";

/// Initialize logging with optional file output
fn init_logging(log_file: Option<&str>, log_level: Option<&str>) -> anyhow::Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let level = log_level.unwrap_or("info");
    let env_filter =
        EnvFilter::from_default_env().add_directive(format!("perf={}", level).parse()?);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(io::stderr);

    if let Some(file_path) = log_file {
        // Expand tilde to home directory
        let expanded_path = match file_path.strip_prefix("~/") {
            Some(rest) => dirs::home_dir()
                .map(|home| home.join(rest))
                .unwrap_or_else(|| PathBuf::from(file_path)),
            None => PathBuf::from(file_path),
        };

        if let Some(parent) = expanded_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let file_appender = tracing_appender::rolling::daily(
            expanded_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new(".")),
            expanded_path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("perf.log")),
        );
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // Keep guard alive for the duration of the program
        std::mem::forget(guard);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(non_blocking)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "perf")]
#[command(author, version, about = "Bulk transfer benchmark over QUIC and TLS/TCP")]
struct Cli {
    /// Generate shell completions
    #[arg(long, value_name = "SHELL", value_parser = ["bash", "zsh", "fish", "powershell", "elvish"])]
    completions: Option<String>,

    /// Run as server
    #[arg(long, env = "PERF_RUN_SERVER")]
    run_server: bool,

    /// Address to dial (client) or listen on (server), as host:port
    #[arg(long, env = "PERF_SERVER_ADDRESS")]
    server_address: Option<String>,

    /// Bytes to upload (e.g., 10M)
    #[arg(long, value_parser = parse_size, env = "PERF_UPLOAD_BYTES")]
    upload_bytes: Option<u64>,

    /// Bytes to download (e.g., 10M)
    #[arg(long, value_parser = parse_size, env = "PERF_DOWNLOAD_BYTES")]
    download_bytes: Option<u64>,

    /// Transport (quic, tls)
    #[arg(long, env = "PERF_TRANSPORT")]
    transport: Option<Transport>,

    /// Accept the server's self-signed certificate without verification
    #[arg(long, env = "PERF_INSECURE")]
    insecure: bool,

    /// Append TLS secrets to this file in NSS key log format
    #[arg(long, env = "SSLKEYLOGFILE")]
    key_log_file: Option<PathBuf>,

    /// Write per-connection trace files to this directory
    #[arg(long, env = "QLOGDIR")]
    trace_dir: Option<PathBuf>,

    /// Handshake timeout
    #[arg(long, value_parser = parse_duration, env = "PERF_CONNECT_TIMEOUT")]
    connect_timeout: Option<Duration>,

    /// Abort the client run after this long
    #[arg(long, value_parser = parse_duration, env = "PERF_DEADLINE")]
    deadline: Option<Duration>,

    /// Interval between progress records
    #[arg(long, value_parser = parse_duration, env = "PERF_INTERVAL")]
    interval: Option<Duration>,

    /// Log file path (e.g., "~/.local/state/perf/perf.log")
    #[arg(long, env = "PERF_LOG_FILE")]
    log_file: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "PERF_LOG_LEVEL")]
    log_level: Option<String>,
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

fn config_duration(value: Option<&String>) -> Result<Option<Duration>> {
    value
        .map(|v| humantime::parse_duration(v).map_err(|e| anyhow::anyhow!("{}: {}", v, e)))
        .transpose()
}

fn config_size(value: Option<&String>) -> Result<Option<u64>> {
    value
        .map(|v| parse_size(v).map_err(|e| anyhow::anyhow!(e)))
        .transpose()
}

fn generate_completions(shell: &str) {
    use clap::CommandFactory;
    use clap_complete::{Shell, generate};

    let mut cmd = Cli::command();
    let shell = match shell {
        "bash" => Shell::Bash,
        "zsh" => Shell::Zsh,
        "fish" => Shell::Fish,
        "powershell" => Shell::PowerShell,
        "elvish" => Shell::Elvish,
        _ => {
            eprintln!("Unknown shell: {}", shell);
            std::process::exit(1);
        }
    };
    generate(shell, &mut cmd, "perf", &mut io::stdout());
}

fn transport_settings(cli: &Cli, file_config: &Config) -> Result<TransportSettings> {
    let mut settings = TransportSettings::default();
    file_config.transport.apply(&mut settings)?;

    if let Some(timeout) = cli.connect_timeout {
        settings.handshake_timeout = timeout;
    }
    settings.insecure_skip_verify = cli.insecure;

    let key_log = cli.key_log_file.clone().or_else(|| {
        file_config
            .transport
            .key_log_file
            .as_ref()
            .map(PathBuf::from)
    });
    if let Some(path) = key_log {
        let file = KeyLogFile::open(&path)
            .map_err(|e| anyhow::anyhow!("cannot open key log {}: {}", path.display(), e))?;
        settings.key_log = Some(Arc::new(file));
    }
    Ok(settings)
}

async fn run_server(cli: Cli, file_config: Config) -> Result<()> {
    let settings = transport_settings(&cli, &file_config)?;
    let address = cli
        .server_address
        .or_else(|| file_config.server.listen.clone())
        .unwrap_or_else(|| DEFAULT_LISTEN.to_string());
    let listen = perf::net::resolve(&address)
        .await
        .map_err(|e| anyhow::anyhow!("cannot resolve {}: {}", address, e))?;

    let config = ServerConfig {
        listen,
        transport: cli
            .transport
            .or(file_config.server.transport)
            .unwrap_or_default(),
        settings,
        trace_dir: cli.trace_dir.or_else(|| {
            file_config
                .transport
                .trace_dir
                .as_ref()
                .map(PathBuf::from)
        }),
    };

    let server = Server::bind(config).await?;
    server.run().await?;
    Ok(())
}

async fn run_client(cli: Cli, file_config: Config) -> Result<()> {
    let Some(address) = cli
        .server_address
        .clone()
        .or_else(|| file_config.client.server_address.clone())
    else {
        eprintln!("Error: --server-address is required in client mode");
        eprintln!("Usage: perf --server-address <HOST:PORT> [OPTIONS]");
        eprintln!("       perf --run-server [--server-address <HOST:PORT>] [OPTIONS]");
        std::process::exit(1);
    };

    let client_defaults = &file_config.client;
    let spec = TransferSpec::new(
        match cli.upload_bytes {
            Some(n) => n,
            None => config_size(client_defaults.upload_bytes.as_ref())?.unwrap_or(0),
        },
        match cli.download_bytes {
            Some(n) => n,
            None => config_size(client_defaults.download_bytes.as_ref())?.unwrap_or(0),
        },
    );

    let config = ClientConfig {
        address,
        transport: cli
            .transport
            .or(client_defaults.transport)
            .unwrap_or_default(),
        spec,
        settings: transport_settings(&cli, &file_config)?,
        report_interval: match cli.interval {
            Some(interval) => interval,
            None => config_duration(client_defaults.interval.as_ref())?
                .unwrap_or(DEFAULT_REPORT_INTERVAL),
        },
        deadline: match cli.deadline {
            Some(deadline) => Some(deadline),
            None => config_duration(client_defaults.deadline.as_ref())?,
        },
        trace_dir: cli.trace_dir.clone().or_else(|| {
            file_config
                .transport
                .trace_dir
                .as_ref()
                .map(PathBuf::from)
        }),
    };

    Client::new(config).run(io::stdout()).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle shell completions early (before logging init)
    if let Some(ref shell) = cli.completions {
        generate_completions(shell);
        return Ok(());
    }

    let file_config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let (mode_log_file, mode_log_level) = if cli.run_server {
        (&file_config.server.log_file, &file_config.server.log_level)
    } else {
        (&file_config.client.log_file, &file_config.client.log_level)
    };
    let log_file = cli.log_file.as_ref().or(mode_log_file.as_ref());
    let log_level = cli.log_level.as_ref().or(mode_log_level.as_ref());
    init_logging(log_file.map(|s| s.as_str()), log_level.map(|s| s.as_str()))?;

    let result = if cli.run_server {
        run_server(cli, file_config).await
    } else {
        run_client(cli, file_config).await
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_client_flags() {
        let cli = Cli::try_parse_from([
            "perf",
            "--server-address",
            "127.0.0.1:4433",
            "--upload-bytes",
            "10M",
            "--download-bytes",
            "1K",
            "--transport",
            "tls",
            "--insecure",
            "--interval",
            "250ms",
        ])
        .unwrap();
        assert!(!cli.run_server);
        assert_eq!(cli.upload_bytes, Some(10 * 1024 * 1024));
        assert_eq!(cli.download_bytes, Some(1024));
        assert_eq!(cli.transport, Some(Transport::Tls));
        assert!(cli.insecure);
        assert_eq!(cli.interval, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_rejects_bad_size() {
        assert!(Cli::try_parse_from(["perf", "--upload-bytes", "ten"]).is_err());
    }

    #[test]
    fn test_settings_follow_flags() {
        let cli = Cli::try_parse_from(["perf", "--insecure", "--connect-timeout", "2s"]).unwrap();
        let settings = transport_settings(&cli, &Config::default()).unwrap();
        assert!(settings.insecure_skip_verify);
        assert_eq!(settings.handshake_timeout, Duration::from_secs(2));
        assert!(settings.key_log.is_none());
    }
}
