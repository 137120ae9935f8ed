//! Per-connection trace capture
//!
//! When `QLOGDIR` is set, every connection writes a JSON-lines trace named
//! `log_<connection id>_<role>.qlog` into that directory. Each line is a
//! timestamped benchmark event.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::transport::{PathSummary, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Server,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    ConnectionStarted {
        transport: Transport,
        remote: SocketAddr,
    },
    StreamOpened {
        stream: u64,
    },
    ExchangeComplete {
        stream: u64,
        upload_bytes: u64,
        download_bytes: u64,
        upload_ms: u64,
        download_ms: u64,
    },
    ExchangeFailed {
        stream: u64,
        error: String,
    },
    ConnectionClosed {
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<PathSummary>,
    },
}

#[derive(Debug, Serialize)]
struct TraceEntry {
    ts: DateTime<Utc>,
    #[serde(flatten)]
    event: TraceEvent,
}

/// Trace file for one connection.
#[derive(Debug)]
pub struct ConnectionTrace {
    file: Mutex<File>,
    path: PathBuf,
}

impl ConnectionTrace {
    pub fn create(dir: &Path, connection_id: &str, role: Role) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("log_{}_{}.qlog", connection_id, role));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&self, event: TraceEvent) {
        let entry = TraceEntry {
            ts: Utc::now(),
            event,
        };
        let line = serde_json::to_string(&entry).unwrap_or_else(|_| "{}".to_string());
        if let Err(e) = writeln!(self.file.lock(), "{}", line) {
            warn!("Failed to write trace {}: {}", self.path.display(), e);
        }
    }
}

/// Start a trace for a new connection. Tracing is best-effort: a file that
/// cannot be created is logged and the connection proceeds untraced.
pub fn start(dir: Option<&Path>, role: Role) -> Option<Arc<ConnectionTrace>> {
    let dir = dir?;
    let id = Uuid::new_v4().simple().to_string();
    match ConnectionTrace::create(dir, &id, role) {
        Ok(trace) => {
            info!("Created trace file: {}", trace.path().display());
            Some(Arc::new(trace))
        }
        Err(e) => {
            warn!("Failed to create trace file in {}: {}", dir.display(), e);
            None
        }
    }
}

/// Log to an optional trace.
pub fn emit(trace: &Option<Arc<ConnectionTrace>>, event: TraceEvent) {
    if let Some(trace) = trace {
        trace.log(event);
    }
}
