//! Error types
//!
//! Protocol violations are kept apart from transport failures: the former mean
//! the peer did not honor the byte count it was asked for, the latter mean the
//! network or the local stack gave up.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The peer broke the length contract of the benchmark protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("peer sent insufficient data: expected {expected}, got {got}")]
    InsufficientData { expected: u64, got: u64 },
    #[error("peer sent excess data: expected {expected}, got at least {got}")]
    ExcessData { expected: u64, got: u64 },
    #[error("stream ended after {got} of 8 header bytes")]
    TruncatedHeader { got: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    /// The stream broke before the peer delivered what it owed.
    #[error("{violation} ({source})")]
    StreamLost {
        violation: ProtocolViolation,
        #[source]
        source: io::Error,
    },

    #[error("handshake with {addr} timed out after {timeout:?}")]
    HandshakeTimeout { addr: SocketAddr, timeout: Duration },

    #[error("failed to connect to {addr}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("run exceeded deadline of {0:?}")]
    Deadline(Duration),

    #[error("setup failed: {0}")]
    Setup(String),

    #[error(transparent)]
    Tls(#[from] rustls::Error),

    #[error(transparent)]
    Certificate(#[from] rcgen::Error),

    #[error(transparent)]
    QuicConnect(#[from] quinn::ConnectError),

    #[error(transparent)]
    QuicConnection(#[from] quinn::ConnectionError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Coarse classification used for logging and exit handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Setup,
    Protocol,
    Transport,
}

impl Error {
    pub fn setup(msg: impl Into<String>) -> Self {
        Error::Setup(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Protocol(_) | Error::StreamLost { .. } => ErrorKind::Protocol,
            Error::Setup(_) | Error::Tls(_) | Error::Certificate(_) | Error::QuicConnect(_) => {
                ErrorKind::Setup
            }
            Error::HandshakeTimeout { .. } | Error::Connect { .. } => ErrorKind::Setup,
            Error::Deadline(_) | Error::QuicConnection(_) | Error::Io(_) => ErrorKind::Transport,
        }
    }

    /// The protocol violation behind this error, if any.
    pub fn violation(&self) -> Option<ProtocolViolation> {
        match self {
            Error::Protocol(v) | Error::StreamLost { violation: v, .. } => Some(*v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_messages() {
        let err = Error::from(ProtocolViolation::InsufficientData {
            expected: 100,
            got: 50,
        });
        assert_eq!(
            err.to_string(),
            "peer sent insufficient data: expected 100, got 50"
        );
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_kinds_are_distinct() {
        let timeout = Error::HandshakeTimeout {
            addr: "127.0.0.1:1".parse().unwrap(),
            timeout: Duration::from_secs(5),
        };
        assert_eq!(timeout.kind(), ErrorKind::Setup);
        assert!(timeout.violation().is_none());

        let io = Error::from(io::Error::from(io::ErrorKind::ConnectionReset));
        assert_eq!(io.kind(), ErrorKind::Transport);
    }

    #[test]
    fn test_stream_lost_keeps_cause() {
        let err = Error::StreamLost {
            violation: ProtocolViolation::InsufficientData {
                expected: 100,
                got: 50,
            },
            source: io::Error::new(io::ErrorKind::NotConnected, "connection lost"),
        };
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(
            err.violation(),
            Some(ProtocolViolation::InsufficientData {
                expected: 100,
                got: 50
            })
        );
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "connection lost");
    }

    #[test]
    fn test_dial_failure_is_setup() {
        let err = Error::Connect {
            addr: "127.0.0.1:1".parse().unwrap(),
            source: io::Error::other("handshake rejected"),
        };
        assert_eq!(err.kind(), ErrorKind::Setup);
    }
}
