//! Benchmark wire protocol
//!
//! One exchange runs over one freshly opened stream:
//!
//! ```text
//! Initiator                                  Responder
//!   │── download size (u64, big-endian) ──────>│
//!   │── upload payload (16 KiB chunks) ───────>│  read and discarded
//!   │── FIN (send side only) ─────────────────>│  EOF ends the upload
//!   │<──────────── download payload ───────────│  exactly `download size`
//!   │<──────────── FIN ────────────────────────│
//! ```
//!
//! There is no other framing. The upload length is implied by the FIN, the
//! download length by the header. Reading fewer or more download bytes than
//! requested is a [`ProtocolViolation`].

use std::io;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::trace;

use crate::error::{Error, ProtocolViolation, Result};
use crate::transport::{BenchStream, HalfClose};

/// Size of the control header.
pub const HEADER_LEN: usize = 8;

/// Largest single write or read.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Byte counts requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransferSpec {
    pub upload_bytes: u64,
    pub download_bytes: u64,
}

impl TransferSpec {
    pub fn new(upload_bytes: u64, download_bytes: u64) -> Self {
        Self {
            upload_bytes,
            download_bytes,
        }
    }
}

/// Outcome of one exchange, from either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exchange {
    pub upload_bytes: u64,
    pub download_bytes: u64,
    pub upload_took: Duration,
    pub download_took: Duration,
}

/// Direction of transfer, named from the client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

/// Hooks called by the copy loops around every chunk.
pub trait TransferObserver {
    /// Called before each chunked write or read.
    fn before_chunk(&mut self, _direction: Direction) {}

    /// Called after `bytes` moved in `direction`.
    fn on_bytes(&mut self, _direction: Direction, _bytes: u64) {}
}

impl TransferObserver for () {}

/// Run the client side of an exchange on `stream`.
pub async fn initiate<S, O>(
    stream: &mut S,
    spec: TransferSpec,
    observer: &mut O,
) -> Result<Exchange>
where
    S: BenchStream + ?Sized,
    O: TransferObserver + ?Sized,
{
    trace!(
        "stream {}: requesting {} bytes, sending {}",
        stream.id(),
        spec.download_bytes,
        spec.upload_bytes
    );
    let upload_start = Instant::now();
    stream.write_all(&spec.download_bytes.to_be_bytes()).await?;
    send(stream, spec.upload_bytes, Direction::Upload, observer).await?;
    trace!(
        "stream {}: upload done, closing send side ({:?})",
        stream.id(),
        stream.half_close()
    );
    stream.close_send().await?;
    let upload_took = upload_start.elapsed();

    let download_start = Instant::now();
    receive_exact(stream, spec.download_bytes, observer).await?;
    let download_took = download_start.elapsed();

    Ok(Exchange {
        upload_bytes: spec.upload_bytes,
        download_bytes: spec.download_bytes,
        upload_took,
        download_took,
    })
}

/// Run the server side of an exchange on `stream`.
pub async fn respond<S, O>(stream: &mut S, observer: &mut O) -> Result<Exchange>
where
    S: BenchStream + ?Sized,
    O: TransferObserver + ?Sized,
{
    let download_bytes = read_header(stream).await?;
    trace!("stream {}: peer requested {} bytes", stream.id(), download_bytes);

    let upload_start = Instant::now();
    let upload_bytes = drain(stream, observer).await?;
    let upload_took = upload_start.elapsed();

    let download_start = Instant::now();
    send(stream, download_bytes, Direction::Download, observer).await?;
    trace!(
        "stream {}: download sent, closing send side ({:?})",
        stream.id(),
        stream.half_close()
    );
    stream.close_send().await?;
    let download_took = download_start.elapsed();

    Ok(Exchange {
        upload_bytes,
        download_bytes,
        upload_took,
        download_took,
    })
}

/// EOF. With emulated half-close this includes a TLS peer that dropped TCP
/// without `close_notify`.
fn read_or_eof(res: io::Result<usize>, half_close: HalfClose) -> io::Result<usize> {
    match res {
        Err(e) if half_close == HalfClose::Emulated && e.kind() == io::ErrorKind::UnexpectedEof => {
            Ok(0)
        }
        other => other,
    }
}

/// Read errors meaning the peer or its connection went away.
fn is_stream_lost(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotConnected
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

async fn read_header<S>(stream: &mut S) -> Result<u64>
where
    S: BenchStream + ?Sized,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = read_or_eof(stream.read(&mut header[filled..]).await, stream.half_close())?;
        if n == 0 {
            return Err(ProtocolViolation::TruncatedHeader { got: filled }.into());
        }
        filled += n;
    }
    Ok(u64::from_be_bytes(header))
}

async fn send<S, O>(stream: &mut S, total: u64, direction: Direction, observer: &mut O) -> Result<()>
where
    S: BenchStream + ?Sized,
    O: TransferObserver + ?Sized,
{
    let buf = vec![0u8; CHUNK_SIZE];
    let mut remaining = total;
    while remaining > 0 {
        observer.before_chunk(direction);
        let len = remaining.min(CHUNK_SIZE as u64) as usize;
        let n = stream.write(&buf[..len]).await?;
        if n == 0 {
            return Err(io::Error::from(io::ErrorKind::WriteZero).into());
        }
        remaining -= n as u64;
        observer.on_bytes(direction, n as u64);
    }
    Ok(())
}

/// Read until EOF, returning the byte count.
async fn drain<S, O>(stream: &mut S, observer: &mut O) -> Result<u64>
where
    S: BenchStream + ?Sized,
    O: TransferObserver + ?Sized,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        observer.before_chunk(Direction::Upload);
        let n = read_or_eof(stream.read(&mut buf).await, stream.half_close())?;
        if n == 0 {
            return Ok(total);
        }
        total += n as u64;
        observer.on_bytes(Direction::Upload, n as u64);
    }
}

/// Read exactly `expected` bytes followed by EOF.
async fn receive_exact<S, O>(stream: &mut S, expected: u64, observer: &mut O) -> Result<()>
where
    S: BenchStream + ?Sized,
    O: TransferObserver + ?Sized,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut remaining = expected;
    loop {
        if remaining > 0 {
            observer.before_chunk(Direction::Download);
        }
        let n = match stream.read(&mut buf).await {
            Ok(n) => n as u64,
            Err(source) if remaining > 0 && is_stream_lost(&source) => {
                return Err(Error::StreamLost {
                    violation: ProtocolViolation::InsufficientData {
                        expected,
                        got: expected - remaining,
                    },
                    source,
                });
            }
            Err(e) => read_or_eof(Err(e), stream.half_close())? as u64,
        };
        if n == 0 {
            if remaining == 0 {
                return Ok(());
            }
            return Err(ProtocolViolation::InsufficientData {
                expected,
                got: expected - remaining,
            }
            .into());
        }
        if n > remaining {
            return Err(ProtocolViolation::ExcessData {
                expected,
                got: expected - remaining + n,
            }
            .into());
        }
        remaining -= n;
        observer.on_bytes(Direction::Download, n);
    }
}
