//! Progress and summary records
//!
//! [`Reporter`] observes both copy loops. Every `interval` it emits an
//! intermediary [`Sample`] for the direction being pumped, and at the end a
//! single final sample with the totals. Records are written as JSON lines.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::protocol::{Direction, TransferObserver};

/// Default spacing of intermediary samples.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// One output record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum Sample {
    /// Bytes moved in one direction during the interval, which lasted
    /// `time_seconds`.
    Intermediary {
        time_seconds: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        upload_bytes: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        download_bytes: Option<u64>,
    },
    /// Totals for the run. `time_seconds` covers connection setup through
    /// the end of the download.
    Final {
        time_seconds: f64,
        upload_bytes: u64,
        download_bytes: u64,
    },
}

impl Sample {
    fn intermediary(direction: Direction, elapsed: Duration, bytes: u64) -> Self {
        let (upload_bytes, download_bytes) = match direction {
            Direction::Upload => (Some(bytes), None),
            Direction::Download => (None, Some(bytes)),
        };
        Sample::Intermediary {
            time_seconds: elapsed.as_secs_f64(),
            upload_bytes,
            download_bytes,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Sample::Final { .. })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Debug, Default)]
struct IntervalCounter {
    since: Option<Instant>,
    bytes: u64,
    total: u64,
}

/// Writes samples to `out` while a transfer runs.
pub struct Reporter<W: Write> {
    out: W,
    interval: Duration,
    started: Instant,
    upload: IntervalCounter,
    download: IntervalCounter,
}

impl<W: Write> Reporter<W> {
    /// `started` is the start of the run, taken before connecting.
    pub fn new(out: W, started: Instant, interval: Duration) -> Self {
        Self {
            out,
            interval,
            started,
            upload: IntervalCounter::default(),
            download: IntervalCounter::default(),
        }
    }

    fn counter(&mut self, direction: Direction) -> &mut IntervalCounter {
        match direction {
            Direction::Upload => &mut self.upload,
            Direction::Download => &mut self.download,
        }
    }

    fn write_sample(&mut self, sample: &Sample) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, sample)?;
        self.out.write_all(b"\n")?;
        self.out.flush()
    }

    /// Emit the final sample and return it.
    pub fn finish(&mut self) -> io::Result<Sample> {
        let sample = Sample::Final {
            time_seconds: self.started.elapsed().as_secs_f64(),
            upload_bytes: self.upload.total,
            download_bytes: self.download.total,
        };
        self.write_sample(&sample)?;
        Ok(sample)
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> TransferObserver for Reporter<W> {
    fn before_chunk(&mut self, direction: Direction) {
        let interval = self.interval;
        let counter = self.counter(direction);
        let now = Instant::now();
        let Some(since) = counter.since else {
            counter.since = Some(now);
            return;
        };

        let elapsed = now.duration_since(since);
        if elapsed < interval {
            return;
        }
        let sample = Sample::intermediary(direction, elapsed, counter.bytes);
        counter.bytes = 0;
        counter.since = Some(now);

        if let Err(e) = self.write_sample(&sample) {
            warn!("Failed to write {} sample: {}", direction, e);
        }
    }

    fn on_bytes(&mut self, direction: Direction, bytes: u64) {
        let counter = self.counter(direction);
        counter.bytes += bytes;
        counter.total += bytes;
    }
}
