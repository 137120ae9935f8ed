//! perf - bulk transfer benchmark over QUIC and TLS/TCP
//!
//! The client uploads a chosen number of bytes and asks the server to send a
//! chosen number back, over one stream of either transport. Both sides time
//! each direction; the client reports progress and totals as JSON lines.
//!
//! # Library Usage
//!
//! ```ignore
//! use perf::{Client, ClientConfig, TransferSpec, TransportSettings};
//!
//! #[tokio::main]
//! async fn main() -> perf::Result<()> {
//!     let config = ClientConfig {
//!         address: "127.0.0.1:4433".to_string(),
//!         spec: TransferSpec::new(10 << 20, 10 << 20),
//!         settings: TransportSettings {
//!             insecure_skip_verify: true,
//!             ..Default::default()
//!         },
//!         ..Default::default()
//!     };
//!
//!     let report = Client::new(config).run(std::io::stdout()).await?;
//!     println!("{}", report.record.to_json());
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`client`] - Client-side run orchestration
//! - [`serve`] - Server accept loop and per-stream handlers
//! - [`protocol`] - Wire protocol and copy loops
//! - [`transport`] - QUIC and TLS/TCP connectors
//! - [`stats`] - Progress and summary records
//! - [`cert`] - Ephemeral server identity

pub mod cert;
pub mod client;
pub mod config;
pub mod error;
pub mod keylog;
pub mod net;
pub mod protocol;
pub mod serve;
pub mod size;
pub mod stats;
pub mod trace;
pub mod transport;

pub use client::{Client, ClientConfig, RunReport};
pub use error::{Error, ErrorKind, ProtocolViolation, Result};
pub use protocol::{Exchange, TransferSpec};
pub use serve::{Server, ServerConfig};
pub use stats::Sample;
pub use transport::{Transport, TransportSettings};
