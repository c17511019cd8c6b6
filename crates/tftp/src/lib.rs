//! TFTP (Trivial File Transfer Protocol) Implementation
//!
//! This crate provides an RFC 1350 TFTP server engine with support for:
//! - Read requests (RRQ) and write requests (WRQ)
//! - `octet` and `netascii` transfer modes (bytes are moved unchanged)
//! - Timeout-driven retransmission with a configurable retry limit
//! - Path traversal protection for both served directories
//! - Concurrent, fully independent transfers
//!
//! # Organization
//!
//! - [`protocol`] - packet codec ([`Packet`]) and request parser ([`Request`])
//! - [`block`] - [`BlockReader`] / [`BlockWriter`] segmentation and reassembly
//! - [`retry`] - [`AckTracker`] / [`DataTracker`] lock-step bookkeeping
//! - [`session`] - the per-client [`TransferSession`] state machine
//! - [`server`] - the [`TftpServer`] dispatcher
//!
//! # Basic Server Usage
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//!
//! use tftp::{ServerConfig, SessionConfig, run_tftp_server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     run_tftp_server(ServerConfig {
//!         bind_address: "0.0.0.0:69".to_string(),
//!         session: SessionConfig {
//!             read_root: PathBuf::from("/srv/tftp"),
//!             write_root: PathBuf::from("/srv/tftp/incoming"),
//!             ..Default::default()
//!         },
//!         ..Default::default()
//!     })
//!     .await
//! }
//! ```
//!
//! # Working with Packets
//!
//! ```rust
//! use tftp::{Packet, Request, RequestKind, TftpErrorCode};
//!
//! let rrq = Packet::Request(Request::new(RequestKind::Read, "boot.img", "octet"));
//! assert_eq!(Packet::decode(&rrq.encode()).unwrap(), rrq);
//!
//! let error = Packet::error(TftpErrorCode::FileNotFound, "boot.img");
//! assert_eq!(&error.encode()[..4], &[0, 5, 0, 1]);
//! ```

pub mod block;
pub mod error;
pub mod protocol;
pub mod retry;
pub mod server;
pub mod session;
pub mod transfer;

pub use block::*;
pub use error::*;
pub use protocol::*;
pub use retry::*;
pub use server::*;
pub use session::*;
pub use transfer::*;
