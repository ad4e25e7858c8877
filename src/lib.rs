//! # procsnitchd
//!
//! A privileged local daemon that answers "which process owns this socket?"
//! for other processes on the same machine.
//!
//! Callers connect to a UNIX domain socket and send one request per line. The
//! daemon resolves the socket to its owning process through a pluggable
//! [`ProcessLookup`] and answers with the owner's uid, pid, parent pid,
//! executable path and command line.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use procsnitchd::{ServerConfig, SnitchServer, SystemLookup};
//! use std::sync::Arc;
//!
//! fn main() -> anyhow::Result<()> {
//!     let server = SnitchServer::bind(
//!         Arc::new(SystemLookup::new()),
//!         "/run/procsnitchd.sock",
//!         ServerConfig::default(),
//!     )?;
//!     server.serve()
//! }
//! ```
//!
//! ## Protocol Overview
//!
//! **Requests** (`\n` terminated, command name case-insensitive):
//! ```text
//! UNIXINFO /run/app.sock
//! TCPINFO 41234 93.184.216.34 443
//! UDPINFO 5353
//! ```
//!
//! **Response** (`\r\n` terminated):
//! ```text
//! 1000 4242 1 /usr/bin/app app --serve
//! ```
//!
//! Requests that fail validation get no response at all; the connection stays
//! open for the next request.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod lookup;
pub mod procfs;
pub mod protocol;
pub mod server;
pub mod session;

// Re-exports for convenience
pub use client::{RemoteLookup, SnitchClient};
pub use dispatch::Dispatcher;
pub use error::{RequestError, SessionError, StartupError};
pub use lookup::{LookupQuery, ProcessInfo, ProcessLookup};
pub use procfs::SystemLookup;
pub use protocol::{Command, Request};
pub use server::{ServerConfig, ServerHandle, SnitchServer};
pub use session::{Session, SessionSummary};
