//! Process-lookup capability contract.
//!
//! The daemon never inspects the kernel itself: every query is answered by a
//! [`ProcessLookup`] implementation handed to the server at construction.
//! [`SystemLookup`](crate::procfs::SystemLookup) is the default one on Linux.

use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;

/// Owner of a socket, as returned by a lookup.
///
/// `found == false` is a normal outcome: the socket identifier was valid but no
/// owning process could be attributed. Such records carry zeroed fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    /// Real user id of the owning process
    pub uid: u32,
    /// Process id
    pub pid: u32,
    /// Parent process id
    pub parent_pid: u32,
    /// Path of the executable
    pub exe_path: String,
    /// Command line, arguments joined by single spaces
    pub cmd_line: String,
    /// Whether an owner was found
    pub found: bool,
}

impl ProcessInfo {
    /// Create a record for a resolved owner.
    pub fn new(
        uid: u32,
        pid: u32,
        parent_pid: u32,
        exe_path: impl Into<String>,
        cmd_line: impl Into<String>,
    ) -> Self {
        Self {
            uid,
            pid,
            parent_pid,
            exe_path: exe_path.into(),
            cmd_line: cmd_line.into(),
            found: true,
        }
    }

    /// Record for a socket with no attributable owner.
    pub fn not_found() -> Self {
        Self::default()
    }
}

/// A validated lookup, one variant per wire command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupQuery {
    Unix { path: String },
    Tcp {
        src_port: u16,
        dst_addr: IpAddr,
        dst_port: u16,
    },
    Udp { src_port: u16 },
}

impl fmt::Display for LookupQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupQuery::Unix { path } => write!(f, "unix:{}", path),
            LookupQuery::Tcp {
                src_port,
                dst_addr,
                dst_port,
            } => match dst_addr {
                IpAddr::V4(addr) => write!(f, "tcp:{}->{}:{}", src_port, addr, dst_port),
                IpAddr::V6(addr) => write!(f, "tcp:{}->[{}]:{}", src_port, addr, dst_port),
            },
            LookupQuery::Udp { src_port } => write!(f, "udp:{}", src_port),
        }
    }
}

/// Resolves socket identifiers to their owning process.
///
/// Implementations are shared by every session, so they must tolerate
/// concurrent calls. A missing socket or owner is reported as
/// [`ProcessInfo::not_found`]; `Err` is reserved for failures of the lookup
/// itself (e.g. an unreadable `/proc`).
pub trait ProcessLookup: Send + Sync {
    /// Find the process bound to a UNIX socket path.
    fn lookup_unix(&self, path: &str) -> Result<ProcessInfo>;

    /// Find the process owning the TCP connection from local `src_port` to
    /// `dst_addr:dst_port`.
    fn lookup_tcp(&self, src_port: u16, dst_addr: IpAddr, dst_port: u16) -> Result<ProcessInfo>;

    /// Find the process bound to local UDP `src_port`.
    fn lookup_udp(&self, src_port: u16) -> Result<ProcessInfo>;

    /// Route a [`LookupQuery`] to the matching operation.
    fn lookup(&self, query: &LookupQuery) -> Result<ProcessInfo> {
        match query {
            LookupQuery::Unix { path } => self.lookup_unix(path),
            LookupQuery::Tcp {
                src_port,
                dst_addr,
                dst_port,
            } => self.lookup_tcp(*src_port, *dst_addr, *dst_port),
            LookupQuery::Udp { src_port } => self.lookup_udp(*src_port),
        }
    }
}
