//! Default lookup capability backed by Linux `/proc`.
//!
//! A query is resolved in two steps: the kernel socket tables under
//! `/proc/net` map the socket identifier to an inode, then the `fd`
//! directories of every process are scanned for a `socket:[<inode>]` link.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use tracing::trace;

use crate::lookup::{ProcessInfo, ProcessLookup};

/// Default procfs mount point.
pub const PROC_ROOT: &str = "/proc";

/// [`ProcessLookup`] reading the live kernel tables.
///
/// Holds no mutable state, so one instance can serve every session.
#[derive(Debug, Clone)]
pub struct SystemLookup {
    root: PathBuf,
}

impl Default for SystemLookup {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemLookup {
    pub fn new() -> Self {
        Self::with_root(PROC_ROOT)
    }

    /// Read from an alternative procfs tree.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn net_table(&self, name: &str) -> Result<Option<String>> {
        let path = self.root.join("net").join(name);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    fn inet_inodes(&self, tables: &[(&str, bool)], matches: impl Fn(&InetEntry) -> bool) -> Result<Vec<u64>> {
        let mut inodes = Vec::new();
        for (name, v6) in tables {
            let Some(content) = self.net_table(name)? else {
                continue;
            };
            inodes.extend(
                parse_inet_table(&content, *v6)
                    .into_iter()
                    .filter(|entry| entry.inode != 0 && matches(entry))
                    .map(|entry| entry.inode),
            );
        }
        Ok(inodes)
    }

    /// Resolve the first inode in `inodes` held open by some process.
    fn resolve_owner(&self, inodes: &[u64]) -> Result<ProcessInfo> {
        if inodes.is_empty() {
            return Ok(ProcessInfo::not_found());
        }

        let owners = self.find_socket_owners(inodes)?;
        for inode in inodes {
            if let Some(pid) = owners.get(inode) {
                trace!(inode, pid, "Socket owner found");
                if let Some(info) = self.process_info(*pid) {
                    return Ok(info);
                }
            }
        }
        Ok(ProcessInfo::not_found())
    }

    fn find_socket_owners(&self, inodes: &[u64]) -> Result<HashMap<u64, u32>> {
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("Failed to list {}", self.root.display()))?;

        let mut owners = HashMap::new();
        for entry in entries.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            // Processes exit while we scan; unreadable fd dirs are skipped.
            let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
                continue;
            };
            for fd in fds.flatten() {
                let Ok(target) = fs::read_link(fd.path()) else {
                    continue;
                };
                if let Some(inode) = socket_inode(&target.to_string_lossy()) {
                    if inodes.contains(&inode) {
                        owners.entry(inode).or_insert(pid);
                    }
                }
            }
            if owners.len() == inodes.len() {
                break;
            }
        }
        Ok(owners)
    }

    fn process_info(&self, pid: u32) -> Option<ProcessInfo> {
        let dir = self.root.join(pid.to_string());
        let status = fs::read_to_string(dir.join("status")).ok()?;
        let (uid, parent_pid) = parse_status(&status)?;

        let exe_path = fs::read_link(dir.join("exe"))
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let cmd_line = fs::read(dir.join("cmdline"))
            .map(|raw| join_cmdline(&raw))
            .unwrap_or_default();

        Some(ProcessInfo::new(uid, pid, parent_pid, exe_path, cmd_line))
    }
}

impl ProcessLookup for SystemLookup {
    fn lookup_unix(&self, path: &str) -> Result<ProcessInfo> {
        let Some(content) = self.net_table("unix")? else {
            return Ok(ProcessInfo::not_found());
        };
        let inodes: Vec<u64> = parse_unix_table(&content)
            .into_iter()
            .filter(|(_, p)| p == path)
            .map(|(inode, _)| inode)
            .collect();
        self.resolve_owner(&inodes)
    }

    fn lookup_tcp(&self, src_port: u16, dst_addr: IpAddr, dst_port: u16) -> Result<ProcessInfo> {
        let dst_addr = canonical_addr(dst_addr);
        let inodes = self.inet_inodes(&[("tcp", false), ("tcp6", true)], |entry| {
            entry.local_port == src_port
                && entry.remote_port == dst_port
                && canonical_addr(entry.remote_addr) == dst_addr
        })?;
        self.resolve_owner(&inodes)
    }

    fn lookup_udp(&self, src_port: u16) -> Result<ProcessInfo> {
        let inodes = self.inet_inodes(&[("udp", false), ("udp6", true)], |entry| {
            entry.local_port == src_port
        })?;
        self.resolve_owner(&inodes)
    }
}

/// One row of `/proc/net/{tcp,tcp6,udp,udp6}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InetEntry {
    pub local_addr: IpAddr,
    pub local_port: u16,
    pub remote_addr: IpAddr,
    pub remote_port: u16,
    pub uid: u32,
    pub inode: u64,
}

/// Parse an inet socket table. Malformed rows are skipped.
pub fn parse_inet_table(content: &str, v6: bool) -> Vec<InetEntry> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 {
                return None;
            }
            let (local_addr, local_port) = parse_endpoint(fields[1], v6)?;
            let (remote_addr, remote_port) = parse_endpoint(fields[2], v6)?;
            Some(InetEntry {
                local_addr,
                local_port,
                remote_addr,
                remote_port,
                uid: fields[7].parse().ok()?,
                inode: fields[9].parse().ok()?,
            })
        })
        .collect()
}

/// Parse `/proc/net/unix` into `(inode, path)` pairs, skipping unnamed sockets.
pub fn parse_unix_table(content: &str) -> Vec<(u64, String)> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let path = fields.get(7)?;
            let inode = fields.get(6)?.parse().ok()?;
            Some((inode, path.to_string()))
        })
        .collect()
}

/// `HEXADDR:HEXPORT`, address words in host byte order.
fn parse_endpoint(field: &str, v6: bool) -> Option<(IpAddr, u16)> {
    let (addr, port) = field.split_once(':')?;
    let port = u16::from_str_radix(port, 16).ok()?;

    let addr = if v6 {
        if addr.len() != 32 {
            return None;
        }
        let mut octets = [0u8; 16];
        for (i, chunk) in octets.chunks_mut(4).enumerate() {
            let word = u32::from_str_radix(addr.get(i * 8..i * 8 + 8)?, 16).ok()?;
            chunk.copy_from_slice(&word.to_ne_bytes());
        }
        IpAddr::V6(Ipv6Addr::from(octets))
    } else {
        if addr.len() != 8 {
            return None;
        }
        let word = u32::from_str_radix(addr, 16).ok()?;
        IpAddr::V4(Ipv4Addr::from(word.to_ne_bytes()))
    };
    Some((addr, port))
}

/// Collapse IPv4-mapped IPv6 addresses so dual-stack sockets compare equal.
fn canonical_addr(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(addr),
        IpAddr::V4(_) => addr,
    }
}

fn socket_inode(link: &str) -> Option<u64> {
    link.strip_prefix("socket:[")?.strip_suffix(']')?.parse().ok()
}

/// Real uid and parent pid from `/proc/<pid>/status`.
fn parse_status(status: &str) -> Option<(u32, u32)> {
    let mut uid = None;
    let mut ppid = None;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("Uid:") {
            uid = rest.split_whitespace().next().and_then(|v| v.parse().ok());
        } else if let Some(rest) = line.strip_prefix("PPid:") {
            ppid = rest.trim().parse().ok();
        }
    }
    Some((uid?, ppid?))
}

fn join_cmdline(raw: &[u8]) -> String {
    raw.split(|b| *b == 0)
        .filter(|arg| !arg.is_empty())
        .map(String::from_utf8_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}
