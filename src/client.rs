//! Client for querying a running daemon.
//!
//! Provides typed lookup calls over the line protocol.

use anyhow::{bail, Context, Result};
use std::io::{BufRead, BufReader, Write};
use std::net::IpAddr;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::lifecycle::expand_path;
use crate::lookup::{LookupQuery, ProcessInfo, ProcessLookup};
use crate::protocol::{self, Request};

/// How long to wait for a response before giving up.
///
/// The daemon writes nothing for a request it rejects, so an unbounded wait
/// could hang forever.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection to a procsnitchd daemon.
///
/// One connection serves any number of sequential lookups. After a failed
/// exchange (timeout, I/O or undecodable reply) the connection may still hold
/// a late response, so the client refuses further queries; reconnect instead.
///
/// # Example
///
/// ```rust,no_run
/// use procsnitchd::SnitchClient;
///
/// let mut client = SnitchClient::connect("/run/procsnitchd.sock")?;
/// let info = client.lookup_unix_path("/run/app.sock")?;
/// if info.found {
///     println!("{} (pid {})", info.exe_path, info.pid);
/// }
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct SnitchClient {
    socket_path: PathBuf,
    reader: BufReader<UnixStream>,
    writer: UnixStream,
    broken: bool,
}

impl SnitchClient {
    /// Connect with the default timeout.
    ///
    /// # Arguments
    /// * `socket_path` - Path to the daemon's UNIX socket (supports `~` expansion)
    pub fn connect(socket_path: impl AsRef<Path>) -> Result<Self> {
        Self::connect_with_timeout(socket_path, DEFAULT_TIMEOUT)
    }

    pub fn connect_with_timeout(socket_path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let socket_path = expand_path(socket_path.as_ref());
        let stream = UnixStream::connect(&socket_path)
            .with_context(|| format!("Cannot connect to daemon at {:?}", socket_path))?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        let writer = stream.try_clone()?;
        Ok(Self {
            socket_path,
            reader: BufReader::new(stream),
            writer,
            broken: false,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// True once an exchange has failed and the connection is unusable.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Find the process bound to a UNIX socket path.
    pub fn lookup_unix_path(&mut self, path: &str) -> Result<ProcessInfo> {
        if path.is_empty() || path.chars().any(char::is_whitespace) {
            bail!("Socket path {:?} cannot be sent over the line protocol", path);
        }
        self.query(&LookupQuery::Unix {
            path: path.to_string(),
        })
    }

    /// Find the process owning the TCP connection `src_port -> dst_addr:dst_port`.
    pub fn lookup_tcp(&mut self, src_port: u16, dst_addr: IpAddr, dst_port: u16) -> Result<ProcessInfo> {
        self.query(&LookupQuery::Tcp {
            src_port,
            dst_addr,
            dst_port,
        })
    }

    /// Find the process bound to local UDP `src_port`.
    pub fn lookup_udp(&mut self, src_port: u16) -> Result<ProcessInfo> {
        self.query(&LookupQuery::Udp { src_port })
    }

    /// Send one query and wait for its response line.
    pub fn query(&mut self, query: &LookupQuery) -> Result<ProcessInfo> {
        if self.broken {
            bail!(
                "Connection to {:?} is unusable after an earlier failure",
                self.socket_path
            );
        }
        let result = self.exchange(query);
        if result.is_err() {
            self.broken = true;
        }
        result
    }

    fn exchange(&mut self, query: &LookupQuery) -> Result<ProcessInfo> {
        let line = Request::from(query).to_line();
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;

        let mut response = String::new();
        let n = self
            .reader
            .read_line(&mut response)
            .with_context(|| format!("No response for {}", query))?;
        if n == 0 {
            bail!("Daemon closed the connection");
        }
        protocol::decode_response(&response)
    }
}

/// Lookups against a remote daemon, one connection per call.
///
/// Lets code written against [`ProcessLookup`] run unprivileged by delegating
/// to the daemon.
#[derive(Debug, Clone)]
pub struct RemoteLookup {
    socket_path: PathBuf,
    timeout: Duration,
}

impl RemoteLookup {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: expand_path(socket_path.as_ref()),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the response timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn client(&self) -> Result<SnitchClient> {
        SnitchClient::connect_with_timeout(&self.socket_path, self.timeout)
    }
}

impl ProcessLookup for RemoteLookup {
    fn lookup_unix(&self, path: &str) -> Result<ProcessInfo> {
        self.client()?.lookup_unix_path(path)
    }

    fn lookup_tcp(&self, src_port: u16, dst_addr: IpAddr, dst_port: u16) -> Result<ProcessInfo> {
        self.client()?.lookup_tcp(src_port, dst_addr, dst_port)
    }

    fn lookup_udp(&self, src_port: u16) -> Result<ProcessInfo> {
        self.client()?.lookup_udp(src_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use std::thread;
    use tempfile::TempDir;

    /// Answers every line with a canned response after checking the request.
    fn fake_daemon(path: &Path, expected: &'static str, reply: &'static str) -> thread::JoinHandle<()> {
        let listener = UnixListener::bind(path).unwrap();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            assert_eq!(line, expected);
            writer.write_all(reply.as_bytes()).unwrap();
        })
    }

    #[test]
    fn test_lookup_tcp_request_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("d.sock");
        let daemon = fake_daemon(&path, "TCPINFO 5000 ::1 22\n", "0 77 1 /usr/sbin/sshd sshd -D\r\n");

        let mut client = SnitchClient::connect(&path).unwrap();
        let info = client.lookup_tcp(5000, "::1".parse().unwrap(), 22).unwrap();
        assert_eq!(info, ProcessInfo::new(0, 77, 1, "/usr/sbin/sshd", "sshd -D"));
        daemon.join().unwrap();
    }

    #[test]
    fn test_rejects_unsendable_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("d.sock");
        let _listener = UnixListener::bind(&path).unwrap();

        let mut client = SnitchClient::connect(&path).unwrap();
        assert!(client.lookup_unix_path("/tmp/with space.sock").is_err());
        assert!(client.lookup_unix_path("").is_err());
    }

    #[test]
    fn test_timeout_without_response() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("d.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let mut client =
            SnitchClient::connect_with_timeout(&path, Duration::from_millis(100)).unwrap();
        let _held = listener.accept().unwrap();
        assert!(client.lookup_udp(53).is_err());
        assert!(client.is_broken());
    }

    #[test]
    fn test_undecodable_reply_breaks_client() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("d.sock");
        let daemon = fake_daemon(&path, "UDPINFO 53\n", "garbage\r\n");

        let mut client = SnitchClient::connect(&path).unwrap();
        assert!(client.lookup_udp(53).is_err());
        assert!(client.is_broken());
        assert!(client.lookup_udp(53).is_err());
        daemon.join().unwrap();
    }

    #[test]
    fn test_connect_failure() {
        let dir = TempDir::new().unwrap();
        assert!(SnitchClient::connect(dir.path().join("missing.sock")).is_err());
    }
}
