//! Error taxonomy.
//!
//! Three scopes, matching how far a failure reaches:
//! - [`RequestError`]: one command is dropped, the session keeps reading.
//! - [`SessionError`]: the session ends and its connection is closed.
//! - [`StartupError`]: the daemon exits before serving anyone.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure confined to a single request.
///
/// The session logs it and moves on to the next line; nothing is written back.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("{command} expects {expected} arguments, got {got}")]
    MissingArguments {
        command: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("invalid port {value:?}")]
    InvalidPort { value: String },

    #[error("invalid IP address {value:?}")]
    InvalidAddress { value: String },

    #[error("lookup failed: {0:#}")]
    Lookup(#[source] anyhow::Error),
}

/// Failure that terminates a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed request line: {0}")]
    Malformed(String),

    #[error("request line exceeds {limit} bytes")]
    LineTooLong { limit: usize },
}

impl SessionError {
    /// True for errors caused by the peer going away mid-write.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            SessionError::Io(e) if matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            )
        )
    }
}

/// Failure that aborts the daemon before it serves requests.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("must be run as root (effective uid {euid})")]
    NotPrivileged { euid: u32 },

    #[error("UNIX domain socket file must be specified")]
    MissingSocket,

    #[error("group ownership of the socket file must be specified")]
    MissingGroup,

    #[error("invalid logging level {0:?}")]
    InvalidLogLevel(String),

    #[error("unknown group {0:?}")]
    UnknownGroup(String),

    #[error("--daemonize requires --log_file, stderr is closed once detached")]
    DaemonizeWithoutLogFile,

    #[error("invalid socket mode {0:?}")]
    InvalidMode(String),

    #[error("another daemon is already listening on {}", .0.display())]
    AlreadyRunning(PathBuf),

    #[error("{} exists and is not a socket", .0.display())]
    NotASocket(PathBuf),

    #[error("PID file {} names running process {pid}", path.display())]
    PidFileInUse { path: PathBuf, pid: u32 },

    #[error("failed to bind {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to set ownership or mode of {}: {source}", path.display())]
    Permissions {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
