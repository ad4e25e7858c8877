//! Daemon lifecycle utilities.
//!
//! Privilege checks, socket file ownership, stale socket cleanup, PID files,
//! daemonizing and waiting for a termination signal.

use anyhow::{Context, Result};
use std::ffi::CString;
use std::fs;
use std::io::Write;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use signal_hook::consts::signal::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;

use crate::error::StartupError;

/// Fail unless running with effective uid 0.
///
/// Reading other users' `/proc/<pid>/fd` entries needs root.
pub fn ensure_privileged() -> Result<(), StartupError> {
    // SAFETY: geteuid() has no preconditions and cannot fail
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        return Err(StartupError::NotPrivileged { euid });
    }
    Ok(())
}

/// Resolve a group name, or a numeric gid, to a gid.
pub fn resolve_group(name: &str) -> Result<u32, StartupError> {
    if let Ok(gid) = name.parse::<u32>() {
        return Ok(gid);
    }
    let unknown = || StartupError::UnknownGroup(name.to_string());
    let cname = CString::new(name).map_err(|_| unknown())?;

    // SAFETY: libc::group is plain data, zeroed is a valid initial state
    let mut group: libc::group = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::group = std::ptr::null_mut();
    let mut buf: Vec<libc::c_char> = vec![0; 1024];

    loop {
        // SAFETY: every pointer refers to live storage of the advertised size
        let rc = unsafe {
            libc::getgrnam_r(
                cname.as_ptr(),
                &mut group,
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE && buf.len() < 1 << 20 {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        break;
    }

    if result.is_null() {
        return Err(unknown());
    }
    Ok(group.gr_gid)
}

/// Hand the socket file to `gid` (when given) and apply `mode`.
pub fn set_socket_ownership(path: &Path, gid: Option<u32>, mode: u32) -> Result<(), StartupError> {
    let wrap = |source| StartupError::Permissions {
        path: path.to_path_buf(),
        source,
    };
    if let Some(gid) = gid {
        std::os::unix::fs::chown(path, None, Some(gid)).map_err(wrap)?;
    }
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(wrap)?;
    Ok(())
}

/// Signals that stop the daemon. SIGHUP is left alone.
pub const SHUTDOWN_SIGNALS: [libc::c_int; 3] = [SIGTERM, SIGINT, SIGQUIT];

/// Remove a socket file left behind by a daemon that is no longer running.
///
/// Fails with [`StartupError::AlreadyRunning`] if something still accepts
/// connections on it, and with [`StartupError::NotASocket`] if the path is
/// anything other than a socket.
pub fn cleanup_socket(path: &Path) -> Result<(), StartupError> {
    let Ok(metadata) = fs::symlink_metadata(path) else {
        return Ok(());
    };
    if !metadata.file_type().is_socket() {
        return Err(StartupError::NotASocket(path.to_path_buf()));
    }
    if UnixStream::connect(path).is_ok() {
        return Err(StartupError::AlreadyRunning(path.to_path_buf()));
    }
    tracing::debug!(socket = %path.display(), "Removing stale socket");
    fs::remove_file(path).map_err(|source| StartupError::Bind {
        path: path.to_path_buf(),
        source,
    })
}

/// Daemonize the current process.
///
/// This forks the process, detaches from the terminal, and runs in the background.
/// The working directory becomes `/`.
pub fn daemonize(pid_file: Option<&Path>) -> Result<()> {
    let mut daemonize = daemonize::Daemonize::new().working_directory("/");

    if let Some(pid_file) = pid_file {
        if let Some(parent) = pid_file.parent() {
            fs::create_dir_all(parent)?;
        }
        daemonize = daemonize.pid_file(pid_file);
    }

    daemonize.start().context("Failed to daemonize process")?;
    Ok(())
}

/// Write a PID file for the current process.
pub fn write_pid_file(pid_file: &Path) -> Result<()> {
    if let Some(parent) = pid_file.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = fs::File::create(pid_file)
        .with_context(|| format!("Failed to create PID file {}", pid_file.display()))?;
    writeln!(file, "{}", std::process::id())?;
    Ok(())
}

/// Read a PID from a PID file.
///
/// Returns `None` if the file doesn't exist or can't be parsed.
pub fn read_pid_file(pid_file: &Path) -> Option<u32> {
    let content = fs::read_to_string(pid_file).ok()?;
    content.trim().parse().ok()
}

/// Whether a process with this pid exists.
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 only checks that the target exists
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Refuse to start while the PID file names a live process.
///
/// A missing, unreadable or stale PID file is fine.
pub fn check_pid_file(pid_file: &Path) -> Result<(), StartupError> {
    match read_pid_file(pid_file) {
        Some(pid) if pid != std::process::id() && process_alive(pid) => {
            Err(StartupError::PidFileInUse {
                path: pid_file.to_path_buf(),
                pid,
            })
        }
        _ => Ok(()),
    }
}

/// Block until one of [`SHUTDOWN_SIGNALS`] arrives. Returns the signal.
pub fn wait_for_shutdown() -> Result<i32> {
    let mut signals = Signals::new(SHUTDOWN_SIGNALS)
        .context("Failed to install signal handlers")?;
    let signal = signals
        .forever()
        .next()
        .context("Signal iterator closed unexpectedly")?;
    Ok(signal)
}

/// Expand `~` in path to home directory.
pub fn expand_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    let expanded = shellexpand::tilde(&path_str);
    PathBuf::from(expanded.as_ref())
}
