//! UNIX socket server.
//!
//! [`SnitchServer`] binds the socket, accepts connections and runs one
//! [`Session`] per connection on its own thread. A [`ServerHandle`] stops it
//! from any thread: the accept loop exits, live sessions are force-closed and
//! joined, and the socket file is removed.

use anyhow::Result;
use std::collections::HashMap;
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::StartupError;
use crate::lifecycle;
use crate::lookup::ProcessLookup;
use crate::session::Session;

/// Permission bits applied to the socket file unless configured otherwise.
pub const DEFAULT_SOCKET_MODE: u32 = 0o775;

/// Server tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Permission bits for the socket file
    pub socket_mode: u32,
    /// Group that should own the socket file
    pub group: Option<u32>,
    /// Per-read deadline; a silent client is disconnected when it expires
    pub read_timeout: Option<Duration>,
    /// Maximum concurrent sessions, 0 for no limit
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_mode: DEFAULT_SOCKET_MODE,
            group: None,
            read_timeout: None,
            max_sessions: 0,
        }
    }
}

/// State shared between the accept loop, session threads and handles.
struct Shared {
    socket_path: PathBuf,
    running: AtomicBool,
    next_id: AtomicU64,
    /// Write halves of live sessions, used to force-close them on stop.
    sessions: Mutex<HashMap<u64, UnixStream>>,
}

impl Shared {
    fn sessions(&self) -> MutexGuard<'_, HashMap<u64, UnixStream>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Stops a running [`SnitchServer`]. Cheap to clone.
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<Shared>,
}

impl ServerHandle {
    /// Stop accepting connections and close every live session.
    ///
    /// Returns immediately; [`SnitchServer::serve`] finishes the teardown.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        // Wake the accept loop, which blocks until a connection arrives.
        let _ = UnixStream::connect(&self.shared.socket_path);
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Number of sessions currently being served.
    pub fn active_sessions(&self) -> usize {
        self.shared.sessions().len()
    }
}

/// Process-lookup daemon server.
///
/// # Example
///
/// ```rust,no_run
/// use procsnitchd::{ServerConfig, SnitchServer, SystemLookup};
/// use std::sync::Arc;
///
/// let server = SnitchServer::bind(
///     Arc::new(SystemLookup::new()),
///     "/run/procsnitchd.sock",
///     ServerConfig::default(),
/// )?;
/// let handle = server.handle();
/// std::thread::spawn(move || server.serve());
/// // ... later
/// handle.stop();
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct SnitchServer {
    listener: UnixListener,
    dispatcher: Dispatcher,
    config: ServerConfig,
    shared: Arc<Shared>,
}

impl SnitchServer {
    /// Bind the socket and apply its ownership and mode.
    ///
    /// A stale socket file from a previous run is removed first; a live one is
    /// an error.
    pub fn bind(
        lookup: Arc<dyn ProcessLookup>,
        socket_path: impl AsRef<Path>,
        config: ServerConfig,
    ) -> Result<Self, StartupError> {
        let socket_path = lifecycle::expand_path(socket_path.as_ref());

        lifecycle::cleanup_socket(&socket_path)?;
        let listener = UnixListener::bind(&socket_path).map_err(|source| StartupError::Bind {
            path: socket_path.clone(),
            source,
        })?;

        if let Err(e) = lifecycle::set_socket_ownership(&socket_path, config.group, config.socket_mode) {
            let _ = std::fs::remove_file(&socket_path);
            return Err(e);
        }

        info!(
            socket = %socket_path.display(),
            mode = %format!("{:o}", config.socket_mode),
            gid = ?config.group,
            "Listening"
        );

        Ok(Self {
            listener,
            dispatcher: Dispatcher::new(lookup),
            config,
            shared: Arc::new(Shared {
                socket_path,
                running: AtomicBool::new(true),
                next_id: AtomicU64::new(1),
                sessions: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.shared.socket_path
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Accept connections until stopped (blocking).
    ///
    /// Every accepted connection is served on its own thread. When the loop
    /// ends, remaining sessions are shut down and joined, and the socket file
    /// is removed, so nothing holds the listening resource afterwards.
    pub fn serve(self) -> Result<()> {
        let mut workers: Vec<JoinHandle<()>> = Vec::new();

        for stream in self.listener.incoming() {
            if !self.shared.running.load(Ordering::SeqCst) {
                break;
            }

            match stream {
                Ok(stream) => {
                    workers.retain(|w| !w.is_finished());
                    if let Some(worker) = self.spawn_session(stream) {
                        workers.push(worker);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Accept error");
                }
            }
        }

        self.shutdown(workers);
        Ok(())
    }

    fn spawn_session(&self, stream: UnixStream) -> Option<JoinHandle<()>> {
        let max = self.config.max_sessions;
        if max > 0 && self.shared.sessions().len() >= max {
            warn!(max_sessions = max, "Session limit reached, dropping connection");
            return None;
        }

        if let Err(e) = stream.set_read_timeout(self.config.read_timeout) {
            warn!(error = %e, "Failed to set read timeout");
            return None;
        }
        let closer = match stream.try_clone() {
            Ok(closer) => closer,
            Err(e) => {
                error!(error = %e, "Failed to clone connection");
                return None;
            }
        };

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared.sessions().insert(id, closer);

        let shared = Arc::clone(&self.shared);
        let dispatcher = self.dispatcher.clone();
        let spawned = thread::Builder::new()
            .name(format!("session-{}", id))
            .spawn(move || {
                run_session(stream, dispatcher);
                shared.sessions().remove(&id);
            });

        match spawned {
            Ok(worker) => Some(worker),
            Err(e) => {
                error!(error = %e, "Failed to spawn session thread");
                self.shared.sessions().remove(&id);
                None
            }
        }
    }

    fn shutdown(self, workers: Vec<JoinHandle<()>>) {
        let live: Vec<UnixStream> = self.shared.sessions().drain().map(|(_, s)| s).collect();
        if !live.is_empty() {
            info!(sessions = live.len(), "Closing active sessions");
        }
        for stream in &live {
            let _ = stream.shutdown(Shutdown::Both);
        }

        for worker in workers {
            if worker.join().is_err() {
                error!("Session thread panicked");
            }
        }

        drop(self.listener);
        let _ = std::fs::remove_file(&self.shared.socket_path);
        info!(socket = %self.shared.socket_path.display(), "Server stopped");
    }
}

fn run_session(stream: UnixStream, dispatcher: Dispatcher) {
    let session = match Session::from_stream(stream, dispatcher) {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "Failed to start session");
            return;
        }
    };

    let id = session.id();
    match session.run() {
        Ok(summary) => debug!(
            session = %id,
            requests = summary.requests,
            rejected = summary.rejected,
            "Session finished"
        ),
        Err(e) if e.is_disconnect() => debug!(session = %id, error = %e, "Client went away"),
        Err(e) => warn!(session = %id, error = %e, "Session terminated"),
    }
}
