//! procsnitchd: answers which local process owns a socket.
//!
//! ```bash
//! sudo procsnitchd --socket /run/procsnitchd.sock --group netdev
//! echo 'UNIXINFO /run/app.sock' | nc -U /run/procsnitchd.sock
//! ```

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use tracing::{error, info};

use procsnitchd::config::{Cli, DaemonConfig};
use procsnitchd::logging::{self, LogLevel};
use procsnitchd::{lifecycle, SnitchServer, SystemLookup};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match DaemonConfig::from_cli(cli) {
        Ok(config) => config,
        Err(e) => {
            // Logging is not configured yet; report at the default level.
            let _ = logging::init_logging(LogLevel::Info, None);
            error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config) {
        eprintln!("procsnitchd: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(&mut config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{:#}", e), "procsnitchd failed");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &DaemonConfig) -> Result<()> {
    #[cfg(feature = "log-rotation")]
    if let Some(path) = &config.log_file {
        return logging::init_logging_with_rotation(config.log_level, path);
    }
    logging::init_logging(config.log_level, config.log_file.as_deref())
}

fn run(config: &mut DaemonConfig) -> Result<()> {
    lifecycle::ensure_privileged()?;
    config.resolve_group()?;
    if let Some(pid_file) = &config.pid_file {
        lifecycle::check_pid_file(pid_file)?;
    }

    if config.daemonize {
        lifecycle::daemonize(config.pid_file.as_deref())?;
    } else if let Some(pid_file) = &config.pid_file {
        lifecycle::write_pid_file(pid_file)?;
    }

    let server = SnitchServer::bind(
        Arc::new(SystemLookup::new()),
        &config.socket_path,
        config.server.clone(),
    )?;
    let handle = server.handle();
    let worker = thread::Builder::new()
        .name("acceptor".into())
        .spawn(move || server.serve())?;

    info!(pid = std::process::id(), "procsnitchd starting");

    let signal = lifecycle::wait_for_shutdown()?;
    info!(signal, "procsnitchd stopping");
    handle.stop();

    let result = match worker.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("Acceptor thread panicked")),
    };

    if let Some(pid_file) = &config.pid_file {
        let _ = std::fs::remove_file(pid_file);
    }
    result
}
