//! Command-line configuration for the `procsnitchd` binary.
//!
//! Required flags are validated after parsing rather than by clap, so that a
//! missing socket or group is logged and exits with status 1.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::StartupError;
use crate::lifecycle::{expand_path, resolve_group};
use crate::logging::LogLevel;
use crate::server::ServerConfig;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "procsnitchd",
    version,
    about = "Answers which local process owns a UNIX, TCP or UDP socket"
)]
pub struct Cli {
    /// UNIX domain socket file
    #[arg(long)]
    pub socket: Option<PathBuf>,

    /// Group ownership of the socket file
    #[arg(long)]
    pub group: Option<String>,

    /// Logging level: DEBUG, INFO, NOTICE, WARNING, ERROR, CRITICAL
    #[arg(long = "log_level", default_value = "INFO")]
    pub log_level: String,

    /// Write logs to this file instead of stderr
    #[arg(long = "log_file")]
    pub log_file: Option<PathBuf>,

    /// Seconds a client may stay silent before its session is closed (0 = never)
    #[arg(long = "read_timeout", default_value_t = 0)]
    pub read_timeout: u64,

    /// Maximum concurrent client sessions (0 = unlimited)
    #[arg(long = "max_sessions", default_value_t = 0)]
    pub max_sessions: usize,

    /// Octal permission bits applied to the socket file
    #[arg(long = "socket_mode", default_value = "775")]
    pub socket_mode: String,

    /// Detach from the terminal and run in the background (needs --log_file)
    #[arg(long)]
    pub daemonize: bool,

    /// Write the daemon PID to this file
    #[arg(long = "pid_file")]
    pub pid_file: Option<PathBuf>,
}

/// Validated daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub group: String,
    pub log_level: LogLevel,
    pub log_file: Option<PathBuf>,
    pub pid_file: Option<PathBuf>,
    pub daemonize: bool,
    pub server: ServerConfig,
}

impl DaemonConfig {
    /// Check flags that do not touch the system.
    ///
    /// The group name is kept unresolved; see [`DaemonConfig::resolve_group`].
    pub fn from_cli(cli: Cli) -> Result<Self, StartupError> {
        let log_level = cli.log_level.parse::<LogLevel>()?;

        let socket_path = match cli.socket {
            Some(path) if !path.as_os_str().is_empty() => expand_path(&path),
            _ => return Err(StartupError::MissingSocket),
        };
        let group = match cli.group {
            Some(group) if !group.is_empty() => group,
            _ => return Err(StartupError::MissingGroup),
        };

        if cli.daemonize && cli.log_file.is_none() {
            return Err(StartupError::DaemonizeWithoutLogFile);
        }

        let server = ServerConfig {
            socket_mode: parse_mode(&cli.socket_mode)?,
            group: None,
            read_timeout: (cli.read_timeout > 0).then(|| Duration::from_secs(cli.read_timeout)),
            max_sessions: cli.max_sessions,
        };

        Ok(Self {
            socket_path,
            group,
            log_level,
            log_file: cli.log_file.as_deref().map(expand_path),
            pid_file: cli.pid_file.as_deref().map(expand_path),
            daemonize: cli.daemonize,
            server,
        })
    }

    /// Look up the configured group and record its gid in the server config.
    pub fn resolve_group(&mut self) -> Result<u32, StartupError> {
        let gid = resolve_group(&self.group)?;
        self.server.group = Some(gid);
        Ok(gid)
    }
}

/// Parse octal permission bits such as `775` or `0o660`.
pub fn parse_mode(value: &str) -> Result<u32, StartupError> {
    let digits = value.trim_start_matches("0o");
    match u32::from_str_radix(digits, 8) {
        Ok(mode) if !digits.is_empty() && mode <= 0o7777 => Ok(mode),
        _ => Err(StartupError::InvalidMode(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("procsnitchd").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_minimal_flags() {
        let config =
            DaemonConfig::from_cli(cli(&["--socket", "/run/procsnitchd.sock", "--group", "netdev"]))
                .unwrap();
        assert_eq!(config.socket_path, PathBuf::from("/run/procsnitchd.sock"));
        assert_eq!(config.group, "netdev");
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.server.socket_mode, 0o775);
        assert_eq!(config.server.read_timeout, None);
        assert!(!config.daemonize);
    }

    #[test]
    fn test_missing_socket_and_group() {
        assert!(matches!(
            DaemonConfig::from_cli(cli(&["--group", "netdev"])),
            Err(StartupError::MissingSocket)
        ));
        assert!(matches!(
            DaemonConfig::from_cli(cli(&["--socket", "/run/x.sock"])),
            Err(StartupError::MissingGroup)
        ));
        assert!(matches!(
            DaemonConfig::from_cli(cli(&["--socket", "/run/x.sock", "--group", ""])),
            Err(StartupError::MissingGroup)
        ));
    }

    #[test]
    fn test_invalid_log_level() {
        let result = DaemonConfig::from_cli(cli(&[
            "--socket",
            "/run/x.sock",
            "--group",
            "netdev",
            "--log_level",
            "VERBOSE",
        ]));
        assert!(matches!(result, Err(StartupError::InvalidLogLevel(_))));
    }

    #[test]
    fn test_hardening_flags() {
        let config = DaemonConfig::from_cli(cli(&[
            "--socket",
            "/run/x.sock",
            "--group",
            "0",
            "--read_timeout",
            "30",
            "--max_sessions",
            "64",
            "--socket_mode",
            "0o660",
            "--log_level",
            "debug",
        ]))
        .unwrap();
        assert_eq!(config.server.read_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.server.max_sessions, 64);
        assert_eq!(config.server.socket_mode, 0o660);
        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_daemonize_needs_log_file() {
        let result = DaemonConfig::from_cli(cli(&[
            "--socket",
            "/run/x.sock",
            "--group",
            "0",
            "--daemonize",
        ]));
        assert!(matches!(result, Err(StartupError::DaemonizeWithoutLogFile)));

        let config = DaemonConfig::from_cli(cli(&[
            "--socket",
            "/run/x.sock",
            "--group",
            "0",
            "--daemonize",
            "--log_file",
            "/var/log/procsnitchd.log",
        ]))
        .unwrap();
        assert!(config.daemonize);
        assert_eq!(config.log_file, Some(PathBuf::from("/var/log/procsnitchd.log")));
    }

    #[test]
    fn test_resolve_numeric_group() {
        let mut config =
            DaemonConfig::from_cli(cli(&["--socket", "/run/x.sock", "--group", "27"])).unwrap();
        assert_eq!(config.resolve_group().unwrap(), 27);
        assert_eq!(config.server.group, Some(27));
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("775").unwrap(), 0o775);
        assert_eq!(parse_mode("0o600").unwrap(), 0o600);
        assert!(parse_mode("999").is_err());
        assert!(parse_mode("").is_err());
        assert!(parse_mode("17777").is_err());
    }
}
