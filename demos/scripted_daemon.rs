//! Example: procsnitchd with a fixed lookup table.
//!
//! Serves the line protocol without root or `/proc` access, answering from an
//! in-memory table. Useful for trying clients against a known daemon.
//!
//! # Run the daemon
//! ```bash
//! cargo run --example scripted_daemon
//! ```
//!
//! # Query it
//! ```bash
//! printf 'UNIXINFO /run/app.sock\nUDPINFO 53\n' | nc -U /tmp/procsnitchd-demo.sock
//! cargo run --bin procsnitch -- --socket /tmp/procsnitchd-demo.sock tcp 41234 127.0.0.1 443
//! ```

use anyhow::Result;
use procsnitchd::logging::{init_logging, LogLevel};
use procsnitchd::{lifecycle, ProcessInfo, ProcessLookup, ServerConfig, SnitchServer};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::thread;

const SOCKET: &str = "/tmp/procsnitchd-demo.sock";

/// Answers from a fixed table; anything else is reported as not found.
struct ScriptedLookup {
    unix: HashMap<&'static str, ProcessInfo>,
    udp: HashMap<u16, ProcessInfo>,
}

impl ScriptedLookup {
    fn new() -> Self {
        let unix = HashMap::from([(
            "/run/app.sock",
            ProcessInfo::new(1000, 4242, 1, "/usr/bin/app", "app --serve"),
        )]);
        let udp = HashMap::from([(
            53,
            ProcessInfo::new(0, 311, 1, "/usr/sbin/dnsmasq", "dnsmasq -k"),
        )]);
        Self { unix, udp }
    }
}

impl ProcessLookup for ScriptedLookup {
    fn lookup_unix(&self, path: &str) -> Result<ProcessInfo> {
        Ok(self.unix.get(path).cloned().unwrap_or_default())
    }

    fn lookup_tcp(&self, src_port: u16, dst_addr: IpAddr, dst_port: u16) -> Result<ProcessInfo> {
        // Every outbound connection belongs to the same pretend browser
        Ok(ProcessInfo::new(
            1000,
            5150,
            1,
            "/usr/bin/browser",
            format!("browser --from {} --to {}:{}", src_port, dst_addr, dst_port),
        ))
    }

    fn lookup_udp(&self, src_port: u16) -> Result<ProcessInfo> {
        Ok(self.udp.get(&src_port).cloned().unwrap_or_default())
    }
}

fn main() -> Result<()> {
    init_logging(LogLevel::Debug, None)?;

    println!("Starting scripted daemon...");
    println!("Socket: {}", SOCKET);
    println!();
    println!("Test with:");
    println!("  echo 'UNIXINFO /run/app.sock' | nc -U {}", SOCKET);
    println!("  echo 'TCPINFO 41234 127.0.0.1 443' | nc -U {}", SOCKET);
    println!();

    let server = SnitchServer::bind(Arc::new(ScriptedLookup::new()), SOCKET, ServerConfig::default())?;
    let handle = server.handle();
    let worker = thread::spawn(move || server.serve());

    lifecycle::wait_for_shutdown()?;
    handle.stop();
    match worker.join() {
        Ok(result) => result,
        Err(_) => anyhow::bail!("Acceptor thread panicked"),
    }
}
