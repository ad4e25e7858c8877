//! procsnitch: query a running procsnitchd from the command line.
//!
//! ```bash
//! procsnitch --socket /run/procsnitchd.sock unix /run/app.sock
//! procsnitch tcp 41234 93.184.216.34 443 --json
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use procsnitchd::{ProcessInfo, SnitchClient};

#[derive(Debug, Parser)]
#[command(name = "procsnitch", version, about = "Ask procsnitchd which process owns a socket")]
struct Args {
    /// Daemon socket
    #[arg(long, default_value = "/var/run/procsnitchd.sock")]
    socket: PathBuf,

    /// Seconds to wait for an answer
    #[arg(long, default_value_t = 5)]
    timeout: u64,

    /// Print the result as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    query: Query,
}

#[derive(Debug, Subcommand)]
enum Query {
    /// Owner of a UNIX socket path
    Unix { path: String },
    /// Owner of a TCP connection
    Tcp {
        src_port: u16,
        dst_addr: IpAddr,
        dst_port: u16,
    },
    /// Owner of a bound UDP port
    Udp { src_port: u16 },
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        // No owner: distinct status so scripts can tell it from a failure.
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("procsnitch: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<bool> {
    let mut client =
        SnitchClient::connect_with_timeout(&args.socket, Duration::from_secs(args.timeout))?;

    let info = match &args.query {
        Query::Unix { path } => client.lookup_unix_path(path)?,
        Query::Tcp {
            src_port,
            dst_addr,
            dst_port,
        } => client.lookup_tcp(*src_port, *dst_addr, *dst_port)?,
        Query::Udp { src_port } => client.lookup_udp(*src_port)?,
    };

    print_info(&info, args.json)?;
    Ok(info.found)
}

fn print_info(info: &ProcessInfo, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(info)?);
    } else if info.found {
        println!("uid:     {}", info.uid);
        println!("pid:     {}", info.pid);
        println!("ppid:    {}", info.parent_pid);
        println!("exe:     {}", info.exe_path);
        println!("cmdline: {}", info.cmd_line);
    } else {
        println!("no owning process found");
    }
    Ok(())
}
