//! Line-oriented wire protocol.
//!
//! Requests are single ASCII lines terminated by `\n`:
//!
//! ```text
//! UNIXINFO <socket path>
//! TCPINFO <src port> <dst addr> <dst port>
//! UDPINFO <src port>
//! ```
//!
//! Command names are case-insensitive and surrounding whitespace is ignored.
//! A successful lookup is answered with one CRLF-terminated line:
//!
//! ```text
//! <uid> <pid> <parent pid> <exe path> <cmd line>\r\n
//! ```
//!
//! Paths and command lines are written verbatim, so values containing spaces
//! or line breaks cannot be decoded unambiguously.

use anyhow::{bail, Context, Result};
use std::fmt;
use std::str::FromStr;

use crate::lookup::{LookupQuery, ProcessInfo};

pub const CMD_UNIX_INFO: &str = "UNIXINFO";
pub const CMD_TCP_INFO: &str = "TCPINFO";
pub const CMD_UDP_INFO: &str = "UDPINFO";

/// Response line terminator, independent of platform.
pub const RESPONSE_TERMINATOR: &str = "\r\n";

/// Longest request line accepted, terminator included.
pub const MAX_LINE_LEN: usize = 4096;

/// Commands understood by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    UnixInfo,
    TcpInfo,
    UdpInfo,
}

impl Command {
    /// Wire name of the command.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::UnixInfo => CMD_UNIX_INFO,
            Command::TcpInfo => CMD_TCP_INFO,
            Command::UdpInfo => CMD_UDP_INFO,
        }
    }

    /// Number of arguments following the command name.
    pub fn arity(&self) -> usize {
        match self {
            Command::UnixInfo => 1,
            Command::TcpInfo => 3,
            Command::UdpInfo => 1,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case(CMD_UNIX_INFO) {
            Ok(Command::UnixInfo)
        } else if s.eq_ignore_ascii_case(CMD_TCP_INFO) {
            Ok(Command::TcpInfo)
        } else if s.eq_ignore_ascii_case(CMD_UDP_INFO) {
            Ok(Command::UdpInfo)
        } else {
            Err(())
        }
    }
}

/// A parsed request line. Arguments are not validated yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub args: Vec<String>,
}

impl Request {
    pub fn new(command: Command, args: Vec<String>) -> Self {
        Self { command, args }
    }

    /// Serialize the request to a `\n`-terminated line.
    pub fn to_line(&self) -> String {
        let mut line = String::from(self.command.as_str());
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line.push('\n');
        line
    }
}

impl From<&LookupQuery> for Request {
    fn from(query: &LookupQuery) -> Self {
        match query {
            LookupQuery::Unix { path } => Request::new(Command::UnixInfo, vec![path.clone()]),
            LookupQuery::Tcp {
                src_port,
                dst_addr,
                dst_port,
            } => Request::new(
                Command::TcpInfo,
                vec![src_port.to_string(), dst_addr.to_string(), dst_port.to_string()],
            ),
            LookupQuery::Udp { src_port } => {
                Request::new(Command::UdpInfo, vec![src_port.to_string()])
            }
        }
    }
}

/// Outcome of splitting one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// Nothing but whitespace.
    Empty,
    /// First token is not a known command.
    Unknown(String),
    Request(Request),
}

/// Split a request line into a command and its arguments.
pub fn parse_line(line: &str) -> Line {
    let mut tokens = line.split_whitespace();
    let Some(name) = tokens.next() else {
        return Line::Empty;
    };

    match name.parse::<Command>() {
        Ok(command) => Line::Request(Request::new(
            command,
            tokens.map(str::to_string).collect(),
        )),
        Err(()) => Line::Unknown(name.to_string()),
    }
}

/// Encode a lookup result as a response line.
pub fn encode_response(info: &ProcessInfo) -> String {
    format!(
        "{} {} {} {} {}{}",
        info.uid, info.pid, info.parent_pid, info.exe_path, info.cmd_line, RESPONSE_TERMINATOR
    )
}

/// Decode a response line produced by [`encode_response`].
///
/// Everything after the fourth separator belongs to the command line. A pid of
/// zero marks a lookup miss.
pub fn decode_response(line: &str) -> Result<ProcessInfo> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut fields = line.splitn(5, ' ');

    let mut next_number = |name: &str| -> Result<u32> {
        let field = fields
            .next()
            .with_context(|| format!("response missing {} field", name))?;
        field
            .parse()
            .with_context(|| format!("invalid {} field {:?}", name, field))
    };
    let uid = next_number("uid")?;
    let pid = next_number("pid")?;
    let parent_pid = next_number("parent pid")?;

    let Some(exe_path) = fields.next() else {
        bail!("response missing exe path field");
    };
    let cmd_line = fields.next().unwrap_or_default();

    Ok(ProcessInfo {
        uid,
        pid,
        parent_pid,
        exe_path: exe_path.to_string(),
        cmd_line: cmd_line.to_string(),
        found: pid != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        let line = parse_line("  unixInfo /tmp/app.sock \r\n");
        assert_eq!(
            line,
            Line::Request(Request::new(Command::UnixInfo, vec!["/tmp/app.sock".into()]))
        );
    }

    #[test]
    fn test_parse_empty_and_unknown() {
        assert_eq!(parse_line("\n"), Line::Empty);
        assert_eq!(parse_line("   \t "), Line::Empty);
        assert_eq!(parse_line("PING 1"), Line::Unknown("PING".into()));
    }

    #[test]
    fn test_parse_collapses_repeated_spaces() {
        let Line::Request(request) = parse_line("TCPINFO  8080   ::1 22") else {
            panic!("expected request");
        };
        assert_eq!(request.args, vec!["8080", "::1", "22"]);
    }

    #[test]
    fn test_encode_response() {
        let info = ProcessInfo::new(0, 1234, 1, "/usr/bin/x", "x --flag");
        assert_eq!(encode_response(&info), "0 1234 1 /usr/bin/x x --flag\r\n");
    }

    #[test]
    fn test_encode_not_found() {
        assert_eq!(encode_response(&ProcessInfo::not_found()), "0 0 0  \r\n");
    }

    #[test]
    fn test_decode_keeps_spaces_in_cmd_line() {
        let info = decode_response("1000 42 1 /usr/bin/app app --serve --port 80\r\n").unwrap();
        assert_eq!(info, ProcessInfo::new(1000, 42, 1, "/usr/bin/app", "app --serve --port 80"));
    }

    #[test]
    fn test_decode_not_found() {
        let info = decode_response("0 0 0  \r\n").unwrap();
        assert!(!info.found);
        assert!(info.exe_path.is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_response("hello\r\n").is_err());
        assert!(decode_response("1 2\r\n").is_err());
        assert!(decode_response("1 2 3\r\n").is_err());
    }

    #[test]
    fn test_request_line_from_query() {
        let query = LookupQuery::Tcp {
            src_port: 5000,
            dst_addr: "192.168.1.7".parse().unwrap(),
            dst_port: 443,
        };
        assert_eq!(Request::from(&query).to_line(), "TCPINFO 5000 192.168.1.7 443\n");
    }
}
