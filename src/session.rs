//! Per-connection request loop.
//!
//! A [`Session`] owns both halves of one client connection. It reads a line,
//! dispatches it, writes the response, and only then reads the next line, so
//! responses always leave in request order.

use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use tracing::{debug, error, info_span, trace, warn};
use uuid::Uuid;

use crate::dispatch::Dispatcher;
use crate::error::{RequestError, SessionError};
use crate::protocol::{self, Line, MAX_LINE_LEN};

/// Counters reported when a session ends cleanly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Lines naming a known command
    pub requests: u64,
    /// Response lines written
    pub responses: u64,
    /// Empty lines and unknown commands
    pub ignored: u64,
    /// Requests dropped by validation or lookup failure
    pub rejected: u64,
}

/// One client connection and its read-parse-dispatch-respond loop.
pub struct Session<R, W> {
    id: Uuid,
    reader: BufReader<R>,
    writer: W,
    dispatcher: Dispatcher,
    summary: SessionSummary,
}

impl Session<UnixStream, UnixStream> {
    /// Wrap an accepted connection.
    pub fn from_stream(stream: UnixStream, dispatcher: Dispatcher) -> std::io::Result<Self> {
        let writer = stream.try_clone()?;
        Ok(Self::new(stream, writer, dispatcher))
    }
}

impl<R: Read, W: Write> Session<R, W> {
    pub fn new(reader: R, writer: W, dispatcher: Dispatcher) -> Self {
        Self {
            id: Uuid::new_v4(),
            reader: BufReader::new(reader),
            writer,
            dispatcher,
            summary: SessionSummary::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Serve requests until the peer closes the connection.
    ///
    /// End of input is a clean exit. Read and write failures, invalid UTF-8 and
    /// over-long lines end the session with an error. Bad arguments, unknown
    /// commands and lookup failures only drop the offending line. Both halves
    /// of the connection are released when this returns.
    pub fn run(mut self) -> Result<SessionSummary, SessionError> {
        let span = info_span!("session", id = %self.id);
        let _guard = span.enter();

        let mut buf = Vec::with_capacity(256);
        while let Some(line) = self.read_request_line(&mut buf)? {
            self.handle_line(&line)?;
        }

        debug!(
            requests = self.summary.requests,
            responses = self.summary.responses,
            "Client closed connection"
        );
        Ok(self.summary)
    }

    /// Read one `\n`-terminated line. `None` means end of input; a trailing
    /// partial line is discarded.
    fn read_request_line(&mut self, buf: &mut Vec<u8>) -> Result<Option<String>, SessionError> {
        buf.clear();
        let n = (&mut self.reader)
            .take(MAX_LINE_LEN as u64)
            .read_until(b'\n', buf)?;

        if n == 0 {
            return Ok(None);
        }
        if buf.last() != Some(&b'\n') {
            if n >= MAX_LINE_LEN {
                return Err(SessionError::LineTooLong {
                    limit: MAX_LINE_LEN,
                });
            }
            trace!(bytes = n, "Discarding unterminated trailing line");
            return Ok(None);
        }

        String::from_utf8(std::mem::take(buf))
            .map(Some)
            .map_err(|e| SessionError::Malformed(e.to_string()))
    }

    fn handle_line(&mut self, line: &str) -> Result<(), SessionError> {
        let request = match protocol::parse_line(line) {
            Line::Request(request) => request,
            Line::Empty => {
                self.summary.ignored += 1;
                trace!("Ignoring empty line");
                return Ok(());
            }
            Line::Unknown(name) => {
                self.summary.ignored += 1;
                debug!(command = %name, "Ignoring unknown command");
                return Ok(());
            }
        };
        self.summary.requests += 1;

        match self.dispatcher.dispatch(&request) {
            Ok(info) => {
                debug!(
                    command = %request.command,
                    found = info.found,
                    pid = info.pid,
                    "Request complete"
                );
                self.writer
                    .write_all(protocol::encode_response(&info).as_bytes())?;
                self.writer.flush()?;
                self.summary.responses += 1;
            }
            Err(RequestError::Lookup(e)) => {
                self.summary.rejected += 1;
                error!(command = %request.command, error = %format!("{:#}", e), "Lookup failed");
            }
            Err(e) => {
                self.summary.rejected += 1;
                warn!(command = %request.command, error = %e, "Rejected request");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::{ProcessInfo, ProcessLookup};
    use std::io::Cursor;
    use std::net::IpAddr;
    use std::sync::Arc;

    struct Static;

    impl ProcessLookup for Static {
        fn lookup_unix(&self, path: &str) -> anyhow::Result<ProcessInfo> {
            if path == "/tmp/app.sock" {
                Ok(ProcessInfo::new(1000, 42, 1, "/usr/bin/app", "app --serve"))
            } else {
                Ok(ProcessInfo::not_found())
            }
        }

        fn lookup_tcp(&self, src_port: u16, _: IpAddr, _: u16) -> anyhow::Result<ProcessInfo> {
            Ok(ProcessInfo::new(0, src_port as u32, 1, "/usr/sbin/sshd", "sshd"))
        }

        fn lookup_udp(&self, _: u16) -> anyhow::Result<ProcessInfo> {
            anyhow::bail!("no udp table")
        }
    }

    fn run(input: &[u8]) -> (Result<SessionSummary, SessionError>, String) {
        let mut output = Vec::new();
        let session = Session::new(
            Cursor::new(input.to_vec()),
            &mut output,
            Dispatcher::new(Arc::new(Static)),
        );
        let result = session.run();
        (result, String::from_utf8(output).unwrap())
    }

    #[test]
    fn test_unix_info_scenario() {
        let (result, output) = run(b"unixinfo /tmp/app.sock\n");
        assert_eq!(output, "1000 42 1 /usr/bin/app app --serve\r\n");
        assert_eq!(result.unwrap().responses, 1);
    }

    #[test]
    fn test_invalid_port_keeps_session_open() {
        let (result, output) = run(b"TCPINFO 99999 127.0.0.1 80\nTCPINFO 2222 127.0.0.1 80\n");
        assert_eq!(output, "0 2222 1 /usr/sbin/sshd sshd\r\n");

        let summary = result.unwrap();
        assert_eq!(summary.requests, 2);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.responses, 1);
    }

    #[test]
    fn test_empty_and_unknown_lines_are_ignored() {
        let (result, output) = run(b"\n   \r\nHELLO world\nunixinfo /other.sock\n");
        assert_eq!(output, "0 0 0  \r\n");
        assert_eq!(result.unwrap().ignored, 3);
    }

    #[test]
    fn test_lookup_failure_writes_nothing() {
        let (result, output) = run(b"UDPINFO 53\nUNIXINFO /tmp/app.sock\n");
        assert_eq!(output, "1000 42 1 /usr/bin/app app --serve\r\n");
        assert_eq!(result.unwrap().rejected, 1);
    }

    #[test]
    fn test_unterminated_line_is_discarded() {
        let (result, output) = run(b"UNIXINFO /tmp/app.sock");
        assert!(output.is_empty());
        assert_eq!(result.unwrap(), SessionSummary::default());
    }

    #[test]
    fn test_invalid_utf8_ends_session() {
        let (result, output) = run(b"UNIXINFO /tmp/\xff\xfe\nUNIXINFO /tmp/app.sock\n");
        assert!(output.is_empty());
        assert!(matches!(result, Err(SessionError::Malformed(_))));
    }

    #[test]
    fn test_over_long_line_ends_session() {
        let mut input = b"UNIXINFO /".to_vec();
        input.extend(std::iter::repeat(b'a').take(MAX_LINE_LEN));
        input.push(b'\n');

        let (result, output) = run(&input);
        assert!(output.is_empty());
        assert!(matches!(result, Err(SessionError::LineTooLong { .. })));
    }

    #[test]
    fn test_line_at_limit_is_accepted() {
        let mut input = b"UNIXINFO /".to_vec();
        input.extend(std::iter::repeat(b'a').take(MAX_LINE_LEN - input.len() - 1));
        input.push(b'\n');
        assert_eq!(input.len(), MAX_LINE_LEN);

        let (result, output) = run(&input);
        assert_eq!(output, "0 0 0  \r\n");
        assert!(result.is_ok());
    }
}
