//! Protocol compliance tests for the procsnitchd line format.
//!
//! Covers request parsing, argument validation and response encoding without
//! opening any sockets.

use procsnitchd::dispatch::{parse_port, validate};
use procsnitchd::protocol::{
    decode_response, encode_response, parse_line, Command, Line, Request, RESPONSE_TERMINATOR,
};
use procsnitchd::{LookupQuery, ProcessInfo, RequestError};

fn request(line: &str) -> Request {
    match parse_line(line) {
        Line::Request(request) => request,
        other => panic!("expected a request, got {:?}", other),
    }
}

// ============================================================================
// Request Parsing
// ============================================================================

#[test]
fn test_command_names_any_case() {
    for name in ["UNIXINFO", "unixinfo", "UnixInfo", "uNiXiNfO"] {
        assert_eq!(request(&format!("{} /x\n", name)).command, Command::UnixInfo);
    }
    assert_eq!(request("tcpinfo 1 ::1 2\n").command, Command::TcpInfo);
    assert_eq!(request("UdpInfo 53\n").command, Command::UdpInfo);
}

#[test]
fn test_surrounding_whitespace_trimmed() {
    let req = request("\t  UDPINFO 53  \r\n");
    assert_eq!(req.args, vec!["53"]);
}

#[test]
fn test_unknown_commands() {
    assert_eq!(parse_line("UNIX /x\n"), Line::Unknown("UNIX".into()));
    assert_eq!(parse_line("GET / HTTP/1.1\r\n"), Line::Unknown("GET".into()));
}

#[test]
fn test_command_names_on_the_wire() {
    assert_eq!(Command::UnixInfo.to_string(), "UNIXINFO");
    assert_eq!(Command::TcpInfo.to_string(), "TCPINFO");
    assert_eq!(Command::UdpInfo.to_string(), "UDPINFO");
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_tcp_requires_three_arguments() {
    assert!(matches!(
        validate(&request("TCPINFO 80 127.0.0.1\n")),
        Err(RequestError::MissingArguments {
            command: "TCPINFO",
            expected: 3,
            got: 2
        })
    ));
}

#[test]
fn test_tcp_out_of_range_ports() {
    for line in [
        "TCPINFO 99999 127.0.0.1 80\n",
        "TCPINFO 80 127.0.0.1 65536\n",
        "TCPINFO -1 127.0.0.1 80\n",
        "TCPINFO http 127.0.0.1 80\n",
    ] {
        assert!(
            matches!(validate(&request(line)), Err(RequestError::InvalidPort { .. })),
            "{line:?} should be rejected"
        );
    }
}

#[test]
fn test_full_port_range_accepted() {
    // Ports above 32767 are valid.
    assert_eq!(parse_port("40000").unwrap(), 40000);
    let query = validate(&request("TCPINFO 65535 10.1.2.3 0\n")).unwrap();
    assert_eq!(
        query,
        LookupQuery::Tcp {
            src_port: 65535,
            dst_addr: "10.1.2.3".parse().unwrap(),
            dst_port: 0,
        }
    );
}

#[test]
fn test_tcp_accepts_ipv6() {
    let query = validate(&request("TCPINFO 1024 2001:db8::1 443\n")).unwrap();
    assert!(matches!(query, LookupQuery::Tcp { dst_addr, .. } if dst_addr.is_ipv6()));
}

#[test]
fn test_tcp_rejects_hostnames() {
    assert!(matches!(
        validate(&request("TCPINFO 1024 example.com 443\n")),
        Err(RequestError::InvalidAddress { .. })
    ));
}

#[test]
fn test_unix_path_passed_verbatim() {
    let query = validate(&request("UNIXINFO @abstract/Name\n")).unwrap();
    assert_eq!(
        query,
        LookupQuery::Unix {
            path: "@abstract/Name".into()
        }
    );
}

// ============================================================================
// Response Encoding
// ============================================================================

#[test]
fn test_encoding_example() {
    let info = ProcessInfo::new(0, 1234, 1, "/usr/bin/x", "x --flag");
    assert_eq!(encode_response(&info), "0 1234 1 /usr/bin/x x --flag\r\n");
}

#[test]
fn test_terminator_is_crlf() {
    assert_eq!(RESPONSE_TERMINATOR, "\r\n");
    let line = encode_response(&ProcessInfo::new(1, 2, 3, "/a", "a"));
    assert!(line.ends_with("\r\n"));
    assert_eq!(line.matches('\n').count(), 1);
}

#[test]
fn test_large_ids_in_base_10() {
    let info = ProcessInfo::new(u32::MAX, 4194304, 4194303, "/bin/sh", "sh");
    assert_eq!(encode_response(&info), "4294967295 4194304 4194303 /bin/sh sh\r\n");
}

#[test]
fn test_decode_what_was_encoded() {
    let info = ProcessInfo::new(1000, 42, 1, "/usr/bin/app", "app --serve --verbose");
    assert_eq!(decode_response(&encode_response(&info)).unwrap(), info);
    assert_eq!(
        decode_response(&encode_response(&ProcessInfo::not_found())).unwrap(),
        ProcessInfo::not_found()
    );
}

#[test]
fn test_request_lines_from_queries() {
    let unix = LookupQuery::Unix {
        path: "/run/app.sock".into(),
    };
    assert_eq!(Request::from(&unix).to_line(), "UNIXINFO /run/app.sock\n");

    let udp = LookupQuery::Udp { src_port: 5353 };
    assert_eq!(Request::from(&udp).to_line(), "UDPINFO 5353\n");

    // What the client sends is what the server parses.
    let tcp = LookupQuery::Tcp {
        src_port: 1,
        dst_addr: "fe80::1".parse().unwrap(),
        dst_port: 2,
    };
    assert_eq!(validate(&request(&Request::from(&tcp).to_line())).unwrap(), tcp);
}
