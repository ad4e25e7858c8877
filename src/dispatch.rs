//! Command dispatch: argument validation and routing to the lookup capability.

use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

use crate::error::RequestError;
use crate::lookup::{LookupQuery, ProcessInfo, ProcessLookup};
use crate::protocol::{Command, Request};

/// Validates requests and forwards them to a [`ProcessLookup`].
///
/// Cheap to clone; every session gets its own handle to the same capability.
#[derive(Clone)]
pub struct Dispatcher {
    lookup: Arc<dyn ProcessLookup>,
}

impl Dispatcher {
    pub fn new(lookup: Arc<dyn ProcessLookup>) -> Self {
        Self { lookup }
    }

    /// Validate `request` and run the lookup it names.
    pub fn dispatch(&self, request: &Request) -> Result<ProcessInfo, RequestError> {
        let query = validate(request)?;
        debug!(query = %query, "Dispatching lookup");
        self.lookup.lookup(&query).map_err(RequestError::Lookup)
    }
}

/// Check arity and argument types, producing a typed query.
///
/// Extra trailing arguments are ignored.
pub fn validate(request: &Request) -> Result<LookupQuery, RequestError> {
    let args = &request.args;
    if args.len() < request.command.arity() {
        return Err(RequestError::MissingArguments {
            command: request.command.as_str(),
            expected: request.command.arity(),
            got: args.len(),
        });
    }

    let query = match request.command {
        Command::UnixInfo => LookupQuery::Unix {
            path: args[0].clone(),
        },
        Command::TcpInfo => LookupQuery::Tcp {
            src_port: parse_port(&args[0])?,
            dst_addr: parse_addr(&args[1])?,
            dst_port: parse_port(&args[2])?,
        },
        Command::UdpInfo => LookupQuery::Udp {
            src_port: parse_port(&args[0])?,
        },
    };
    Ok(query)
}

/// Base-10 port in `0..=65535`. Signs and other decorations are rejected.
pub fn parse_port(value: &str) -> Result<u16, RequestError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RequestError::InvalidPort {
            value: value.to_string(),
        });
    }
    value.parse().map_err(|_| RequestError::InvalidPort {
        value: value.to_string(),
    })
}

/// IPv4 or IPv6 literal.
pub fn parse_addr(value: &str) -> Result<IpAddr, RequestError> {
    value.parse().map_err(|_| RequestError::InvalidAddress {
        value: value.to_string(),
    })
}
