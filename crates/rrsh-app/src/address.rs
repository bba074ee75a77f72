//! `[address][:[port]]` strings, as accepted on the command line.

use std::net::{SocketAddr, ToSocketAddrs};

use anyhow::{bail, Context, Result};

/// Port used when none is given: rsh's 514, subtracted from 2^15.
pub const DEFAULT_PORT: u16 = 32254;

/// A possibly incomplete host/port pair.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Address {
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl Address {
    /// Parse `[address][:[port]]`.
    ///
    /// The port is whatever follows the last `:`. IPv6 literals with a port
    /// must be bracketed (`[::1]:4000`); an unbracketed string containing
    /// more than one `:` is taken as an IPv6 literal without a port.
    pub fn parse(input: &str) -> Result<Self> {
        let (host, port) = if let Some(rest) = input.strip_prefix('[') {
            let Some((host, after)) = rest.split_once(']') else {
                bail!("unterminated '[' in address {input:?}");
            };
            match after {
                "" => (host, ""),
                _ => match after.strip_prefix(':') {
                    Some(port) => (host, port),
                    None => bail!("unexpected {after:?} after ']' in address {input:?}"),
                },
            }
        } else if input.matches(':').count() > 1 {
            (input, "")
        } else {
            input.rsplit_once(':').unwrap_or((input, ""))
        };

        let port = if port.is_empty() {
            None
        } else {
            Some(
                port.parse::<u16>()
                    .with_context(|| format!("invalid port {port:?}"))?,
            )
        };

        Ok(Self {
            host: (!host.is_empty()).then(|| host.to_string()),
            port,
        })
    }

    /// Resolve to socket addresses, filling in whatever was omitted.
    pub fn resolve(&self, default_host: &str, default_port: u16) -> Result<Vec<SocketAddr>> {
        let host = self.host.as_deref().unwrap_or(default_host);
        let port = self.port.unwrap_or(default_port);
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .with_context(|| format!("failed to resolve {host}:{port}"))?
            .collect();
        if addrs.is_empty() {
            bail!("{host}:{port} did not resolve to any address");
        }
        Ok(addrs)
    }
}
