use std::fmt;
use std::str::FromStr;

use crate::error::TransportError;

/// Port used when a `ws://` URL names none.
pub const DEFAULT_WS_PORT: u16 = 80;

/// Endpoint a connection dials: host, port and the request path sent in the upgrade.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl Target {
    /// Target at `host:port` with the root path.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            path: "/".to_string(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        self
    }

    /// Parse a `ws://host[:port][/path]` URL.
    pub fn parse(url: &str) -> Result<Self, TransportError> {
        url.parse()
    }

    /// Socket address string suitable for `TcpStream::connect`.
    pub fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Value of the `Host` header; the port is omitted when it is the default.
    pub fn host_header(&self) -> String {
        if self.port == DEFAULT_WS_PORT {
            if self.host.contains(':') {
                format!("[{}]", self.host)
            } else {
                self.host.clone()
            }
        } else {
            self.addr()
        }
    }
}

impl FromStr for Target {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |why: &str| TransportError::InvalidTarget(format!("{s}: {why}"));

        let (scheme, rest) = s.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        match scheme.to_ascii_lowercase().as_str() {
            "ws" => {}
            "wss" => return Err(invalid("tls is not handled by this transport")),
            _ => return Err(invalid("scheme must be ws")),
        }

        let (authority, path) = match rest.find(['/', '?']) {
            Some(i) if rest[i..].starts_with('/') => (&rest[..i], rest[i..].to_string()),
            Some(i) => (&rest[..i], format!("/{}", &rest[i..])),
            None => (rest, "/".to_string()),
        };

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated ipv6 literal"))?;
            let port = match after.strip_prefix(':') {
                Some(p) => Some(p),
                None if after.is_empty() => None,
                None => return Err(invalid("junk after ipv6 literal")),
            };
            (host, port)
        } else {
            match authority.rsplit_once(':') {
                Some((h, p)) => (h, Some(p)),
                None => (authority, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        let port = match port {
            Some(p) => p.parse().map_err(|_| invalid("bad port"))?,
            None => DEFAULT_WS_PORT,
        };

        Ok(Self {
            host: host.to_string(),
            port,
            path,
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ws://{}{}", self.addr(), self.path)
    }
}
