//! Connection endpoints.
//!
//! ```
//! use rpcwire::transport::Endpoint;
//!
//! let endpoint: Endpoint = "tcp://127.0.0.1:9000".parse().unwrap();
//! assert_eq!(endpoint.to_string(), "tcp://127.0.0.1:9000");
//! ```

use std::fmt;
use std::str::FromStr;

#[cfg(unix)]
use std::path::PathBuf;

use crate::error::{Result, RpcError};

const TCP_SCHEME: &str = "tcp://";
#[cfg(unix)]
const UNIX_SCHEME: &str = "unix://";

/// Where a server listens or a client connects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `tcp://host:port`; the host may be a name or an IP literal.
    Tcp(String),
    /// `unix:///path/to/socket`
    #[cfg(unix)]
    Unix(PathBuf),
}

impl Endpoint {
    pub fn tcp(addr: impl Into<String>) -> Self {
        Endpoint::Tcp(addr.into())
    }

    #[cfg(unix)]
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Endpoint::Unix(path.into())
    }
}

impl FromStr for Endpoint {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(addr) = s.strip_prefix(TCP_SCHEME) {
            if addr.is_empty() || !addr.contains(':') {
                return Err(RpcError::Validation(format!(
                    "TCP endpoint needs host:port, got {s:?}"
                )));
            }
            return Ok(Endpoint::Tcp(addr.to_string()));
        }

        #[cfg(unix)]
        if let Some(path) = s.strip_prefix(UNIX_SCHEME) {
            if path.is_empty() {
                return Err(RpcError::Validation(format!(
                    "Unix endpoint needs a path, got {s:?}"
                )));
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }

        Err(RpcError::Validation(format!("Unsupported endpoint {s:?}")))
    }
}

impl TryFrom<&str> for Endpoint {
    type Error = RpcError;

    fn try_from(s: &str) -> Result<Self> {
        s.parse()
    }
}

impl TryFrom<String> for Endpoint {
    type Error = RpcError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "{TCP_SCHEME}{addr}"),
            #[cfg(unix)]
            Endpoint::Unix(path) => write!(f, "{UNIX_SCHEME}{}", path.display()),
        }
    }
}
