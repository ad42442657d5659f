//! Autopilot connection URLs.
//!
//! Accepted forms:
//!
//! - `tcp://[server_host][:server_port]`
//! - `udp://[bind_host][:bind_port]`
//! - `serial:///path/to/serial/dev[:baudrate]`
//! - `sim://[profile]` for the in-process simulated vehicle

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Default TCP server host.
pub const DEFAULT_TCP_HOST: &str = "127.0.0.1";
/// Default TCP server port.
pub const DEFAULT_TCP_PORT: u16 = 5760;
/// Default UDP bind host.
pub const DEFAULT_UDP_HOST: &str = "0.0.0.0";
/// Default UDP bind port (where a simulator usually sends).
pub const DEFAULT_UDP_PORT: u16 = 14540;
/// Default serial baudrate.
pub const DEFAULT_BAUDRATE: u32 = 57_600;

/// Usage text listing the accepted URL forms.
pub const URL_HELP: &str = "\
Connection URL format should be:
 For TCP : tcp://[server_host][:server_port]
 For UDP : udp://[bind_host][:bind_port]
 For Serial : serial:///path/to/serial/dev[:baudrate]
 For the simulator : sim://[profile]
For example, to connect to the simulator use URL: udp://:14540";

/// A parsed connection URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionUrl {
    /// Connect to a TCP server.
    Tcp {
        /// Server host.
        host: String,
        /// Server port.
        port: u16,
    },
    /// Listen on a UDP port.
    Udp {
        /// Local address to bind.
        bind_host: String,
        /// Local port to bind.
        bind_port: u16,
    },
    /// Open a serial device.
    Serial {
        /// Device path.
        path: PathBuf,
        /// Line speed.
        baudrate: u32,
    },
    /// In-process simulated vehicle.
    Sim {
        /// Named behavior profile; empty for the default.
        profile: String,
    },
}

impl ConnectionUrl {
    /// The URL scheme.
    #[must_use]
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Tcp { .. } => "tcp",
            Self::Udp { .. } => "udp",
            Self::Serial { .. } => "serial",
            Self::Sim { .. } => "sim",
        }
    }

    /// Address string in the `mavlink` crate's format, or `None` for the
    /// simulator.
    #[must_use]
    pub fn mavlink_address(&self) -> Option<String> {
        match self {
            Self::Tcp { host, port } => Some(format!("tcpout:{host}:{port}")),
            Self::Udp {
                bind_host,
                bind_port,
            } => Some(format!("udpin:{bind_host}:{bind_port}")),
            Self::Serial { path, baudrate } => Some(format!("serial:{}:{baudrate}", path.display())),
            Self::Sim { .. } => None,
        }
    }
}

fn invalid(url: &str, message: impl Into<String>) -> Error {
    Error::InvalidUrl {
        url: url.to_string(),
        message: message.into(),
    }
}

/// Split `host:port`, filling in defaults for empty parts.
fn host_port(url: &str, rest: &str, default_host: &str, default_port: u16) -> Result<(String, u16)> {
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| invalid(url, format!("invalid port '{port}'")))?;
            (host, port)
        }
        None => (rest, default_port),
    };
    if host.contains('/') {
        return Err(invalid(url, format!("invalid host '{host}'")));
    }
    let host = if host.is_empty() { default_host } else { host };
    Ok((host.to_string(), port))
}

impl FromStr for ConnectionUrl {
    type Err = Error;

    fn from_str(url: &str) -> Result<Self> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| invalid(url, "missing '://'"))?;

        match scheme {
            "tcp" => {
                let (host, port) = host_port(url, rest, DEFAULT_TCP_HOST, DEFAULT_TCP_PORT)?;
                Ok(Self::Tcp { host, port })
            }
            "udp" => {
                let (bind_host, bind_port) =
                    host_port(url, rest, DEFAULT_UDP_HOST, DEFAULT_UDP_PORT)?;
                Ok(Self::Udp {
                    bind_host,
                    bind_port,
                })
            }
            "serial" => {
                let (path, baudrate) = match rest.rsplit_once(':') {
                    Some((path, baud)) if !baud.is_empty() && baud.bytes().all(|b| b.is_ascii_digit()) => {
                        let baudrate = baud
                            .parse::<u32>()
                            .map_err(|_| invalid(url, format!("invalid baudrate '{baud}'")))?;
                        (path, baudrate)
                    }
                    _ => (rest, DEFAULT_BAUDRATE),
                };
                if path.is_empty() {
                    return Err(invalid(url, "missing serial device path"));
                }
                if baudrate == 0 {
                    return Err(invalid(url, "baudrate must be greater than 0"));
                }
                Ok(Self::Serial {
                    path: PathBuf::from(path),
                    baudrate,
                })
            }
            "sim" => Ok(Self::Sim {
                profile: rest.trim_end_matches('/').to_string(),
            }),
            other => Err(invalid(url, format!("unknown scheme '{other}'"))),
        }
    }
}

impl fmt::Display for ConnectionUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Self::Udp {
                bind_host,
                bind_port,
            } => write!(f, "udp://{bind_host}:{bind_port}"),
            Self::Serial { path, baudrate } => write!(f, "serial://{}:{baudrate}", path.display()),
            Self::Sim { profile } => write!(f, "sim://{profile}"),
        }
    }
}
