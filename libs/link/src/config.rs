//! Adapter configuration.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use serde::{Deserialize, Serialize};

use tether_core::{Error, Result};

use crate::state::Role;

/// Default poll interval in stack ticks.
const DEFAULT_POLL_TICKS: u32 = 5;

/// Configuration for a [`Tether`](crate::Tether) adapter.
///
/// Covers the four construction inputs: role, IPv4 address (dotted quad),
/// port, and poll interval. The address is the remote host for a client and
/// is informational for a server, which always binds every local interface.
///
/// # Example
///
/// ```no_run
/// use tether_link::TetherConfig;
///
/// let config = TetherConfig::server("0.0.0.0", 5000).poll_interval(5);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TetherConfig {
    /// Which side of the connection to play.
    pub role: Role,
    /// IPv4 address, dotted quad.
    pub addr: String,
    /// TCP port.
    pub port: u16,
    /// Poll interval in stack ticks (one tick is 500 ms). Doubled for
    /// server-accepted connections. Must be positive.
    pub poll_ticks: u32,
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            role: Role::Client,
            addr: "127.0.0.1".to_string(),
            port: 80,
            poll_ticks: DEFAULT_POLL_TICKS,
        }
    }
}

impl TetherConfig {
    /// Configuration for a client connecting to `addr:port`.
    pub fn client(addr: impl Into<String>, port: u16) -> Self {
        Self {
            role: Role::Client,
            addr: addr.into(),
            port,
            ..Self::default()
        }
    }

    /// Configuration for a server listening on `port`.
    pub fn server(addr: impl Into<String>, port: u16) -> Self {
        Self {
            role: Role::Server,
            addr: addr.into(),
            port,
            ..Self::default()
        }
    }

    /// Set the poll interval in stack ticks.
    pub fn poll_interval(mut self, ticks: u32) -> Self {
        self.poll_ticks = ticks;
        self
    }

    /// Get the full address (host:port) this adapter targets.
    pub fn address(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }

    /// Check the construction constraints: syntactically valid IPv4 address
    /// and a positive poll interval. Returns the parsed address.
    pub(crate) fn validate(&self) -> Result<Ipv4Addr> {
        let ip: Ipv4Addr = self
            .addr
            .parse()
            .map_err(|_| Error::InvalidAddress(self.addr.clone()))?;
        if self.poll_ticks == 0 {
            return Err(Error::custom("poll interval must be positive"));
        }
        Ok(ip)
    }

    /// The remote socket address a client connects to.
    pub(crate) fn remote_addr(&self) -> Result<SocketAddr> {
        let ip = self.validate()?;
        Ok(SocketAddr::V4(SocketAddrV4::new(ip, self.port)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_loopback_web() {
        let config = TetherConfig::default();
        assert_eq!(config.role, Role::Client);
        assert_eq!(config.address(), "127.0.0.1:80");
        assert_eq!(config.poll_ticks, DEFAULT_POLL_TICKS);
    }

    #[test]
    fn validate_rejects_malformed_address() {
        assert!(TetherConfig::client("10.0.0.1", 80).validate().is_ok());
        assert!(TetherConfig::client("not-an-ip", 80).validate().is_err());
        assert!(TetherConfig::client("256.0.0.1", 80).validate().is_err());
        // IPv6 is out of scope for this adapter.
        assert!(TetherConfig::client("::1", 80).validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_poll_interval() {
        let config = TetherConfig::server("0.0.0.0", 5000).poll_interval(0);
        assert!(config.validate().is_err());
    }
}
