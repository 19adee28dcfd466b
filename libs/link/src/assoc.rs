//! Link-layer association.
//!
//! The network interface the adapter runs on top of is an external
//! collaborator; [`LinkLayer`] is the whole contract the adapter has with
//! it. Hosted platforms get [`HostLink`], where the operating system manages
//! association and there is nothing to do.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use tether_core::Result;

/// How long an association attempt may take before it is abandoned.
pub(crate) const ASSOC_TIMEOUT: Duration = Duration::from_secs(30);

/// Credentials for associating with a link.
#[derive(Clone, Serialize, Deserialize)]
pub struct LinkCredentials {
    /// Network name.
    pub ssid: String,
    /// Shared passphrase.
    pub passphrase: String,
}

impl LinkCredentials {
    pub fn new(ssid: impl Into<String>, passphrase: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            passphrase: passphrase.into(),
        }
    }
}

// The passphrase stays out of logs and debug output.
impl fmt::Debug for LinkCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkCredentials")
            .field("ssid", &self.ssid)
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

/// Link/association layer beneath the TCP stack.
#[async_trait]
pub trait LinkLayer: Send + Sync {
    /// Associate with the link using the given credentials.
    async fn associate(&self, credentials: &LinkCredentials) -> Result<()>;
}

/// Link layer for hosted platforms: association is managed by the operating
/// system and the interface is assumed up.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostLink;

#[async_trait]
impl LinkLayer for HostLink {
    async fn associate(&self, credentials: &LinkCredentials) -> Result<()> {
        info!(ssid = %credentials.ssid, "link managed by the host, nothing to associate");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_passphrase() {
        let credentials = LinkCredentials::new("lab", "hunter2");
        let rendered = format!("{credentials:?}");
        assert!(rendered.contains("lab"));
        assert!(!rendered.contains("hunter2"));
    }
}
