use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::DEFAULT_COLLECT_RATE;
use crate::error::{Error, Result};

/// Default request timeout, the RFC 5389 initial RTO
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Peer to send requests to; setting it here is equivalent to `Client::dial`
    pub peer: Option<SocketAddr>,
    /// Time a `do_request` waits for a response before timing out
    pub timeout: Duration,
    /// Interval between collector sweeps of the transaction table
    pub collect_rate: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            peer: None,
            timeout: DEFAULT_TIMEOUT,
            collect_rate: DEFAULT_COLLECT_RATE,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_collect_rate(mut self, rate: Duration) -> Self {
        self.collect_rate = rate;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::Config("timeout must be greater than zero".to_string()));
        }
        if self.collect_rate.is_zero() {
            return Err(Error::Config("collect_rate must be greater than zero".to_string()));
        }
        Ok(())
    }
}
