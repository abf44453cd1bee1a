//! TCP connect probe

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::{HealthError, Probe};

/// Passes when a TCP connection to `host:port` is accepted within the timeout
///
/// The connection is closed again immediately; nothing is sent.
///
/// # Example
///
/// ```rust,no_run
/// use trellis_core::health::{Probe, TcpProbe};
/// use std::time::Duration;
///
/// # async fn example() {
/// let probe = TcpProbe::local(5432, Duration::from_secs(1));
/// if let Err(e) = probe.check().await {
///     eprintln!("{} failed: {}", probe.describe(), e);
/// }
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TcpProbe {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    /// Probe `host:port`
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    /// Probe a port on the loopback interface, where managed services listen
    pub fn local(port: u16, timeout: Duration) -> Self {
        Self::new("127.0.0.1", port, timeout)
    }

    /// Target address as `host:port`
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn check(&self) -> Result<(), HealthError> {
        let address = self.address();
        match timeout(self.timeout, TcpStream::connect(&address)).await {
            Ok(Ok(_stream)) => {
                debug!(target: "trellis::health", "TCP probe to {} succeeded", address);
                Ok(())
            }
            Ok(Err(e)) => Err(HealthError::Tcp(e)),
            Err(_) => Err(HealthError::Timeout(self.timeout)),
        }
    }

    fn describe(&self) -> String {
        format!("tcp {}", self.address())
    }
}
