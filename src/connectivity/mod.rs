//! Outbound network availability checks.
//!
//! The probe is a pure, synchronous query. It never fails: anything that
//! prevents a positive answer reports `false`.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::config::ConnectivityConfig;

pub trait ConnectivityProbe: Send + Sync {
    fn is_available(&self) -> bool;
}

/// Reports availability when a TCP connection to a known address succeeds
#[derive(Debug, Clone)]
pub struct TcpConnectivityProbe {
    address: String,
    timeout: Duration,
}

impl TcpConnectivityProbe {
    pub fn new<A: Into<String>>(address: A, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }
}

impl ConnectivityProbe for TcpConnectivityProbe {
    fn is_available(&self) -> bool {
        let addrs = match self.address.to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                debug!(address = %self.address, error = %e, "Probe address did not resolve");
                return false;
            }
        };

        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(_) => return true,
                Err(e) => debug!(%addr, error = %e, "Probe connect failed"),
            }
        }
        false
    }
}

/// Fixed answer, for forced offline mode and tests
#[derive(Debug, Clone, Copy)]
pub struct StaticConnectivity(pub bool);

impl ConnectivityProbe for StaticConnectivity {
    fn is_available(&self) -> bool {
        self.0
    }
}

/// Build the probe described by the configuration
pub fn from_config(config: &ConnectivityConfig) -> Box<dyn ConnectivityProbe> {
    if config.force_offline {
        Box::new(StaticConnectivity(false))
    } else {
        Box::new(TcpConnectivityProbe::new(
            config.probe_address.clone(),
            config.probe_timeout,
        ))
    }
}
