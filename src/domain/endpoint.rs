//! Endpoints and discovered hosts

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Default TCP port of the console engine.
pub const DEFAULT_PORT: u16 = 4710;

/// An address+port pair identifying a reachable console engine.
///
/// `is_local` is derived from the address at construction; identity for
/// equality and hashing is the address and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
    pub is_local: bool,
}

impl Endpoint {
    /// Create an endpoint, classifying loopback addresses as local.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        let address = address.into();
        let is_local = is_loopback(&address);
        Self {
            address,
            port,
            is_local,
        }
    }

    /// The engine on this machine.
    pub fn localhost() -> Self {
        Self::new("127.0.0.1", DEFAULT_PORT)
    }

    /// `host:port` form suitable for display and for `TcpStream::connect`.
    pub fn authority(&self) -> String {
        if self.address.contains(':') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.port == other.port
    }
}

impl Eq for Endpoint {}

impl std::hash::Hash for Endpoint {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

/// Whether an address string names this machine.
pub fn is_loopback(address: &str) -> bool {
    if address.eq_ignore_ascii_case("localhost") {
        return true;
    }
    address
        .parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

/// A console engine found on the network (or entered by hand).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredHost {
    pub endpoint: Endpoint,
    pub display_name: String,
}

impl DiscoveredHost {
    pub fn new(endpoint: Endpoint, display_name: impl Into<String>) -> Self {
        Self {
            endpoint,
            display_name: display_name.into(),
        }
    }

    /// Address used for deduplication.
    pub fn address(&self) -> &str {
        &self.endpoint.address
    }
}
