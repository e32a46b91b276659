//! Service browsing backends.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::mpsc;

use crate::error::{MonitorError, Result};

/// One advertised service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Human-readable instance name
    pub name: String,
    /// Candidate socket addresses; resolution picks whichever answers
    pub addrs: Vec<SocketAddr>,
}

impl Advertisement {
    pub fn new(name: impl Into<String>, addrs: Vec<SocketAddr>) -> Self {
        Self {
            name: name.into(),
            addrs,
        }
    }
}

/// Source of service advertisements.
///
/// Browsing continues until the returned receiver is dropped.
#[async_trait]
pub trait ServiceBrowser: Send + Sync {
    async fn browse(&self, service_type: &str) -> Result<mpsc::Receiver<Advertisement>>;
}

/// Browser backed by multicast DNS service discovery.
pub struct MdnsBrowser {
    daemon: ServiceDaemon,
}

impl MdnsBrowser {
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| MonitorError::Discovery(format!("Failed to start mDNS daemon: {}", e)))?;
        Ok(Self { daemon })
    }
}

impl Drop for MdnsBrowser {
    fn drop(&mut self) {
        if let Err(e) = self.daemon.shutdown() {
            debug!("mDNS daemon shutdown: {}", e);
        }
    }
}

#[async_trait]
impl ServiceBrowser for MdnsBrowser {
    async fn browse(&self, service_type: &str) -> Result<mpsc::Receiver<Advertisement>> {
        let events = self
            .daemon
            .browse(service_type)
            .map_err(|e| MonitorError::Discovery(format!("Failed to browse {}: {}", service_type, e)))?;

        let (tx, rx) = mpsc::channel(32);
        let daemon = self.daemon.clone();
        let service_type = service_type.to_string();

        // The mDNS receiver is blocking; poll it off the async workers and
        // stop once the scan drops its end.
        tokio::task::spawn_blocking(move || {
            loop {
                match events.recv_timeout(Duration::from_millis(250)) {
                    Ok(ServiceEvent::ServiceResolved(info)) => {
                        let ad = advertisement_from(&info);
                        debug!("Resolved advertisement {} ({} addresses)", ad.name, ad.addrs.len());
                        if tx.blocking_send(ad).is_err() {
                            break;
                        }
                    }
                    Ok(other) => debug!("mDNS event: {:?}", other),
                    Err(_) if events.is_disconnected() => break,
                    Err(_) => {
                        if tx.is_closed() {
                            break;
                        }
                    }
                }
            }
            if let Err(e) = daemon.stop_browse(&service_type) {
                warn!("Failed to stop browsing {}: {}", service_type, e);
            }
        });

        Ok(rx)
    }
}

fn advertisement_from(info: &ServiceInfo) -> Advertisement {
    let name = instance_name(info.get_fullname(), info.get_type()).to_string();
    let port = info.get_port();
    let addrs = info
        .get_addresses()
        .iter()
        .map(|ip| SocketAddr::new(*ip, port))
        .collect();
    Advertisement::new(name, addrs)
}

/// `Studio._uamixer._tcp.local.` -> `Studio`
pub(crate) fn instance_name<'a>(fullname: &'a str, service_type: &str) -> &'a str {
    fullname
        .strip_suffix(service_type)
        .map(|s| s.trim_end_matches('.'))
        .filter(|s| !s.is_empty())
        .unwrap_or(fullname)
}
