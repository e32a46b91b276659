//! Manually entered hosts and the selected endpoint.

use std::sync::Arc;

use log::info;

use super::store::SnapshotStore;
use crate::domain::{DiscoveredHost, Endpoint, endpoint::is_loopback};
use crate::error::{MonitorError, Result};

pub const KNOWN_HOSTS_KEY: &str = "known_hosts";
pub const SELECTED_HOST_KEY: &str = "selected_host";

/// Display name for the engine on this machine.
pub const LOCALHOST_NAME: &str = "This machine";

/// Known hosts, persisted in the snapshot store.
pub struct HostBook {
    store: Arc<SnapshotStore>,
    manual: Vec<DiscoveredHost>,
    selected: Option<Endpoint>,
}

impl HostBook {
    /// Load from the store; missing keys start empty.
    pub fn load(store: Arc<SnapshotStore>) -> Result<Self> {
        let manual = store.get_as(KNOWN_HOSTS_KEY)?.unwrap_or_default();
        let selected = store.get_as(SELECTED_HOST_KEY)?;
        Ok(Self {
            store,
            manual,
            selected,
        })
    }

    pub fn manual(&self) -> &[DiscoveredHost] {
        &self.manual
    }

    /// Add (or rename) a manual host.
    pub fn add(&mut self, address: &str, port: u16, name: Option<&str>) -> Result<DiscoveredHost> {
        let address = address.trim();
        if address.is_empty() || address.chars().any(char::is_whitespace) {
            return Err(MonitorError::InvalidHost(address.to_string()));
        }
        if is_loopback(address) {
            return Err(MonitorError::InvalidHost(format!("{} is always listed", address)));
        }

        let host = DiscoveredHost::new(Endpoint::new(address, port), name.unwrap_or(address));
        match self.manual.iter_mut().find(|h| h.endpoint == host.endpoint) {
            Some(existing) => existing.display_name = host.display_name.clone(),
            None => self.manual.push(host.clone()),
        }
        info!("Added host {} ({})", host.endpoint, host.display_name);
        self.save()?;
        Ok(host)
    }

    /// Remove every manual host at `address`. Returns whether any was removed.
    pub fn remove(&mut self, address: &str) -> Result<bool> {
        if is_loopback(address) {
            return Err(MonitorError::InvalidHost("localhost cannot be removed".to_string()));
        }

        let before = self.manual.len();
        self.manual.retain(|h| h.address() != address);
        let removed = self.manual.len() != before;

        if self.selected.as_ref().is_some_and(|e| e.address == address) {
            self.selected = None;
        }
        if removed {
            info!("Removed host {}", address);
        }
        self.save()?;
        Ok(removed)
    }

    pub fn select(&mut self, endpoint: Endpoint) -> Result<()> {
        info!("Selected host {}", endpoint);
        self.selected = Some(endpoint);
        self.save()
    }

    /// Selected endpoint, localhost when nothing is selected.
    pub fn selected(&self) -> Endpoint {
        self.selected.clone().unwrap_or_else(Endpoint::localhost)
    }

    /// Explicit selection, if any.
    pub fn selection(&self) -> Option<&Endpoint> {
        self.selected.as_ref()
    }

    /// Localhost, then manual hosts, then discovered hosts not already listed.
    pub fn merged(&self, discovered: &[DiscoveredHost]) -> Vec<DiscoveredHost> {
        let mut hosts = vec![DiscoveredHost::new(Endpoint::localhost(), LOCALHOST_NAME)];
        for host in self.manual.iter().chain(discovered) {
            if !hosts.iter().any(|h| h.address() == host.address()) {
                hosts.push(host.clone());
            }
        }
        hosts
    }

    fn save(&self) -> Result<()> {
        self.store.set_many(vec![
            (KNOWN_HOSTS_KEY.to_string(), serde_json::to_value(&self.manual)?),
            (SELECTED_HOST_KEY.to_string(), serde_json::to_value(&self.selected)?),
        ])
    }
}
