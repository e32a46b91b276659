//! Discovery service: one time-bounded scan at a time.
//!
//! A scan browses the configured service type, resolves every advertisement
//! concurrently, drops loopback results, deduplicates by address and stops
//! after the scan timeout whether or not advertisements are still arriving.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use super::browser::{Advertisement, MdnsBrowser, ServiceBrowser};
use super::resolver::{Resolver, TcpResolver};
use crate::domain::{DiscoveredHost, Endpoint};
use crate::error::Result;

/// Service type advertised by console engines.
pub const SERVICE_TYPE: &str = "_uamixer._tcp.local.";

/// Configuration for discovery scans.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Fully-qualified service type to browse
    pub service_type: String,
    /// Hard bound on one scan
    pub scan_timeout: Duration,
    /// Bound on resolving a single advertisement
    pub resolve_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_type: SERVICE_TYPE.to_string(),
            scan_timeout: Duration::from_secs(10),
            resolve_timeout: Duration::from_secs(3),
        }
    }
}

impl DiscoveryConfig {
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }
}

/// Observable discovery state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoverySnapshot {
    pub hosts: Vec<DiscoveredHost>,
    pub scanning: bool,
}

struct ScanState {
    generation: u64,
    hosts: Vec<DiscoveredHost>,
    scanning: bool,
    task: Option<JoinHandle<()>>,
}

struct DiscoveryInner {
    config: DiscoveryConfig,
    browser: Arc<dyn ServiceBrowser>,
    resolver: Arc<dyn Resolver>,
    scan: Mutex<ScanState>,
    snapshot: watch::Sender<DiscoverySnapshot>,
}

impl Drop for DiscoveryInner {
    fn drop(&mut self) {
        let scan = self.scan.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = scan.task.take() {
            task.abort();
        }
    }
}

impl DiscoveryInner {
    fn lock(&self) -> MutexGuard<'_, ScanState> {
        self.scan.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, scan: &ScanState) {
        self.snapshot.send_replace(DiscoverySnapshot {
            hosts: scan.hosts.clone(),
            scanning: scan.scanning,
        });
    }

    fn record(&self, generation: u64, host: DiscoveredHost) {
        let mut scan = self.lock();
        if scan.generation != generation {
            return;
        }
        if host.endpoint.is_local {
            debug!("Skipping loopback host {}", host.endpoint);
            return;
        }
        if scan.hosts.iter().any(|h| h.address() == host.address()) {
            debug!("Skipping duplicate host {}", host.endpoint);
            return;
        }

        info!("Discovered {} at {}", host.display_name, host.endpoint);
        scan.hosts.push(host);
        self.publish(&scan);
    }

    fn finish(&self, generation: u64) {
        let mut scan = self.lock();
        if scan.generation != generation {
            return;
        }
        // Called from the scan task itself
        drop(scan.task.take());
        scan.scanning = false;
        info!("Scan finished with {} host(s)", scan.hosts.len());
        self.publish(&scan);
    }
}

/// Finds console engines on the local network.
///
/// Must be used inside a Tokio runtime.
#[derive(Clone)]
pub struct DiscoveryService {
    inner: Arc<DiscoveryInner>,
}

impl DiscoveryService {
    pub fn new(
        config: DiscoveryConfig,
        browser: Arc<dyn ServiceBrowser>,
        resolver: Arc<dyn Resolver>,
    ) -> Self {
        let (snapshot, _) = watch::channel(DiscoverySnapshot::default());
        Self {
            inner: Arc::new(DiscoveryInner {
                config,
                browser,
                resolver,
                scan: Mutex::new(ScanState {
                    generation: 0,
                    hosts: Vec::new(),
                    scanning: false,
                    task: None,
                }),
                snapshot,
            }),
        }
    }

    /// Service browsing over mDNS with TCP resolution.
    pub fn mdns(config: DiscoveryConfig) -> Result<Self> {
        Ok(Self::new(config, Arc::new(MdnsBrowser::new()?), Arc::new(TcpResolver)))
    }

    /// Start a new scan, cancelling any running one and clearing results.
    pub fn start_scan(&self) {
        let mut scan = self.inner.lock();
        cancel_scan(&mut scan);
        scan.generation += 1;
        scan.hosts.clear();
        scan.scanning = true;
        self.inner.publish(&scan);

        let generation = scan.generation;
        info!("Scanning for {} (generation {})", self.inner.config.service_type, generation);
        scan.task = Some(tokio::spawn(run_scan(
            Arc::downgrade(&self.inner),
            generation,
            self.inner.browser.clone(),
            self.inner.resolver.clone(),
            self.inner.config.clone(),
        )));
    }

    /// Stop the current scan. Safe to call when nothing is running.
    pub fn stop_scan(&self) {
        let mut scan = self.inner.lock();
        let was_scanning = scan.scanning || scan.task.is_some();
        cancel_scan(&mut scan);
        scan.generation += 1;
        scan.scanning = false;
        if was_scanning {
            debug!("Scan stopped");
            self.inner.publish(&scan);
        }
    }

    /// Run one scan to completion and return what it found.
    pub async fn scan(&self) -> Vec<DiscoveredHost> {
        let mut rx = self.subscribe();
        self.start_scan();
        let _ = rx.wait_for(|s| !s.scanning).await;
        self.hosts()
    }

    pub fn hosts(&self) -> Vec<DiscoveredHost> {
        self.inner.lock().hosts.clone()
    }

    pub fn is_scanning(&self) -> bool {
        self.inner.lock().scanning
    }

    /// Watch the host list and scanning flag.
    pub fn subscribe(&self) -> watch::Receiver<DiscoverySnapshot> {
        self.inner.snapshot.subscribe()
    }
}

fn cancel_scan(scan: &mut ScanState) {
    if let Some(task) = scan.task.take() {
        task.abort();
    }
}

async fn run_scan(
    inner: Weak<DiscoveryInner>,
    generation: u64,
    browser: Arc<dyn ServiceBrowser>,
    resolver: Arc<dyn Resolver>,
    config: DiscoveryConfig,
) {
    // The bound covers starting the browse as well
    let deadline = tokio::time::sleep(config.scan_timeout);
    tokio::pin!(deadline);

    let started = tokio::select! {
        _ = &mut deadline => {
            debug!("Scan time bound reached before browsing started");
            None
        }
        result = browser.browse(&config.service_type) => match result {
            Ok(rx) => Some(rx),
            Err(e) => {
                warn!("Discovery unavailable: {}", e);
                None
            }
        },
    };
    let Some(mut ads) = started else {
        if let Some(inner) = inner.upgrade() {
            inner.finish(generation);
        }
        return;
    };

    let mut resolving: JoinSet<Option<DiscoveredHost>> = JoinSet::new();
    let mut browsing = true;

    loop {
        if !browsing && resolving.is_empty() {
            break;
        }
        tokio::select! {
            _ = &mut deadline => {
                debug!("Scan time bound reached");
                break;
            }
            ad = ads.recv(), if browsing => match ad {
                Some(ad) => {
                    resolving.spawn(resolve_one(resolver.clone(), ad, config.resolve_timeout));
                }
                None => browsing = false,
            },
            Some(joined) = resolving.join_next(), if !resolving.is_empty() => {
                if let (Ok(Some(host)), Some(inner)) = (joined, inner.upgrade()) {
                    inner.record(generation, host);
                }
            }
        }
    }

    // Ends the browse and every in-flight resolution connection
    drop(ads);
    resolving.shutdown().await;

    if let Some(inner) = inner.upgrade() {
        inner.finish(generation);
    }
}

async fn resolve_one(
    resolver: Arc<dyn Resolver>,
    ad: Advertisement,
    limit: Duration,
) -> Option<DiscoveredHost> {
    match tokio::time::timeout(limit, resolver.resolve(&ad)).await {
        Ok(Ok(addr)) => Some(DiscoveredHost::new(
            Endpoint::new(addr.ip().to_string(), addr.port()),
            ad.name,
        )),
        Ok(Err(e)) => {
            debug!("Could not resolve {}: {}", ad.name, e);
            None
        }
        Err(_) => {
            debug!("Resolving {} timed out", ad.name);
            None
        }
    }
}
