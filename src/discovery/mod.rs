//! Network discovery of console engines
//!
//! This module provides:
//! - ServiceBrowser: advertisement source (mDNS in production)
//! - Resolver: live-connection resolution to the reachable address
//! - DiscoveryService: time-bounded, deduplicating scans

pub mod browser;
pub mod resolver;
pub mod service;

pub use browser::{Advertisement, MdnsBrowser, ServiceBrowser};
pub use resolver::{Resolver, TcpResolver};
pub use service::{DiscoveryConfig, DiscoveryService, DiscoverySnapshot, SERVICE_TYPE};
