//! Resolution of advertisements to the address actually reachable.

use std::net::SocketAddr;

use async_trait::async_trait;

use super::browser::Advertisement;
use crate::error::{MonitorError, Result};

/// Turns an advertisement into a concrete remote address.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, advertisement: &Advertisement) -> Result<SocketAddr>;
}

/// Resolves by opening a short-lived TCP connection and reading back the
/// peer address the OS picked.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpResolver;

#[async_trait]
impl Resolver for TcpResolver {
    async fn resolve(&self, advertisement: &Advertisement) -> Result<SocketAddr> {
        if advertisement.addrs.is_empty() {
            return Err(MonitorError::Discovery(format!(
                "{} advertised no addresses",
                advertisement.name
            )));
        }

        let stream = tokio::net::TcpStream::connect(&advertisement.addrs[..])
            .await
            .map_err(|e| MonitorError::Discovery(format!("Failed to reach {}: {}", advertisement.name, e)))?;
        let peer = stream.peer_addr()?;
        Ok(SocketAddr::new(peer.ip().to_canonical(), peer.port()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_resolver_reads_peer_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let ad = Advertisement::new("Local", vec![addr]);

        let resolved = TcpResolver.resolve(&ad).await.unwrap();
        assert_eq!(resolved, addr);
    }

    #[tokio::test]
    async fn test_tcp_resolver_without_addresses() {
        let ad = Advertisement::new("Empty", vec![]);
        let err = TcpResolver.resolve(&ad).await.unwrap_err();
        assert!(matches!(err, MonitorError::Discovery(_)));
    }

    #[tokio::test]
    async fn test_tcp_resolver_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let ad = Advertisement::new("Gone", vec![addr]);
        assert!(TcpResolver.resolve(&ad).await.is_err());
    }
}
