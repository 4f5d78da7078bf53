//! Store selection at startup

use crate::{
    ByteStream, ContentStore, KuboClient, KuboConfig, MemoryContentStore, PeerIdentity,
    PeerNetwork, PinRecord, PingStream, Result, SwarmPeer,
};
use async_trait::async_trait;
use cid::Cid;
use std::time::Duration;
use tracing::{info, warn};

/// Either the Kubo daemon or the in-memory fallback
#[derive(Clone)]
pub enum FlexibleStore {
    /// Kubo RPC daemon
    Kubo(KuboClient),
    /// In-memory storage (fallback)
    Memory(MemoryContentStore),
}

impl FlexibleStore {
    /// Connect to Kubo, falling back to memory if the daemon is unavailable
    pub async fn from_config_or_memory(config: KuboConfig) -> Self {
        let url = config.api_url.clone();
        match KuboClient::new(config).await {
            Ok(client) => {
                info!(url = %url, "Using Kubo content store");
                Self::Kubo(client)
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to connect to IPFS, using in-memory storage");
                Self::Memory(MemoryContentStore::new())
            }
        }
    }

    /// Check if using the real daemon or the memory fallback
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Kubo(_))
    }

    /// Short label for startup logs
    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Kubo(_) => "kubo",
            Self::Memory(_) => "memory",
        }
    }
}

#[async_trait]
impl ContentStore for FlexibleStore {
    async fn ingest(&self, data: ByteStream) -> Result<Cid> {
        match self {
            Self::Kubo(store) => store.ingest(data).await,
            Self::Memory(store) => store.ingest(data).await,
        }
    }

    async fn cat(&self, cid: &Cid) -> Result<ByteStream> {
        match self {
            Self::Kubo(store) => store.cat(cid).await,
            Self::Memory(store) => store.cat(cid).await,
        }
    }

    async fn pin(&self, cid: &Cid) -> Result<()> {
        match self {
            Self::Kubo(store) => store.pin(cid).await,
            Self::Memory(store) => store.pin(cid).await,
        }
    }

    async fn unpin(&self, cid: &Cid) -> Result<()> {
        match self {
            Self::Kubo(store) => store.unpin(cid).await,
            Self::Memory(store) => store.unpin(cid).await,
        }
    }

    async fn list_pins(&self) -> Result<Vec<PinRecord>> {
        match self {
            Self::Kubo(store) => store.list_pins().await,
            Self::Memory(store) => store.list_pins().await,
        }
    }
}

#[async_trait]
impl PeerNetwork for FlexibleStore {
    async fn connect(&self, address: &str, timeout: Duration) -> Result<()> {
        match self {
            Self::Kubo(store) => store.connect(address, timeout).await,
            Self::Memory(store) => store.connect(address, timeout).await,
        }
    }

    async fn peers(&self) -> Result<Vec<SwarmPeer>> {
        match self {
            Self::Kubo(store) => store.peers().await,
            Self::Memory(store) => store.peers().await,
        }
    }

    async fn identify(&self, peer_id: Option<&str>) -> Result<PeerIdentity> {
        match self {
            Self::Kubo(store) => store.identify(peer_id).await,
            Self::Memory(store) => store.identify(peer_id).await,
        }
    }

    async fn ping(&self, peer: &str, count: u32) -> Result<PingStream> {
        match self {
            Self::Kubo(store) => store.ping(peer, count).await,
            Self::Memory(store) => store.ping(peer, count).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_falls_back_to_memory_when_daemon_missing() {
        // Port 9 (discard) is not an RPC endpoint.
        let config = KuboConfig::with_url("http://127.0.0.1:9").with_timeout(Duration::from_secs(1));
        let store = FlexibleStore::from_config_or_memory(config).await;
        assert!(!store.is_persistent());
        assert_eq!(store.backend_name(), "memory");
    }
}
