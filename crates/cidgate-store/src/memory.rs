//! In-memory content store for development and testing
//!
//! Content is kept whole in a `DashMap` and identified by CIDv1 (raw,
//! sha2-256). The peer table is simulated: any well-formed `/p2p/`
//! multiaddress connects, and peers registered with
//! [`MemoryContentStore::add_reachable_peer`] answer pings.

use crate::cid_utils::{create_cid, empty_dir_sentinel, is_sentinel};
use crate::stream::{with_expected_length, DEFAULT_READ_CHUNK};
use crate::{
    ByteStream, ContentStore, PeerIdentity, PeerNetwork, PinRecord, PingReply, PingStream, Result,
    StoreError, SwarmPeer,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use cid::Cid;
use dashmap::{DashMap, DashSet};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Peer id the memory store reports for itself
pub const MEMORY_NODE_ID: &str = "12D3KooWMemoryStoreLocalNode";

#[derive(Default)]
struct Inner {
    blobs: DashMap<Cid, Bytes>,
    pins: DashSet<Cid>,
    connected: DashMap<String, SwarmPeer>,
    reachable: DashMap<String, Duration>,
    offline: AtomicBool,
    fail_pins: AtomicBool,
    cut_reads: AtomicBool,
}

/// An in-memory content store
#[derive(Clone)]
pub struct MemoryContentStore {
    inner: Arc<Inner>,
}

impl Default for MemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryContentStore {
    /// Create a new store holding only the daemon's sentinel pin
    pub fn new() -> Self {
        let inner = Inner::default();
        inner.pins.insert(empty_dir_sentinel());
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Make every operation fail with [`StoreError::Offline`]
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Make `pin` fail while content operations keep working
    pub fn set_pin_failures(&self, fail: bool) {
        self.inner.fail_pins.store(fail, Ordering::SeqCst);
    }

    /// Make reads break off before their first byte, the way a daemon
    /// losing a block mid-`cat` does
    pub fn set_cut_reads(&self, cut: bool) {
        self.inner.cut_reads.store(cut, Ordering::SeqCst);
    }

    /// Register a peer that answers pings with the given round trip
    pub fn add_reachable_peer(&self, peer_id: impl Into<String>, latency: Duration) {
        self.inner.reachable.insert(peer_id.into(), latency);
    }

    /// Whether content for `cid` is held
    pub fn contains(&self, cid: &Cid) -> bool {
        self.inner.blobs.contains_key(cid)
    }

    /// Whether `cid` is pinned
    pub fn is_pinned(&self, cid: &Cid) -> bool {
        self.inner.pins.contains(cid)
    }

    /// Number of content entries held
    pub fn len(&self) -> usize {
        self.inner.blobs.len()
    }

    /// Check if no content is held
    pub fn is_empty(&self) -> bool {
        self.inner.blobs.is_empty()
    }

    fn ensure_online(&self) -> Result<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Offline);
        }
        Ok(())
    }
}

/// Split `/ip4/1.2.3.4/tcp/4001/p2p/<id>` into its peer id
fn peer_id_of(address: &str) -> Option<&str> {
    if !address.starts_with('/') {
        return None;
    }
    let (_, id) = address.rsplit_once("/p2p/")?;
    let id = id.split('/').next()?;
    (!id.is_empty()).then_some(id)
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn ingest(&self, mut data: ByteStream) -> Result<Cid> {
        self.ensure_online()?;

        let mut buf = BytesMut::new();
        while let Some(chunk) = data.next().await {
            buf.extend_from_slice(&chunk?);
        }

        let content = buf.freeze();
        let cid = create_cid(&content);
        self.inner.blobs.insert(cid, content);
        self.inner.pins.insert(cid);
        Ok(cid)
    }

    async fn cat(&self, cid: &Cid) -> Result<ByteStream> {
        self.ensure_online()?;

        let content = self
            .inner
            .blobs
            .get(cid)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(cid.to_string()))?;

        let announced = Some(content.len() as u64);
        if self.inner.cut_reads.load(Ordering::SeqCst) {
            return Ok(with_expected_length(stream::empty(), announced));
        }

        let pieces: Vec<Result<Bytes>> = (0..content.len())
            .step_by(DEFAULT_READ_CHUNK)
            .map(|start| {
                let end = (start + DEFAULT_READ_CHUNK).min(content.len());
                Ok(content.slice(start..end))
            })
            .collect();
        Ok(with_expected_length(stream::iter(pieces), announced))
    }

    async fn pin(&self, cid: &Cid) -> Result<()> {
        self.ensure_online()?;
        if self.inner.fail_pins.load(Ordering::SeqCst) {
            return Err(StoreError::Api(format!("pin/add failed for {}", cid)));
        }
        self.inner.pins.insert(*cid);
        Ok(())
    }

    async fn unpin(&self, cid: &Cid) -> Result<()> {
        self.ensure_online()?;
        self.inner.pins.remove(cid);
        Ok(())
    }

    async fn list_pins(&self) -> Result<Vec<PinRecord>> {
        self.ensure_online()?;
        let mut pins: Vec<PinRecord> = self
            .inner
            .pins
            .iter()
            .map(|entry| *entry.key())
            .filter(|cid| !is_sentinel(cid))
            .map(PinRecord::recursive)
            .collect();
        pins.sort_by_key(|p| p.cid.to_string());
        Ok(pins)
    }
}

#[async_trait]
impl PeerNetwork for MemoryContentStore {
    async fn connect(&self, address: &str, _timeout: Duration) -> Result<()> {
        self.ensure_online()?;

        let peer_id = peer_id_of(address).ok_or_else(|| StoreError::PeerConnect {
            address: address.to_string(),
            reason: "invalid multiaddr".to_string(),
        })?;

        let latency = self.inner.reachable.get(peer_id).map(|entry| *entry.value());
        self.inner.connected.insert(
            peer_id.to_string(),
            SwarmPeer {
                address: address.to_string(),
                peer_id: peer_id.to_string(),
                latency,
            },
        );
        Ok(())
    }

    async fn peers(&self) -> Result<Vec<SwarmPeer>> {
        self.ensure_online()?;
        let mut peers: Vec<SwarmPeer> = self
            .inner
            .connected
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        Ok(peers)
    }

    async fn identify(&self, peer_id: Option<&str>) -> Result<PeerIdentity> {
        self.ensure_online()?;

        let (id, addresses) = match peer_id {
            None | Some(MEMORY_NODE_ID) => (MEMORY_NODE_ID.to_string(), Vec::new()),
            Some(id) => match self.inner.connected.get(id) {
                Some(peer) => (id.to_string(), vec![peer.address.clone()]),
                None if self.inner.reachable.contains_key(id) => (id.to_string(), Vec::new()),
                None => return Err(StoreError::NotFound(format!("peer {}", id))),
            },
        };

        Ok(PeerIdentity {
            id,
            public_key: String::new(),
            addresses,
            agent_version: concat!("cidgate-memory/", env!("CARGO_PKG_VERSION")).to_string(),
            protocol_version: "ipfs/0.1.0".to_string(),
        })
    }

    async fn ping(&self, peer: &str, count: u32) -> Result<PingStream> {
        self.ensure_online()?;

        let replies: Vec<Result<PingReply>> = match self.inner.reachable.get(peer) {
            Some(entry) => {
                let latency = *entry.value();
                std::iter::once(Ok(PingReply::info(format!("PING {}.", peer))))
                    .chain((0..count).map(|_| Ok(PingReply::pong(latency))))
                    .collect()
            }
            None => vec![Ok(PingReply::failure(format!(
                "peer {} is not reachable",
                peer
            )))],
        };
        Ok(stream::iter(replies).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{collect_bytes, once_stream};

    #[tokio::test]
    async fn test_ingest_and_cat() {
        let store = MemoryContentStore::new();

        let cid = store.ingest(once_stream("Hello, World!")).await.unwrap();
        assert!(store.contains(&cid));
        assert!(store.is_pinned(&cid));

        let data = collect_bytes(store.cat(&cid).await.unwrap()).await.unwrap();
        assert_eq!(data.as_ref(), b"Hello, World!");
    }

    #[tokio::test]
    async fn test_identical_content_same_cid() {
        let store = MemoryContentStore::new();
        let a = store.ingest(once_stream("same bytes")).await.unwrap();
        let b = store.ingest(once_stream("same bytes")).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_cat_large_content_in_pieces() {
        let store = MemoryContentStore::new();
        let payload = vec![7u8; DEFAULT_READ_CHUNK * 2 + 10];
        let cid = store.ingest(once_stream(payload.clone())).await.unwrap();

        let pieces: Vec<_> = store.cat(&cid).await.unwrap().collect().await;
        assert_eq!(pieces.len(), 3);
        let total: usize = pieces.iter().map(|p| p.as_ref().unwrap().len()).sum();
        assert_eq!(total, payload.len());
    }

    #[tokio::test]
    async fn test_cat_not_found() {
        let store = MemoryContentStore::new();
        let missing = create_cid(b"not stored");
        let result = store.cat(&missing).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_fresh_store_lists_no_pins() {
        let store = MemoryContentStore::new();
        assert!(store.is_pinned(&empty_dir_sentinel()));
        assert!(store.list_pins().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pin_unpin_idempotent() {
        let store = MemoryContentStore::new();
        let cid = create_cid(b"pinned elsewhere");

        store.pin(&cid).await.unwrap();
        store.pin(&cid).await.unwrap();
        assert_eq!(store.list_pins().await.unwrap().len(), 1);

        store.unpin(&cid).await.unwrap();
        store.unpin(&cid).await.unwrap();
        assert!(store.list_pins().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cut_read_reports_truncation() {
        let store = MemoryContentStore::new();
        let cid = store.ingest(once_stream("never delivered")).await.unwrap();
        store.set_cut_reads(true);

        let err = collect_bytes(store.cat(&cid).await.unwrap()).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Truncated {
                received: 0,
                expected: 15
            }
        ));
    }

    #[tokio::test]
    async fn test_offline_fails_everything() {
        let store = MemoryContentStore::new();
        store.set_offline(true);

        assert!(matches!(
            store.ingest(once_stream("x")).await,
            Err(StoreError::Offline)
        ));
        assert!(matches!(store.list_pins().await, Err(StoreError::Offline)));
        assert!(matches!(store.peers().await, Err(StoreError::Offline)));
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_address() {
        let store = MemoryContentStore::new();
        let err = store
            .connect("not-a-valid-multiaddr", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PeerConnect { .. }));
        assert!(store.peers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connect_then_list() {
        let store = MemoryContentStore::new();
        store.add_reachable_peer("12D3KooWpeer", Duration::from_millis(12));
        store
            .connect("/ip4/10.0.0.2/tcp/4001/p2p/12D3KooWpeer", Duration::from_secs(1))
            .await
            .unwrap();

        let peers = store.peers().await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].peer_id, "12D3KooWpeer");
        assert_eq!(peers[0].latency, Some(Duration::from_millis(12)));

        let identity = store.identify(Some("12D3KooWpeer")).await.unwrap();
        assert_eq!(identity.addresses, vec!["/ip4/10.0.0.2/tcp/4001/p2p/12D3KooWpeer"]);
    }

    #[tokio::test]
    async fn test_ping_reachable_and_unknown() {
        let store = MemoryContentStore::new();
        store.add_reachable_peer("12D3KooWpeer", Duration::from_millis(5));

        let replies: Vec<_> = store.ping("12D3KooWpeer", 2).await.unwrap().collect().await;
        assert_eq!(replies.len(), 3);
        assert!(replies[1].as_ref().unwrap().is_pong());

        let replies: Vec<_> = store.ping("12D3KooWghost", 2).await.unwrap().collect().await;
        assert_eq!(replies.len(), 1);
        assert!(!replies[0].as_ref().unwrap().success);
    }

    #[test]
    fn test_peer_id_of() {
        assert_eq!(peer_id_of("/ip4/1.2.3.4/tcp/4001/p2p/12D3Koo"), Some("12D3Koo"));
        assert_eq!(peer_id_of("/dnsaddr/bootstrap.libp2p.io/p2p/QmNn"), Some("QmNn"));
        assert_eq!(peer_id_of("/ip4/1.2.3.4/tcp/4001"), None);
        assert_eq!(peer_id_of("not-a-valid-multiaddr"), None);
    }
}
