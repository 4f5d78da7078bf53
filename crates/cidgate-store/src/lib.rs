//! # cidgate store
//!
//! Content store client for the cidgate gateway.
//!
//! This crate provides:
//! - **Ingest and fetch**: stream bytes into the daemon and back out by CID
//! - **Pinning**: idempotent pin/unpin and recursive pin listing
//! - **Swarm**: connect to peers, list connections, identify nodes, ping
//! - **Memory store**: an in-process stand-in for development and tests
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        cidgate-core services            │
//! ├─────────────────────────────────────────┤
//! │   ContentStore   │    PeerNetwork       │
//! ├──────────────────┴──────────────────────┤
//! │             FlexibleStore               │
//! ├─────────────────────┬───────────────────┤
//! │     KuboClient      │ MemoryContentStore│
//! ├─────────────────────┴───────────────────┤
//! │        Kubo HTTP RPC (/api/v0)          │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use cidgate_store::{ContentStore, KuboClient, KuboConfig, stream::once_stream};
//!
//! let store = KuboClient::new(KuboConfig::with_url("http://localhost:5001")).await?;
//! let cid = store.ingest(once_stream("hello")).await?;
//! let bytes = store.cat(&cid).await?;
//! ```

pub mod cid_utils;
pub mod error;
pub mod flexible;
pub mod kubo;
pub mod memory;
pub mod stream;
pub mod types;

pub use cid_utils::{empty_dir_sentinel, is_sentinel, parse_cid, EMPTY_DIR_SENTINEL};
pub use error::{Result, StoreError};
pub use flexible::FlexibleStore;
pub use kubo::{KuboClient, KuboConfig};
pub use memory::MemoryContentStore;
pub use stream::ByteStream;
pub use types::{PeerIdentity, PinRecord, PinType, PingReply, PingStream, SwarmPeer};

use async_trait::async_trait;
use cid::Cid;
use std::time::Duration;

/// Content-addressed storage backed by an IPFS-family daemon
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Consume `data` to completion, pin the result, and return its CID
    async fn ingest(&self, data: ByteStream) -> Result<Cid>;

    /// Open a streaming read of the content behind `cid`
    async fn cat(&self, cid: &Cid) -> Result<ByteStream>;

    /// Pin a CID. Pinning an already-pinned CID succeeds.
    async fn pin(&self, cid: &Cid) -> Result<()>;

    /// Unpin a CID. Unpinning a CID that is not pinned succeeds.
    async fn unpin(&self, cid: &Cid) -> Result<()>;

    /// List recursive pins, never including the empty-directory sentinel
    async fn list_pins(&self) -> Result<Vec<PinRecord>>;
}

/// The daemon's view of the peer-to-peer network
#[async_trait]
pub trait PeerNetwork: Send + Sync {
    /// Dial a peer by multiaddress, giving up after `timeout`
    async fn connect(&self, address: &str, timeout: Duration) -> Result<()>;

    /// Peers currently connected to the local node
    async fn peers(&self) -> Result<Vec<SwarmPeer>>;

    /// Identity of `peer_id`, or of the local node when `None`
    async fn identify(&self, peer_id: Option<&str>) -> Result<PeerIdentity>;

    /// Start a ping exchange of at most `count` probes
    async fn ping(&self, peer: &str, count: u32) -> Result<PingStream>;
}
