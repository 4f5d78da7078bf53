//! Application state

use crate::config::GatewayConfig;
use crate::middleware::{create_rate_limiter, KeyedRateLimiter};
use cidgate_core::{PeerDirectory, PinDirectory, RetrievalPipeline, UploadAssembler};
use cidgate_store::{FlexibleStore, MemoryContentStore};
use std::sync::Arc;
use tracing::{info, warn};

/// Application state shared across handlers
pub struct AppState {
    /// Gateway configuration
    pub config: GatewayConfig,
    /// Content store (Kubo or memory fallback)
    pub store: Arc<FlexibleStore>,
    /// Chunked upload sessions
    pub uploads: UploadAssembler<FlexibleStore>,
    /// Read path
    pub retrieval: RetrievalPipeline<FlexibleStore>,
    /// Pin bookkeeping
    pub pins: PinDirectory<FlexibleStore>,
    /// Swarm administration
    pub peers: PeerDirectory<FlexibleStore>,
    /// Per-client request throttle
    pub rate_limiter: Arc<KeyedRateLimiter>,
}

impl AppState {
    /// Create a new application state
    pub async fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let store = if config.use_memory_store {
            info!("Using in-memory content store (data will not persist)");
            FlexibleStore::Memory(MemoryContentStore::new())
        } else {
            FlexibleStore::from_config_or_memory(config.kubo_config()).await
        };

        if store.is_persistent() {
            info!(backend = store.backend_name(), url = %config.kubo_url, "Storage mode: IPFS (persistent)");
        } else {
            warn!(backend = store.backend_name(), "Storage mode: in-memory (NOT persistent - for development only)");
        }

        tokio::fs::create_dir_all(&config.staging_dir).await?;
        Ok(Self::with_store(config, store))
    }

    /// Build the services around an existing store
    pub fn with_store(config: GatewayConfig, store: FlexibleStore) -> Self {
        let store = Arc::new(store);
        Self {
            uploads: UploadAssembler::new(Arc::clone(&store), config.upload_config()),
            retrieval: RetrievalPipeline::new(Arc::clone(&store), config.retrieval_config()),
            pins: PinDirectory::new(Arc::clone(&store)),
            peers: PeerDirectory::new(Arc::clone(&store), config.peer_config()),
            rate_limiter: create_rate_limiter(config.rate_limit_rps),
            store,
            config,
        }
    }
}
