//! Pin directory
//!
//! A view over the content store's recursive pins. The daemon's
//! auto-created empty-directory pin is never reported and cannot be changed
//! through this directory.

use crate::{CoreError, Result};
use cid::Cid;
use cidgate_store::{is_sentinel, parse_cid, ContentStore, PinRecord};
use std::sync::Arc;
use tracing::{info, instrument};

/// Pin bookkeeping over a content store
pub struct PinDirectory<S: ContentStore> {
    store: Arc<S>,
}

impl<S: ContentStore> PinDirectory<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// CIDs of user-pinned content
    #[instrument(skip(self))]
    pub async fn list_pinned_files(&self) -> Result<Vec<Cid>> {
        Ok(self.list_pins().await?.into_iter().map(|p| p.cid).collect())
    }

    /// User pins with their pin types
    #[instrument(skip(self))]
    pub async fn list_pins(&self) -> Result<Vec<PinRecord>> {
        let pins = self
            .store
            .list_pins()
            .await
            .map_err(|e| CoreError::storage("failed to list pins", e))?;
        Ok(pins.into_iter().filter(|p| !is_sentinel(&p.cid)).collect())
    }

    /// Pin a CID given as a string
    #[instrument(skip(self))]
    pub async fn pin(&self, cid: &str) -> Result<Cid> {
        let cid = parse_user_cid(cid)?;
        self.store
            .pin(&cid)
            .await
            .map_err(|e| CoreError::storage(format!("failed to pin {}", cid), e))?;
        info!(cid = %cid, "CID pinned");
        Ok(cid)
    }

    /// Unpin a CID given as a string
    #[instrument(skip(self))]
    pub async fn unpin(&self, cid: &str) -> Result<Cid> {
        let cid = parse_user_cid(cid)?;
        self.store
            .unpin(&cid)
            .await
            .map_err(|e| CoreError::storage(format!("failed to unpin {}", cid), e))?;
        info!(cid = %cid, "CID unpinned");
        Ok(cid)
    }
}

fn parse_user_cid(input: &str) -> Result<Cid> {
    let cid = parse_cid(input).map_err(|e| CoreError::InvalidCid(e.to_string()))?;
    if is_sentinel(&cid) {
        return Err(CoreError::InvalidRequest(
            "the empty directory pin is managed by the daemon".to_string(),
        ));
    }
    Ok(cid)
}
