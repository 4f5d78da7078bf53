//! CID (Content Identifier) utilities
//!
//! Parsing of caller-supplied identifiers, the daemon's auto-pinned empty
//! directory, and CID derivation for the in-memory store.

use crate::{Result, StoreError};
use cid::Cid;
use multihash_codetable::{Code, MultihashDigest};
use std::sync::LazyLock;

/// Multicodec for raw binary leaves
pub const RAW_CODEC: u64 = 0x55;

/// Multicodec for DAG-PB (UnixFS) nodes
pub const DAG_PB_CODEC: u64 = 0x70;

/// The empty UnixFS directory that Kubo pins on repo init.
///
/// It is an artifact of the daemon, not user content, and is hidden from
/// every pin listing.
pub const EMPTY_DIR_SENTINEL: &str = "QmUNLLsPACCz1vLxQVkXqqLX5R1X345qqfHbsf67hvA3Nn";

static SENTINEL: LazyLock<Cid> =
    LazyLock::new(|| Cid::try_from(EMPTY_DIR_SENTINEL).expect("valid sentinel CID"));

/// Parse a caller-supplied CID string.
///
/// Surrounding whitespace and an optional `/ipfs/` prefix are accepted.
pub fn parse_cid(input: &str) -> Result<Cid> {
    let trimmed = input.trim();
    let trimmed = trimmed.strip_prefix("/ipfs/").unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Err(StoreError::InvalidCid("empty identifier".to_string()));
    }
    Cid::try_from(trimmed).map_err(|e| StoreError::InvalidCid(format!("{}: {}", trimmed, e)))
}

/// The sentinel as a parsed CID
pub fn empty_dir_sentinel() -> Cid {
    *SENTINEL
}

/// Whether `cid` names the empty-directory sentinel, in v0 or v1 form
pub fn is_sentinel(cid: &Cid) -> bool {
    cid.codec() == DAG_PB_CODEC && cid.hash() == SENTINEL.hash()
}

/// Derive a CIDv1 (raw, sha2-256) for a byte payload
pub fn create_cid(data: &[u8]) -> Cid {
    let multihash = Code::Sha2_256.digest(data);
    Cid::new_v1(RAW_CODEC, multihash)
}
