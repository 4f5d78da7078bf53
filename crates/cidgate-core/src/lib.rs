//! # cidgate core
//!
//! Gateway services layered on the content store.
//!
//! This crate provides:
//! - **Upload Assembler**: sequences indexed chunks into one staged file per
//!   upload session and ingests it on the final chunk
//! - **Retrieval Pipeline**: best-effort peer dial and pin, then a
//!   stall-guarded content stream with an observable end state
//! - **Pin Directory**: user-visible pins, never the daemon's sentinel
//! - **Peer Directory**: swarm connect, peer listing, identity and latency
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            HTTP gateway (cli)           │
//! ├──────────┬───────────┬──────┬───────────┤
//! │  Upload  │ Retrieval │ Pins │   Peers   │
//! ├──────────┴───────────┴──────┴───────────┤
//! │   ContentStore    │    PeerNetwork      │
//! └─────────────────────────────────────────┘
//! ```

pub mod error;
pub mod peers;
pub mod pins;
pub mod retrieval;
pub mod upload;

pub use error::{CoreError, Result};
pub use peers::{first_success_wins, format_latency, LatencyProbe, PeerConfig, PeerDirectory};
pub use pins::PinDirectory;
pub use retrieval::{
    Retrieval, RetrievalConfig, RetrievalPipeline, RetrievalReport, RetrievalState, StepOutcome,
};
pub use upload::{
    ChunkOutcome, ChunkRequest, SessionStatus, SessionSummary, UploadAssembler, UploadConfig,
};
