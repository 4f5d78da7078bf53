//! # cidgate gateway
//!
//! HTTP front end for chunked uploads, CID retrieval, pins and peers.
//!
//! This crate provides:
//! - **Storage API**: `/storage/*` chunk upload, retrieval and pin routes
//! - **Peer API**: `/peers/*` swarm connect, listing and latency
//! - **Rate Limiting**: per-client request throttling
//! - **Error mapping**: JSON error bodies carrying the request id
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   HTTP Clients                      │
//! │        (browser frontend, cidgate-client, curl)     │
//! └─────────────────────────┬───────────────────────────┘
//!                           │
//! ┌─────────────────────────▼───────────────────────────┐
//! │                  cidgate gateway                    │
//! ├─────────────────────────────────────────────────────┤
//! │  Request ID  │  Rate Limiter  │  CORS  │  Tracing   │
//! ├─────────────────────────────────────────────────────┤
//! │              storage / peers handlers               │
//! ├─────────────────────────────────────────────────────┤
//! │                   cidgate-core                      │
//! │      (uploads, retrieval, pins, peers)              │
//! ├─────────────────────────────────────────────────────┤
//! │                  cidgate-store                      │
//! │              (Kubo RPC, memory)                     │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use config::GatewayConfig;
pub use error::{ApiError, ErrorCode};
pub use server::{run_server, run_server_with_shutdown};
pub use state::AppState;
