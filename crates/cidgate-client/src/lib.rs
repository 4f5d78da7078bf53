//! # cidgate Client SDK
//!
//! A client for the cidgate gateway: chunked uploads, CID retrieval,
//! pin management and swarm peers.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cidgate_client::{Config, GatewayClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = GatewayClient::new(Config::new("http://localhost:3000"))?;
//!
//!     // Upload a file in 10 MiB chunks
//!     let result = client.upload_file("./video.mp4", None).await?;
//!     println!("stored as {}", result.cid);
//!
//!     // Read it back
//!     let data = client.retrieve(&result.cid, None).await?;
//!     assert!(!data.is_empty());
//!
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
mod types;

pub use client::GatewayClient;
pub use config::Config;
pub use error::{ClientError, Result};
pub use types::*;
