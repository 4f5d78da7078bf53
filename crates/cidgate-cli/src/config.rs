//! Gateway configuration

use cidgate_core::{LatencyProbe, PeerConfig, RetrievalConfig, UploadConfig};
use cidgate_store::stream::DEFAULT_READ_CHUNK;
use cidgate_store::KuboConfig;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Gateway server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Kubo RPC API URL
    pub kubo_url: String,
    /// Directory for in-flight upload staging files
    pub staging_dir: PathBuf,
    /// Use in-memory storage (for testing/development)
    pub use_memory_store: bool,
    /// Rate limit (requests per second per client)
    pub rate_limit_rps: u32,
    /// Proxies whose `x-forwarded-for` names the client to rate limit
    pub trusted_proxies: Vec<IpAddr>,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    /// Upload sessions older than this are dropped (seconds)
    pub upload_expiry_secs: u64,
    /// How often expired sessions are swept (seconds)
    pub cleanup_interval_secs: u64,
    /// CORS allowed origins ("*" allows any)
    pub cors_origins: Vec<String>,
    /// Deadline for Kubo control calls (seconds)
    pub kubo_timeout_secs: u64,
    /// Deadline for dialing a peer (seconds)
    pub peer_connect_timeout_secs: u64,
    /// Deadline for opening a content read (seconds)
    pub retrieval_timeout_secs: u64,
    /// Longest silence tolerated on a content stream (seconds)
    pub stall_timeout_secs: u64,
    /// Ping replies requested per latency measurement
    pub latency_probes: u32,
    /// Wall clock bound on a latency measurement (seconds)
    pub latency_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            kubo_url: "http://localhost:5001".to_string(),
            staging_dir: PathBuf::from("uploads"),
            use_memory_store: false,
            rate_limit_rps: 100,
            trusted_proxies: Vec::new(),
            max_body_size: 64 * 1024 * 1024, // 64 MB, room for a 10 MB chunk plus form overhead
            upload_expiry_secs: 24 * 60 * 60, // 24 hours
            cleanup_interval_secs: 5 * 60,
            cors_origins: vec!["http://localhost:3000".to_string()],
            kubo_timeout_secs: 30,
            peer_connect_timeout_secs: 10,
            retrieval_timeout_secs: 30,
            stall_timeout_secs: 30,
            latency_probes: 5,
            latency_timeout_secs: 10,
        }
    }
}

impl GatewayConfig {
    /// Get the bind address
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn kubo_config(&self) -> KuboConfig {
        KuboConfig::with_url(&self.kubo_url).with_timeout(Duration::from_secs(self.kubo_timeout_secs))
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            staging_dir: self.staging_dir.clone(),
            session_expiry: Duration::from_secs(self.upload_expiry_secs),
            read_chunk: DEFAULT_READ_CHUNK,
        }
    }

    pub fn retrieval_config(&self) -> RetrievalConfig {
        RetrievalConfig {
            peer_connect_timeout: Duration::from_secs(self.peer_connect_timeout_secs),
            open_timeout: Duration::from_secs(self.retrieval_timeout_secs),
            stall_timeout: Duration::from_secs(self.stall_timeout_secs),
        }
    }

    pub fn peer_config(&self) -> PeerConfig {
        PeerConfig {
            connect_timeout: Some(Duration::from_secs(self.peer_connect_timeout_secs)),
            probe: LatencyProbe {
                max_probes: self.latency_probes.max(1),
                timeout: Duration::from_secs(self.latency_timeout_secs),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_frontend_expectations() {
        let config = GatewayConfig::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
        assert_eq!(config.cors_origins, vec!["http://localhost:3000"]);
        assert_eq!(config.kubo_config().api_url, "http://localhost:5001");
    }

    #[test]
    fn test_derived_service_configs() {
        let config = GatewayConfig {
            latency_probes: 0,
            stall_timeout_secs: 7,
            ..Default::default()
        };
        assert_eq!(config.peer_config().probe.max_probes, 1);
        assert_eq!(config.retrieval_config().stall_timeout, Duration::from_secs(7));
        assert_eq!(config.upload_config().staging_dir, PathBuf::from("uploads"));
    }
}
