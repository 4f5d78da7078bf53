//! Client configuration

use std::time::Duration;

/// Default chunk size for uploads (10 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024 * 1024;

/// Client configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Gateway endpoint URL
    pub endpoint: String,
    /// Deadline for buffered requests. Streamed downloads instead fail when
    /// no data arrives for this long.
    pub timeout: Duration,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// User agent string
    pub user_agent: String,
    /// Bytes sent per upload chunk
    pub chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3000".to_string(),
            timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("cidgate-client/{}", env!("CARGO_PKG_VERSION")),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Config {
    /// Create a new config with the given endpoint
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the upload chunk size; zero is raised to one byte
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Build the base URL for API requests
    pub fn base_url(&self) -> &str {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.base_url(), "http://localhost:3000");
        assert_eq!(config.chunk_size, 10 * 1024 * 1024);
    }

    #[test]
    fn test_builder() {
        let config = Config::new("http://gateway:8080/")
            .with_timeout(Duration::from_secs(5))
            .with_chunk_size(0);
        assert_eq!(config.base_url(), "http://gateway:8080");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.chunk_size, 1);
    }
}
