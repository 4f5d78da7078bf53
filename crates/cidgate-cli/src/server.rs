//! Server startup and lifecycle

use crate::{routes, AppState, GatewayConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Run the gateway server
pub async fn run_server(config: GatewayConfig) -> anyhow::Result<()> {
    run_server_with_shutdown(config, std::future::pending()).await
}

/// Run server with graceful shutdown
pub async fn run_server_with_shutdown(
    config: GatewayConfig,
    shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(config.clone()).await?);
    let cleanup = spawn_session_cleanup(
        Arc::clone(&state),
        Duration::from_secs(config.cleanup_interval_secs.max(1)),
    );
    let app = routes::create_router(state);

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr).await?;

    info!(addr = %addr, "cidgate gateway listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    cleanup.abort();
    info!("Gateway shutdown complete");

    Ok(())
}

/// Periodically drop upload sessions past their expiry and idle rate limiter keys
pub fn spawn_session_cleanup(state: Arc<AppState>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = state.uploads.cleanup_expired().await;
            state.rate_limiter.retain_recent();
            state.rate_limiter.shrink_to_fit();
            debug!(
                removed,
                limiter_keys = state.rate_limiter.len(),
                "Upload session sweep finished"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cidgate_store::{FlexibleStore, MemoryContentStore};
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn test_sweep_prunes_idle_limiter_keys() {
        let dir = tempfile::tempdir().unwrap();
        let config = GatewayConfig {
            staging_dir: dir.path().to_path_buf(),
            rate_limit_rps: 1000,
            ..Default::default()
        };
        let state = Arc::new(AppState::with_store(
            config,
            FlexibleStore::Memory(MemoryContentStore::new()),
        ));
        for last in 1..=5u8 {
            let key = IpAddr::V4(Ipv4Addr::new(192, 0, 2, last));
            assert!(state.rate_limiter.check_key(&key).is_ok());
        }
        assert_eq!(state.rate_limiter.len(), 5);

        let sweep = spawn_session_cleanup(Arc::clone(&state), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        sweep.abort();

        assert!(state.rate_limiter.is_empty());
    }
}
