//! Peer directory: swarm connections, identities and latency probes

use crate::{CoreError, Result};
use cidgate_store::{PeerIdentity, PeerNetwork, PingStream, StoreError, SwarmPeer};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Bounds for a latency measurement
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LatencyProbe {
    /// Round trips requested before giving up
    pub max_probes: u32,
    /// Wall clock bound for the whole measurement
    pub timeout: Duration,
}

impl Default for LatencyProbe {
    fn default() -> Self {
        Self {
            max_probes: 5,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Configuration for the peer directory
#[derive(Clone, Debug, Default)]
pub struct PeerConfig {
    pub connect_timeout: Option<Duration>,
    pub probe: LatencyProbe,
}

impl PeerConfig {
    fn connect_timeout(&self) -> Duration {
        self.connect_timeout.unwrap_or(Duration::from_secs(10))
    }
}

/// Swarm administration on top of the daemon's peer network
pub struct PeerDirectory<S: PeerNetwork> {
    network: Arc<S>,
    config: PeerConfig,
}

impl<S: PeerNetwork> PeerDirectory<S> {
    pub fn new(network: Arc<S>, config: PeerConfig) -> Self {
        Self { network, config }
    }

    /// Dial a peer by multiaddress. No retry.
    #[instrument(skip(self))]
    pub async fn connect(&self, address: &str) -> Result<()> {
        let address = required(address, "peerId")?;
        self.network
            .connect(address, self.config.connect_timeout())
            .await
            .map_err(|e| match e {
                StoreError::PeerConnect { address, reason } => {
                    CoreError::ConnectionFailure { address, reason }
                }
                other => CoreError::ConnectionFailure {
                    address: address.to_string(),
                    reason: other.to_string(),
                },
            })?;
        info!(address = %address, "New peer has been added");
        Ok(())
    }

    /// Peers the local node is connected to
    #[instrument(skip(self))]
    pub async fn list_connected_peers(&self) -> Result<Vec<SwarmPeer>> {
        self.network
            .peers()
            .await
            .map_err(|e| CoreError::storage("failed to list swarm peers", e))
    }

    /// Identity of a single peer
    #[instrument(skip(self))]
    pub async fn peer_info(&self, peer_id: &str) -> Result<PeerIdentity> {
        let peer_id = required(peer_id, "peerId")?;
        self.network
            .identify(Some(peer_id))
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => CoreError::PeerNotFound(peer_id.to_string()),
                other => CoreError::storage(format!("failed to identify {}", peer_id), other),
            })
    }

    /// Identity of the local daemon
    #[instrument(skip(self))]
    pub async fn node_identity(&self) -> Result<PeerIdentity> {
        self.network
            .identify(None)
            .await
            .map_err(|e| CoreError::storage("failed to identify local node", e))
    }

    /// Round trip time of the first successful probe to `peer`
    #[instrument(skip(self))]
    pub async fn measure_latency(&self, peer: &str) -> Result<Duration> {
        let peer = required(peer, "peerId")?;
        let probe = self.config.probe;
        let failed = |reason: String| CoreError::ProbeFailed {
            peer: peer.to_string(),
            reason,
        };

        let measurement = tokio::time::timeout(probe.timeout, async {
            let replies = self
                .network
                .ping(peer, probe.max_probes)
                .await
                .map_err(|e| e.to_string())?;
            first_success_wins(replies, probe.max_probes).await
        })
        .await;

        match measurement {
            Ok(Ok(latency)) => {
                debug!(peer = %peer, latency_ms = latency.as_millis() as u64, "Latency measured");
                Ok(latency)
            }
            Ok(Err(reason)) => {
                warn!(peer = %peer, reason = %reason, "Latency probe failed");
                Err(failed(reason))
            }
            Err(_) => {
                warn!(peer = %peer, timeout_secs = probe.timeout.as_secs(), "Latency probe timed out");
                Err(failed(format!("no reply within {}s", probe.timeout.as_secs())))
            }
        }
    }
}

/// Consume ping replies until the first measured round trip.
///
/// Informational replies are skipped. An explicit failure reply or a stream
/// error fails with its reason. The stream is abandoned after `max_probes`
/// replies past the initial lookup line.
pub async fn first_success_wins(
    mut replies: PingStream,
    max_probes: u32,
) -> std::result::Result<Duration, String> {
    let mut skipped = 0u32;
    while let Some(reply) = replies.next().await {
        let reply = reply.map_err(|e| e.to_string())?;
        if !reply.success {
            return Err(if reply.text.is_empty() {
                "probe reported failure".to_string()
            } else {
                reply.text
            });
        }
        if reply.is_pong() {
            return Ok(reply.time);
        }
        skipped += 1;
        if skipped > max_probes {
            break;
        }
    }
    Err(format!("no successful reply in {} probes", max_probes))
}

/// Render a latency as `"42 ms"`
pub fn format_latency(latency: Duration) -> String {
    format!("{} ms", (latency.as_secs_f64() * 1000.0).round() as u64)
}

fn required<'a>(value: &'a str, field: &str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CoreError::InvalidRequest(format!("{} is required", field)));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cidgate_store::{MemoryContentStore, PingReply};
    use futures::stream;

    fn directory(probe: LatencyProbe) -> (PeerDirectory<MemoryContentStore>, Arc<MemoryContentStore>) {
        let store = Arc::new(MemoryContentStore::new());
        let config = PeerConfig {
            connect_timeout: None,
            probe,
        };
        (PeerDirectory::new(Arc::clone(&store), config), store)
    }

    fn replies(items: Vec<PingReply>) -> PingStream {
        stream::iter(items.into_iter().map(Ok)).boxed()
    }

    #[tokio::test]
    async fn test_first_success_skips_info() {
        let latency = first_success_wins(
            replies(vec![
                PingReply::info("PING 12D3KooWpeer."),
                PingReply::pong(Duration::from_millis(42)),
                PingReply::pong(Duration::from_millis(7)),
            ]),
            5,
        )
        .await
        .unwrap();
        assert_eq!(latency, Duration::from_millis(42));
    }

    #[tokio::test]
    async fn test_first_success_explicit_failure() {
        let reason = first_success_wins(
            replies(vec![
                PingReply::info("PING 12D3KooWpeer."),
                PingReply::failure("peer lookup failed"),
            ]),
            5,
        )
        .await
        .unwrap_err();
        assert_eq!(reason, "peer lookup failed");
    }

    #[tokio::test]
    async fn test_first_success_bounded_by_count() {
        let chatter = stream::repeat_with(|| Ok(PingReply::info("waiting"))).boxed();
        let reason = first_success_wins(chatter, 3).await.unwrap_err();
        assert!(reason.contains("3 probes"));
    }

    #[tokio::test]
    async fn test_first_success_empty_stream() {
        assert!(first_success_wins(replies(vec![]), 5).await.is_err());
    }

    #[tokio::test]
    async fn test_measure_latency_reachable_peer() {
        let (peers, store) = directory(LatencyProbe::default());
        store.add_reachable_peer("12D3KooWpeer", Duration::from_millis(42));

        let latency = peers.measure_latency("12D3KooWpeer").await.unwrap();
        assert_eq!(format_latency(latency), "42 ms");
    }

    #[tokio::test]
    async fn test_measure_latency_unreachable_peer() {
        let (peers, _store) = directory(LatencyProbe::default());
        let err = peers.measure_latency("12D3KooWghost").await.unwrap_err();
        assert!(matches!(err, CoreError::ProbeFailed { .. }));
    }

    struct SilentNetwork;

    #[async_trait::async_trait]
    impl PeerNetwork for SilentNetwork {
        async fn connect(&self, _: &str, _: Duration) -> cidgate_store::Result<()> {
            Ok(())
        }

        async fn peers(&self) -> cidgate_store::Result<Vec<SwarmPeer>> {
            Ok(Vec::new())
        }

        async fn identify(&self, _: Option<&str>) -> cidgate_store::Result<PeerIdentity> {
            Err(StoreError::NotFound("peer".into()))
        }

        async fn ping(&self, _: &str, _: u32) -> cidgate_store::Result<PingStream> {
            Ok(stream::pending().boxed())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_measure_latency_bounded_by_timeout() {
        let probe = LatencyProbe {
            max_probes: 5,
            timeout: Duration::from_secs(10),
        };
        let peers = PeerDirectory::new(
            Arc::new(SilentNetwork),
            PeerConfig {
                connect_timeout: None,
                probe,
            },
        );

        let started = tokio::time::Instant::now();
        let err = peers.measure_latency("12D3KooWsilent").await.unwrap_err();
        assert!(matches!(err, CoreError::ProbeFailed { .. }));
        assert!(started.elapsed() <= Duration::from_secs(11));
    }

    #[tokio::test]
    async fn test_peer_info_unknown() {
        let peers = PeerDirectory::new(Arc::new(SilentNetwork), PeerConfig::default());
        assert!(matches!(
            peers.peer_info("12D3KooWnobody").await,
            Err(CoreError::PeerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_invalid_address() {
        let (peers, _store) = directory(LatencyProbe::default());
        let err = peers.connect("not-a-valid-multiaddr").await.unwrap_err();
        assert!(matches!(err, CoreError::ConnectionFailure { .. }));

        let err = peers.connect("  ").await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_connect_then_list_and_identify() {
        let (peers, _store) = directory(LatencyProbe::default());
        peers
            .connect("/ip4/10.0.0.9/tcp/4001/p2p/12D3KooWfriend")
            .await
            .unwrap();

        let listed = peers.list_connected_peers().await.unwrap();
        assert_eq!(listed.len(), 1);

        let info = peers.peer_info("12D3KooWfriend").await.unwrap();
        assert_eq!(info.id, "12D3KooWfriend");
        assert!(!peers.node_identity().await.unwrap().id.is_empty());
    }

    #[test]
    fn test_format_latency() {
        assert_eq!(format_latency(Duration::from_micros(41_600)), "42 ms");
        assert_eq!(format_latency(Duration::ZERO), "0 ms");
    }
}
