//! Content retrieval by CID
//!
//! ```text
//! Requested → CidParsed → [PeerConnectAttempted] → [Pinned] → Streaming → Completed
//!                                                                       ↘ StreamError
//! ```
//!
//! Connecting to the hinted peer and pinning are best effort: failures are
//! logged and recorded in the [`RetrievalReport`] but never abort the read.
//! Opening the read is bounded by `open_timeout`; once bytes flow, a stall
//! guard ends transfers that go silent for `stall_timeout`.

use crate::{CoreError, Result};
use bytes::Bytes;
use cid::Cid;
use cidgate_store::stream::with_stall_timeout;
use cidgate_store::{parse_cid, ByteStream, ContentStore, PeerNetwork, StoreError};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Log a progress line every this many bytes
const PROGRESS_INTERVAL: u64 = 8 * 1024 * 1024;

/// Deadlines for the read path
#[derive(Clone, Debug)]
pub struct RetrievalConfig {
    /// Bound on dialing the hinted peer
    pub peer_connect_timeout: Duration,
    /// Bound on opening the read
    pub open_timeout: Duration,
    /// Longest silence tolerated once streaming
    pub stall_timeout: Duration,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            peer_connect_timeout: Duration::from_secs(10),
            open_timeout: Duration::from_secs(30),
            stall_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of a best-effort step
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Skipped,
    Succeeded,
    Failed(String),
}

impl StepOutcome {
    /// Short label suitable for a response header
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// What happened to the best-effort steps of one fetch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetrievalReport {
    pub peer_connect: StepOutcome,
    pub pin: StepOutcome,
}

/// Progress of one fetch
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetrievalState {
    Requested,
    CidParsed,
    PeerConnectAttempted,
    Pinned,
    Streaming { bytes: u64 },
    Completed { bytes: u64 },
    StreamError { bytes: u64, reason: String },
}

impl RetrievalState {
    /// Whether the fetch reached an end state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::StreamError { .. })
    }
}

/// An opened read
pub struct Retrieval {
    pub cid: Cid,
    pub report: RetrievalReport,
    /// Content bytes. A mid-transfer failure is yielded as an `Err` item.
    pub stream: ByteStream,
    /// Follows the transfer to its end state
    pub state: watch::Receiver<RetrievalState>,
}

impl std::fmt::Debug for Retrieval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retrieval")
            .field("cid", &self.cid)
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

/// Opens reads against the content store
pub struct RetrievalPipeline<S> {
    store: Arc<S>,
    config: RetrievalConfig,
}

impl<S> RetrievalPipeline<S>
where
    S: ContentStore + PeerNetwork,
{
    pub fn new(store: Arc<S>, config: RetrievalConfig) -> Self {
        Self { store, config }
    }

    /// The configuration in use
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Open a read of `cid`, optionally dialing `peer_hint` first
    #[instrument(skip(self))]
    pub async fn fetch(&self, cid: &str, peer_hint: Option<&str>) -> Result<Retrieval> {
        let (state, receiver) = watch::channel(RetrievalState::Requested);

        let cid = parse_cid(cid).map_err(|e| CoreError::InvalidCid(e.to_string()))?;
        state.send_replace(RetrievalState::CidParsed);

        let peer_connect = match peer_hint.map(str::trim).filter(|h| !h.is_empty()) {
            None => StepOutcome::Skipped,
            Some(address) => {
                let outcome = match self
                    .store
                    .connect(address, self.config.peer_connect_timeout)
                    .await
                {
                    Ok(()) => {
                        debug!(address = %address, "Connected to hinted peer");
                        StepOutcome::Succeeded
                    }
                    Err(e) => {
                        warn!(address = %address, error = %e, "Failed to connect to hinted peer, continuing");
                        StepOutcome::Failed(e.to_string())
                    }
                };
                state.send_replace(RetrievalState::PeerConnectAttempted);
                outcome
            }
        };

        let pin = match self.store.pin(&cid).await {
            Ok(()) => {
                state.send_replace(RetrievalState::Pinned);
                StepOutcome::Succeeded
            }
            Err(e) => {
                warn!(cid = %cid, error = %e, "Failed to pin CID, continuing");
                StepOutcome::Failed(e.to_string())
            }
        };

        let opened = tokio::time::timeout(self.config.open_timeout, self.store.cat(&cid)).await;
        let inner = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(self.open_failed(&state, &cid, e)),
            Err(_) => {
                let e = StoreError::timeout(self.config.open_timeout);
                return Err(self.open_failed(&state, &cid, e));
            }
        };

        state.send_replace(RetrievalState::Streaming { bytes: 0 });
        info!(cid = %cid, "Streaming content");

        let guarded = with_stall_timeout(inner, self.config.stall_timeout);
        let stream = TrackedStream {
            inner: guarded,
            state,
            cid: cid.to_string(),
            bytes: 0,
            next_progress: PROGRESS_INTERVAL,
            finished: false,
        };

        Ok(Retrieval {
            cid,
            report: RetrievalReport { peer_connect, pin },
            stream: Box::pin(stream),
            state: receiver,
        })
    }

    fn open_failed(
        &self,
        state: &watch::Sender<RetrievalState>,
        cid: &Cid,
        source: StoreError,
    ) -> CoreError {
        warn!(cid = %cid, error = %source, "Failed to open content stream");
        state.send_replace(RetrievalState::StreamError {
            bytes: 0,
            reason: source.to_string(),
        });
        CoreError::RetrievalFailure {
            cid: cid.to_string(),
            source,
        }
    }
}

/// Counts bytes and publishes the end state of a transfer
struct TrackedStream {
    inner: ByteStream,
    state: watch::Sender<RetrievalState>,
    cid: String,
    bytes: u64,
    next_progress: u64,
    finished: bool,
}

impl TrackedStream {
    fn finish(&mut self, end: RetrievalState) {
        self.finished = true;
        self.state.send_replace(end);
    }
}

impl Stream for TrackedStream {
    type Item = cidgate_store::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.bytes += chunk.len() as u64;
                if this.bytes >= this.next_progress {
                    debug!(cid = %this.cid, bytes = this.bytes, "Retrieval progress");
                    this.next_progress += PROGRESS_INTERVAL;
                }
                let bytes = this.bytes;
                this.state.send_modify(|s| *s = RetrievalState::Streaming { bytes });
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                warn!(cid = %this.cid, bytes = this.bytes, error = %e, "Content stream failed");
                let bytes = this.bytes;
                this.finish(RetrievalState::StreamError {
                    bytes,
                    reason: e.to_string(),
                });
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                info!(cid = %this.cid, bytes = this.bytes, "Content stream ended");
                let bytes = this.bytes;
                this.finish(RetrievalState::Completed { bytes });
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        if !self.finished {
            debug!(cid = %self.cid, bytes = self.bytes, "Content stream dropped before the end");
            let bytes = self.bytes;
            self.state.send_replace(RetrievalState::StreamError {
                bytes,
                reason: "transfer abandoned by the consumer".to_string(),
            });
        }
    }
}
