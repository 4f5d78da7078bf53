//! Byte stream plumbing shared by the store implementations
//!
//! - [`file_stream`] reads a staged file in bounded pieces
//! - [`StallGuard`] ends a live stream that stops producing data
//! - [`LengthCheck`] turns an early end of a sized stream into an error
//! - [`ndjson_stream`] decodes the daemon's newline-delimited JSON replies

use crate::{Result, StoreError};
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use pin_project_lite::pin_project;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::time::{Instant, Sleep};

/// A live, backpressured byte stream
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Read size used when streaming files from disk (256 KB)
pub const DEFAULT_READ_CHUNK: usize = 256 * 1024;

/// Stream a file from its current position to EOF, `chunk_size` bytes at a time.
pub fn file_stream(file: tokio::fs::File, chunk_size: usize) -> ByteStream {
    let chunk_size = chunk_size.max(1);
    stream::try_unfold(file, move |mut file| async move {
        let mut buf = BytesMut::with_capacity(chunk_size);
        let read = file.read_buf(&mut buf).await;
        let next: Result<Option<(Bytes, tokio::fs::File)>> = match read {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some((buf.freeze(), file))),
            Err(e) => Err(StoreError::Io(e)),
        };
        next
    })
    .boxed()
}

/// Wrap an in-memory payload as a single-item stream
pub fn once_stream(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    stream::once(async move { Ok(data) }).boxed()
}

/// Drain a stream into one buffer.
///
/// Only meant for small payloads and tests.
pub async fn collect_bytes<S>(mut stream: S) -> Result<Bytes>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let mut out = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out.freeze())
}

pin_project! {
    /// Ends a stream with [`StoreError::Stalled`] when no item arrives within `window`.
    ///
    /// The window restarts after every item, so slow-but-steady transfers are
    /// never cut off.
    pub struct StallGuard<S> {
        #[pin]
        inner: S,
        #[pin]
        sleep: Sleep,
        window: Duration,
        done: bool,
    }
}

impl<S> StallGuard<S> {
    /// Guard `inner` with a stall window
    pub fn new(inner: S, window: Duration) -> Self {
        Self {
            inner,
            sleep: tokio::time::sleep(window),
            window,
            done: false,
        }
    }
}

impl<S> Stream for StallGuard<S>
where
    S: Stream<Item = Result<Bytes>>,
{
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(item)) => {
                let deadline = Instant::now() + *this.window;
                this.sleep.as_mut().reset(deadline);
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                *this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => match this.sleep.poll(cx) {
                Poll::Ready(()) => {
                    *this.done = true;
                    Poll::Ready(Some(Err(StoreError::Stalled {
                        seconds: this.window.as_secs(),
                    })))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

/// Box a stream behind a stall guard
pub fn with_stall_timeout<S>(inner: S, window: Duration) -> ByteStream
where
    S: Stream<Item = Result<Bytes>> + Send + 'static,
{
    StallGuard::new(inner, window).boxed()
}

pin_project! {
    /// Fails a stream with [`StoreError::Truncated`] when it ends before
    /// `expected` bytes went through.
    pub struct LengthCheck<S> {
        #[pin]
        inner: S,
        expected: u64,
        received: u64,
        done: bool,
    }
}

impl<S> LengthCheck<S> {
    pub fn new(inner: S, expected: u64) -> Self {
        Self {
            inner,
            expected,
            received: 0,
            done: false,
        }
    }
}

impl<S> Stream for LengthCheck<S>
where
    S: Stream<Item = Result<Bytes>>,
{
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                *this.received += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                *this.done = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                *this.done = true;
                if *this.received < *this.expected {
                    return Poll::Ready(Some(Err(StoreError::Truncated {
                        received: *this.received,
                        expected: *this.expected,
                    })));
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Box a stream that must carry `expected` bytes when the length is known
pub fn with_expected_length<S>(inner: S, expected: Option<u64>) -> ByteStream
where
    S: Stream<Item = Result<Bytes>> + Send + 'static,
{
    match expected {
        Some(expected) => LengthCheck::new(inner, expected).boxed(),
        None => inner.boxed(),
    }
}

struct NdjsonState<S> {
    body: S,
    buf: BytesMut,
    eof: bool,
    failed: bool,
}

/// Decode a newline-delimited JSON body into typed records.
///
/// A trailing record without a final newline is still decoded. The first
/// transport or decode error is yielded and ends the stream.
pub fn ndjson_stream<T, S>(body: S) -> BoxStream<'static, Result<T>>
where
    T: DeserializeOwned + Send + 'static,
    S: Stream<Item = Result<Bytes>> + Send + Unpin + 'static,
{
    let state = NdjsonState {
        body,
        buf: BytesMut::new(),
        eof: false,
        failed: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.failed {
            return None;
        }
        loop {
            if let Some(pos) = state.buf.iter().position(|b| *b == b'\n') {
                let line = state.buf.split_to(pos + 1);
                let line = trim_ascii(&line[..pos]);
                if line.is_empty() {
                    continue;
                }
                let record = serde_json::from_slice::<T>(line).map_err(StoreError::from);
                state.failed = record.is_err();
                return Some((record, state));
            }

            if state.eof {
                if state.buf.is_empty() {
                    return None;
                }
                let rest = state.buf.split();
                let rest = trim_ascii(&rest);
                if rest.is_empty() {
                    return None;
                }
                let record = serde_json::from_slice::<T>(rest).map_err(StoreError::from);
                state.failed = true;
                return Some((record, state));
            }

            match state.body.next().await {
                Some(Ok(chunk)) => state.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    state.failed = true;
                    return Some((Err(e), state));
                }
                None => state.eof = true,
            }
        }
    })
    .boxed()
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &bytes[start..end]
}
