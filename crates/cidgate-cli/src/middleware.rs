//! HTTP middleware for request ids, logging and rate limiting

use crate::{ApiError, AppState, ErrorCode};
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use governor::{state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Header carrying the request id in both directions
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Rate limiter keyed by client address
pub type KeyedRateLimiter =
    RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, governor::clock::DefaultClock>;

/// Key for requests that arrive without a socket address (in-process routers)
const UNKNOWN_CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

tokio::task_local! {
    static REQUEST_ID: String;
}

/// Request id of the request being served on this task, if any
pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(|id| id.clone()).ok()
}

/// Create a rate limiter
pub fn create_rate_limiter(requests_per_second: u32) -> Arc<KeyedRateLimiter> {
    let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::keyed(Quota::per_second(rps)))
}

/// Address a request is throttled under.
///
/// This is the socket peer. When the peer is one of `trusted_proxies`, the
/// `x-forwarded-for` chain is walked from the right and the first hop that
/// is not itself a trusted proxy is used instead.
pub fn client_addr(request: &Request<Body>, trusted_proxies: &[IpAddr]) -> IpAddr {
    let Some(ConnectInfo(peer)) = request.extensions().get::<ConnectInfo<SocketAddr>>() else {
        return UNKNOWN_CLIENT;
    };
    let peer = peer.ip();
    if !trusted_proxies.contains(&peer) {
        return peer;
    }

    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|chain| {
            chain
                .rsplit(',')
                .map_while(|hop| hop.trim().parse::<IpAddr>().ok())
                .find(|hop| !trusted_proxies.contains(hop))
        })
        .unwrap_or(peer)
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let key = client_addr(&request, &state.config.trusted_proxies);
    if state.rate_limiter.check_key(&key).is_err() {
        tracing::debug!(client = %key, "Request rate limited");
        return Err(ApiError::new(
            ErrorCode::SlowDown,
            "Please reduce your request rate",
        ));
    }

    Ok(next.run(request).await)
}

/// Request ID middleware.
///
/// Reuses a caller-supplied `x-request-id` or issues a new one, exposes it
/// to error bodies through a task-local, and echoes it on the response.
pub async fn request_id_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut response = REQUEST_ID.scope(request_id.clone(), next.run(request)).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %status.as_u16(),
        duration_ms = %duration.as_millis(),
        "Request completed"
    );

    response
}
