//! HTTP route definitions

use crate::{handlers, middleware, AppState};
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

/// Create the main router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        // Uploads
        .route("/storage/upload-chunk", post(handlers::upload_chunk))
        .route("/storage/uploads", get(handlers::list_uploads))
        .route(
            "/storage/uploads/{upload_id}",
            axum::routing::delete(handlers::abort_upload),
        )
        .route(
            "/storage/uploads/{upload_id}/finalize",
            post(handlers::finalize_upload),
        )
        // Retrieval and pins
        .route("/storage/getById", get(handlers::get_by_id))
        .route("/storage/pinned-files", get(handlers::pinned_files))
        .route("/storage/pinCID", get(handlers::pin_cid))
        .route("/storage/unpin", get(handlers::unpin_cid))
        // Peers
        .route("/peers", post(handlers::add_peer).get(handlers::list_peers))
        .route("/peers/get-latency", get(handlers::get_latency))
        .route("/peers/{peer_id}", get(handlers::peer_info))
        // Service endpoints
        .route("/ipfs", get(handlers::node_identity))
        .route("/health", get(handlers::health_check).head(handlers::health_check))
        // Apply middleware
        .layer(axum_middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::rate_limit_middleware,
        ))
        .layer(axum_middleware::from_fn(middleware::logging_middleware))
        .layer(axum_middleware::from_fn(middleware::request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(state.config.max_body_size))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::HEAD, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([
            header::CONTENT_DISPOSITION,
            HeaderName::from_static(middleware::REQUEST_ID_HEADER),
            HeaderName::from_static(handlers::PEER_CONNECT_HEADER),
            HeaderName::from_static(handlers::PIN_ON_READ_HEADER),
        ])
}
