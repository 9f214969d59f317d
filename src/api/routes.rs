use axum::{
    extract::{connect_info::ConnectInfo, DefaultBodyLimit},
    http::{HeaderName, Request},
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::auth::require_author;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.max_upload_size as usize;
    let proxy_header = state.config.server.reverse_proxy_header.clone();

    // Authenticated ShareX endpoints
    let updates = Router::new()
        .route(
            "/updates/upload",
            post(handlers::upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/updates/delete/:delete_reference",
            get(handlers::delete_entry),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_author,
        ));

    Router::new()
        .merge(updates)
        // Internal
        .route("/_internal/health", get(handlers::health))
        // Public download links
        .route("/:call_reference", get(handlers::request_entry))
        .layer(
            TraceLayer::new_for_http().make_span_with(move |request: &Request<_>| {
                tracing::info_span!(
                    "request",
                    client_ip = %client_ip(request, proxy_header.as_ref()),
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .with_state(state)
}

/// The first address in the proxy header if one is configured and present,
/// otherwise the peer address.
fn client_ip<B>(request: &Request<B>, proxy_header: Option<&HeaderName>) -> String {
    let forwarded = proxy_header
        .and_then(|name| request.headers().get(name))
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
