use std::sync::Arc;

use axum::{
    http::{StatusCode, Uri},
    middleware::from_fn,
    response::IntoResponse,
    Router,
};
use runtime::{ServerSettings, Settings};
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::{RequestBodyTimeoutLayer, TimeoutLayer},
    trace::TraceLayer,
};

use crate::http::request_id::{self, NanoIdRequestId, REQUEST_ID_HEADER};
use crate::http::static_files::{self, StaticSource};

/// Router transformation applied around the whole app, e.g. CORS or auth.
pub type Middleware = Arc<dyn Fn(Router) -> Router + Send + Sync + 'static>;

/// Normalize an API root: leading slash, no trailing slash, `""` for the root.
pub(crate) fn normalize_root(root: &str) -> String {
    let trimmed = root.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

async fn api_not_found(uri: Uri) -> impl IntoResponse {
    (StatusCode::NOT_FOUND, format!("no route for {}", uri.path()))
}

/// Assemble the final router: module routes under `api_root`, static files
/// from `assets` behind them, then the shared middleware stack.
pub fn compose_router(
    settings: &Settings,
    api: Router,
    api_root: &str,
    middlewares: &[Middleware],
    assets: StaticSource,
) -> Router {
    let root = normalize_root(api_root);

    let mut router = if root.is_empty() {
        Router::new().merge(api)
    } else {
        Router::new().nest(&root, api.fallback(api_not_found))
    };

    if settings.static_server.enabled {
        let static_root = normalize_root(&settings.static_server.path);
        if !root.is_empty() && static_root == root {
            tracing::warn!(path = %static_root, "static files share the API root; not mounting them");
        } else {
            router = static_files::mount(router, &settings.static_server, assets);
        }
    }

    apply_http_layers(router, &settings.server, middlewares)
}

/// Layers, outermost first: user middlewares, request id propagation, request
/// id generation, request id extension, trace span, body read timeout, handler
/// timeout. A zero timeout disables that layer.
fn apply_http_layers(mut router: Router, server: &ServerSettings, middlewares: &[Middleware]) -> Router {
    if !server.write_timeout.is_zero() {
        router = router.layer(TimeoutLayer::new(server.write_timeout));
    }
    if !server.read_timeout.is_zero() {
        router = router.layer(RequestBodyTimeoutLayer::new(server.read_timeout));
    }
    if !server.idle_timeout.is_zero() {
        tracing::debug!(idle_timeout = ?server.idle_timeout, "server.idle_timeout is accepted but not enforced");
    }

    router = router
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(request_id::request_span)
                .on_response(request_id::record_response),
        )
        .layer(from_fn(request_id::expose_request_id))
        .layer(SetRequestIdLayer::new(REQUEST_ID_HEADER, NanoIdRequestId))
        .layer(PropagateRequestIdLayer::new(REQUEST_ID_HEADER));

    for mw in middlewares.iter().rev() {
        router = mw(router);
    }
    router
}
