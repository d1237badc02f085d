//! `x-request-id` handling: generate one when the client sent none, echo it
//! back, expose it to handlers and put it on the request span.

use std::time::Duration;

use axum::extract::Request;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::{middleware::Next, response::Response};
use tower_http::request_id::{MakeRequestId, RequestId};
use tracing::{field::Empty, Span};

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Request id of the current request, available to handlers as
/// `Extension<XRequestId>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XRequestId(pub String);

impl XRequestId {
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(&REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| Self(s.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Generates nanoid request ids.
#[derive(Clone, Copy, Debug, Default)]
pub struct NanoIdRequestId;

impl MakeRequestId for NanoIdRequestId {
    fn make_request_id<B>(&mut self, _req: &axum::http::Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&nanoid::nanoid!()).ok().map(RequestId::new)
    }
}

/// Copy the id into request extensions. Runs inside `SetRequestIdLayer`, so
/// the header is always present by now.
pub async fn expose_request_id(mut req: Request, next: Next) -> Response {
    if let Some(id) = XRequestId::from_headers(req.headers()) {
        req.extensions_mut().insert(id);
    }
    next.run(req).await
}

pub(crate) fn request_span(req: &Request) -> Span {
    let id = XRequestId::from_headers(req.headers());
    tracing::info_span!(
        "http_request",
        method = %req.method(),
        path = %req.uri().path(),
        request_id = id.as_ref().map_or("n/a", XRequestId::as_str),
        status = Empty,
        latency_ms = Empty,
    )
}

pub(crate) fn record_response(resp: &Response, latency: Duration, span: &Span) {
    span.record("status", resp.status().as_u16());
    span.record("latency_ms", latency.as_millis() as u64);
    tracing::debug!(parent: span, "request finished");
}
