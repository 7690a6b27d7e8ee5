//! Default middleware stack for listeners.
//!
//! Outermost first: request id → id propagation → request tracing →
//! panic recovery → request timeout → handlers.

use std::any::Any;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

use super::request::{RequestIdExt, UuidRequestId, X_REQUEST_ID};
use crate::config::ListenerConfig;

/// Wrap `router` in the default stack unless the config disables it.
#[allow(deprecated)]
pub fn apply(router: Router, config: &ListenerConfig) -> Router {
    if config.disable_default_middleware {
        return router;
    }

    let router = router
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(CatchPanicLayer::custom(recover));

    let router = if config.disable_request_logging {
        router
    } else {
        router.layer(
            TraceLayer::new_for_http()
                .make_span_with(request_span)
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
    };

    router
        .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
        .layer(SetRequestIdLayer::new(X_REQUEST_ID, UuidRequestId))
}

fn request_span(request: &Request<Body>) -> Span {
    tracing::info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = request.request_id().unwrap_or("-"),
    )
}

fn recover(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(panic = %detail, "Handler panicked");
    (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
}
