//! Server wiring: a small demo application wrapped by the CAS middleware,
//! with the request-id, tracing, and error-handling layers around it.

pub mod handlers;

use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Body,
    error_handling::HandleErrorLayer,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request, StatusCode},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower::{BoxError, ServiceBuilder};
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{error, info, info_span, Span};
use ulid::Ulid;

use crate::cas::{CasGate, CasLayer};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, gate: Arc<CasGate>) -> Result<()> {
    let app = router(gate);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Build the demo application router wrapped with the CAS middleware.
///
/// Failures the middleware propagates (anything but an invalid ticket) are
/// mapped to 502 here; library consumers pick their own `HandleErrorLayer`.
#[must_use]
pub fn router(gate: Arc<CasGate>) -> Router {
    Router::new()
        .route("/", get(handlers::pages::root))
        .route("/private", get(handlers::pages::private_area))
        .route("/health", get(handlers::health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(HandleErrorLayer::new(handle_cas_error))
                .layer(CasLayer::new(gate)),
        )
}

async fn handle_cas_error(err: BoxError) -> (StatusCode, String) {
    error!("CAS authentication failed: {err}");
    (
        StatusCode::BAD_GATEWAY,
        format!("CAS authentication failed: {err}"),
    )
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Gracefully shutdown");
}
