//! Demo pages behind the middleware. The session snapshot arrives as a
//! request extension inserted on passthrough.

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

use crate::session::SessionData;

pub async fn root(Extension(session): Extension<SessionData>) -> impl IntoResponse {
    match &session.cas {
        Some(cas) => format!("Hello, {}!\n", cas.user),
        None if session.anonymous => "Hello, anonymous guest!\n".to_string(),
        None => "Hello, stranger!\n".to_string(),
    }
}

/// Returns 401 without an authenticated user; the middleware turns that
/// into a CAS login redirect for browser navigation.
pub async fn private_area(Extension(session): Extension<SessionData>) -> impl IntoResponse {
    match session.cas {
        Some(cas) => Json(json!({
            "user": cas.user,
            "extra_attributes": cas.extra_attributes,
            "proxy_ticket": cas.proxy_ticket,
        }))
        .into_response(),
        None => StatusCode::UNAUTHORIZED.into_response(),
    }
}
