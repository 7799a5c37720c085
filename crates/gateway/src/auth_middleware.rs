use axum::{
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};

use {parley_common::Error, secrecy::ExposeSecret, tracing::debug};

use crate::{error::ApiError, server::AppState};

/// Header accepted as an alternative to `Authorization: Bearer`.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Protect `/api/*` with the configured API key. With no key configured all
/// requests pass through.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.gateway.api_key.as_ref() else {
        return next.run(request).await;
    };

    let presented = presented_key(request.headers());
    if presented.is_some_and(|key| keys_match(key, expected.expose_secret())) {
        return next.run(request).await;
    }
    debug!(
        path = %request.uri().path(),
        presented = presented.is_some(),
        "rejected unauthenticated request"
    );
    ApiError(Error::Auth).into_response()
}

fn presented_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(key.trim());
    }
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
}

/// Length-independent comparison so response timing does not leak a prefix match.
fn keys_match(presented: &str, expected: &str) -> bool {
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    let mut diff = a.len() ^ b.len();
    for (i, byte) in b.iter().enumerate() {
        diff |= usize::from(a.get(i).copied().unwrap_or(0) ^ byte);
    }
    diff == 0
}
