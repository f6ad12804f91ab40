use axum::http::{HeaderMap, header::AUTHORIZATION};

/// Validates the caller's bearer token against the configured `APPTOKEN`.
///
/// With no token configured, every request is accepted. The token may
/// arrive in the `Authorization: Bearer` header or (for WebSocket
/// handshakes, where headers are awkward from browsers) a `token` query
/// parameter.
pub fn validate_token(
    expected: Option<&str>,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    if expected.is_empty() {
        return true;
    }

    let header_token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    header_token == Some(expected) || query_token == Some(expected)
}
