use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::AppState;

pub(crate) fn is_loopback(host: &str) -> bool {
    matches!(host, "127.0.0.1" | "::1" | "localhost")
}

fn tokens_match(given: &str, expected: &str) -> bool {
    if given.len() != expected.len() {
        return false;
    }
    given
        .as_bytes()
        .iter()
        .zip(expected.as_bytes().iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "success": false, "error": message })),
    )
        .into_response()
}

pub async fn require_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    // No token configured: open access only on loopback (safe for local dev)
    if state.api_token.is_empty() {
        if is_loopback(&state.api_host) {
            return next.run(req).await;
        }
        return unauthorized(
            "No API token configured. Set server.api_token before exposing on a non-loopback address.",
        );
    }

    let raw_token = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));

    match raw_token {
        None => unauthorized("Missing or invalid Authorization header. Use: Bearer <token>"),
        Some(token) if tokens_match(token, &state.api_token) => next.run(req).await,
        Some(_) => unauthorized("Invalid API token"),
    }
}
