use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::ApiError;
use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LEN: usize = 128;

/// Per-request metadata attached as an extension by [`request_id`].
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub request_id: String,
}

fn acceptable_request_id(raw: &str) -> bool {
    !raw.is_empty()
        && raw.len() <= MAX_REQUEST_ID_LEN
        && raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b':'))
}

// Middleware: reuse the caller's `x-request-id` when it is sane, otherwise mint
// one; the id is echoed back on the response.
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| acceptable_request_id(v))
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestMeta {
        request_id: request_id.clone(),
    });

    let mut resp = next.run(req).await;
    if let Ok(v) = HeaderValue::from_str(&request_id) {
        resp.headers_mut().insert(REQUEST_ID_HEADER, v);
    }
    resp
}

// Middleware: in read-only mode every POST is refused before reaching a handler.
pub async fn read_only_guard(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if state.read_only && req.method() == Method::POST {
        let request_id = req
            .extensions()
            .get::<RequestMeta>()
            .map(|m| m.request_id.clone())
            .unwrap_or_default();
        tracing::info!(path = %req.uri().path(), %request_id, "rejected mutation in read-only mode");
        return ApiError::new(
            StatusCode::FORBIDDEN,
            "read_only",
            "control is in read-only mode",
            &request_id,
        )
        .into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_bounded_tokens() {
        assert!(acceptable_request_id("3f2b-11aa"));
        assert!(acceptable_request_id("trace.id:42"));
        assert!(!acceptable_request_id(""));
        assert!(!acceptable_request_id("has space"));
        assert!(!acceptable_request_id(&"a".repeat(MAX_REQUEST_ID_LEN + 1)));
    }
}
