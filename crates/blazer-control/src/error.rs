use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use blazer_agent::{ErrorKind, LifecycleError};
use serde::Serialize;

use crate::namespace::NamespaceError;

const MAX_MESSAGE_BYTES: usize = 32 * 1024;

/// Cut `s` to at most `max_bytes`, never inside a UTF-8 sequence.
fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    const SUFFIX: &str = "…(truncated)";
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let budget = max_bytes.saturating_sub(SUFFIX.len());
    let end = s
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .take_while(|end| *end <= budget)
        .last()
        .unwrap_or(0);
    format!("{}{SUFFIX}", &s[..end])
}

/// JSON error body returned by every route.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &str,
        message: impl Into<String>,
        request_id: &str,
    ) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: truncate_utf8(&message.into(), MAX_MESSAGE_BYTES),
            request_id: request_id.to_string(),
            hint: None,
        }
    }

    pub fn invalid(message: impl Into<String>, request_id: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid", message, request_id)
    }

    pub fn from_lifecycle(err: &LifecycleError, request_id: &str) -> Self {
        let mut out = Self::new(lifecycle_status(err), err.code(), err.to_string(), request_id);
        out.hint = err.hint().map(str::to_string);
        out
    }

    pub fn from_namespace(err: &NamespaceError, request_id: &str) -> Self {
        let status = match err {
            NamespaceError::Invalid(_) => StatusCode::BAD_REQUEST,
            NamespaceError::NotRunning(_) => StatusCode::CONFLICT,
            NamespaceError::Upstream(_) | NamespaceError::Rejected { .. } => {
                StatusCode::BAD_GATEWAY
            }
        };
        Self::new(status, err.code(), err.to_string(), request_id)
    }
}

pub fn lifecycle_status(err: &LifecycleError) -> StatusCode {
    match err.kind() {
        ErrorKind::Validation | ErrorKind::EnvironmentConflict => StatusCode::BAD_REQUEST,
        ErrorKind::LaunchFailure | ErrorKind::Persistence => StatusCode::INTERNAL_SERVER_ERROR,
        // Missing records are 404; a live process is a bad request.
        ErrorKind::StateConflict => match err {
            LifecycleError::AlreadyRunning { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::NOT_FOUND,
        },
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blazer_process::InstanceId;

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = "é".repeat(MAX_MESSAGE_BYTES);
        let out = truncate_utf8(&long, MAX_MESSAGE_BYTES);
        assert!(out.len() <= MAX_MESSAGE_BYTES);
        assert!(out.ends_with("…(truncated)"));
    }

    #[test]
    fn short_messages_are_untouched() {
        assert_eq!(truncate_utf8("boom", 16), "boom");
    }

    #[test]
    fn lifecycle_errors_map_to_route_statuses() {
        let dup = LifecycleError::Duplicate {
            name: "alpha".to_string(),
            port: 9001,
        };
        assert_eq!(lifecycle_status(&dup), StatusCode::BAD_REQUEST);
        assert_eq!(
            lifecycle_status(&LifecycleError::NotFoundOrAlreadyStopped(InstanceId(1))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            lifecycle_status(&LifecycleError::NotFound(InstanceId(1))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            lifecycle_status(&LifecycleError::AlreadyRunning {
                id: InstanceId(1),
                pid: 10
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            lifecycle_status(&LifecycleError::PortInUse {
                port: 9001,
                pid: None
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            lifecycle_status(&LifecycleError::LaunchTimeout {
                port: 9001,
                timeout_secs: 60
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );

        let body = ApiError::from_lifecycle(&dup, "req-1");
        assert_eq!(body.code, "duplicate");
        assert_eq!(body.request_id, "req-1");
    }

    #[test]
    fn status_is_not_serialized() {
        let err = ApiError::invalid("port is required", "req-2");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "invalid");
        assert!(json.get("status").is_none());
        assert!(json.get("hint").is_none());
    }
}
