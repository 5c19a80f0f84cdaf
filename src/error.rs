use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    ServiceUnavailable(String),
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "invalid_request",
            AppError::ServiceUnavailable(_) => "unavailable",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::BadRequest(msg) => msg.clone(),
            AppError::ServiceUnavailable(msg) => {
                tracing::warn!("service unavailable: {msg}");
                msg.clone()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.message()
            }
        });

        (status, Json(body)).into_response()
    }
}

/// Outcome of a non-blocking enqueue onto a session mailbox.
///
/// Neither variant is fatal: callers log and move on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxError {
    Full,
    Closed,
}

impl std::fmt::Display for MailboxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailboxError::Full => f.write_str("mailbox full"),
            MailboxError::Closed => f.write_str("mailbox closed"),
        }
    }
}

impl std::error::Error for MailboxError {}
