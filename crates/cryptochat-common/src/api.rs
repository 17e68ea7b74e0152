use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use serde::{Deserialize, Serialize};

/// Error responses carry RFC 7807's content type with a single-field body.
pub const PROBLEM_JSON: &str = "application/problem+json";

/// Standard error body for API responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

/// Build a problem+json error response with the given status.
pub fn problem_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        message: message.into(),
    };
    // ErrorBody cannot fail to serialize; fall back to the bare message if
    // serde_json ever disagrees.
    let payload = serde_json::to_vec(&body).unwrap_or_else(|_| body.message.into_bytes());

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, PROBLEM_JSON)
        .body(Body::from(payload))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
