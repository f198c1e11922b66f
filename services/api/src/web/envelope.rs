//! services/api/src/web/envelope.rs
//!
//! The uniform response envelope every endpoint returns, success or
//! failure. Mobile clients switch on the `status` string, not on HTTP
//! status codes alone, so the shape is identical in both cases.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// The wire shape of every API response.
#[derive(Debug, Serialize, ToSchema)]
pub struct Envelope {
    /// `"success"` or `"error"`.
    pub status: &'static str,
    /// Human-readable outcome text.
    pub message: String,
    /// Endpoint-specific payload; omitted on errors and on bare
    /// acknowledgements.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub data: Option<serde_json::Value>,
    /// Short machine-readable detail on errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 200 with a payload.
pub fn ok(message: impl Into<String>, data: impl Serialize) -> Response {
    match serde_json::to_value(data) {
        Ok(value) => (
            StatusCode::OK,
            Json(Envelope {
                status: "success",
                message: message.into(),
                data: Some(value),
                error: None,
            }),
        )
            .into_response(),
        Err(e) => internal(format!("response serialization failed: {e}")),
    }
}

/// 200 acknowledgement without a payload.
pub fn ok_message(message: impl Into<String>) -> Response {
    (
        StatusCode::OK,
        Json(Envelope {
            status: "success",
            message: message.into(),
            data: None,
            error: None,
        }),
    )
        .into_response()
}

/// Error with an explicit status code. The message doubles as the `error`
/// field so clients that only read one of the two see the same text.
pub fn fail(code: StatusCode, message: impl Into<String>) -> Response {
    let message = message.into();
    (
        code,
        Json(Envelope {
            status: "error",
            message: message.clone(),
            data: None,
            error: Some(message),
        }),
    )
        .into_response()
}

/// 500 with a generic client message; the detail goes to the log at the
/// call site, never to the client.
pub fn internal(log_detail: impl AsRef<str>) -> Response {
    tracing::error!("{}", log_detail.as_ref());
    fail(
        StatusCode::INTERNAL_SERVER_ERROR,
        "An unexpected internal error occurred",
    )
}
