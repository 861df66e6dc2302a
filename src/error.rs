//! Errors surfaced to callers of the accept endpoint.

use crate::app::StatusBody;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::warn;

/// Validation failures at the HTTP boundary. Nothing else reaches a client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("id is required")]
    MissingId,

    #[error("Invalid id")]
    InvalidId(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::MissingId => warn!("Rejecting accept: missing id"),
            Self::InvalidId(raw) => warn!("Rejecting accept: invalid id {:?}", raw),
            Self::InvalidQuery(reason) => warn!("Rejecting accept: {}", reason),
        }
        let status = StatusCode::BAD_REQUEST;
        (
            status,
            Json(StatusBody {
                status_code: status.as_u16(),
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}
