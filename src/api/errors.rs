//! HTTP error mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use crate::error::PlateError;
use crate::shared::ErrorBody;

/// Error returned by a handler, rendered as `{"detail": ...}`
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    /// Malformed request (400)
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    /// Well-formed request whose content cannot be processed (422)
    pub fn unprocessable(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, detail)
    }

    /// Server-side failure (500)
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.status.as_u16(), self.detail)
    }
}

impl std::error::Error for ApiError {}

impl From<PlateError> for ApiError {
    fn from(err: PlateError) -> Self {
        if err.is_input_error() {
            Self::unprocessable(err.to_string())
        } else {
            Self::internal(err.to_string())
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::internal(format!("worker task failed: {}", err))
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        Self::internal(format!("i/o error: {}", err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request failed: {}", self.detail);
        }
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plate_error_status() {
        let decode: ApiError = PlateError::decode("image bytes", "bad header").into();
        assert_eq!(decode.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(decode.detail, "failed to decode image bytes: bad header");

        let open: ApiError = PlateError::open("clip.mp4", "no such file").into();
        assert_eq!(open.status, StatusCode::UNPROCESSABLE_ENTITY);

        let detector: ApiError = PlateError::Detector("bad output".into()).into();
        assert_eq!(detector.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_response_status() {
        let response = ApiError::bad_request("Unsupported file type").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
