use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use lookalike_vision::VisionError;

/// Errors that can abort a match operation.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("no face detected in the image")]
    NoFaceDetected,

    #[error("encoder produced {got} dimensions, expected {expected}")]
    EmbeddingDimension { expected: usize, got: usize },

    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("embedding length mismatch: query has {query} dimensions, reference has {reference}")]
    DimensionMismatch { query: usize, reference: usize },

    #[error("reference store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("inference failed: {0}")]
    Inference(String),
}

impl From<VisionError> for MatchError {
    fn from(err: VisionError) -> Self {
        match err {
            VisionError::NoFaceDetected => MatchError::NoFaceDetected,
            VisionError::EmbeddingDimension { expected, got } => {
                MatchError::EmbeddingDimension { expected, got }
            }
            VisionError::ModelLoad(msg) => MatchError::ModelLoad(msg),
            VisionError::Inference(msg) => MatchError::Inference(msg),
        }
    }
}

impl MatchError {
    fn status_code(&self) -> StatusCode {
        match self {
            MatchError::Validation(_) | MatchError::NoFaceDetected => StatusCode::BAD_REQUEST,
            MatchError::StoreUnavailable(_) => StatusCode::BAD_GATEWAY,
            MatchError::EmbeddingDimension { .. }
            | MatchError::ModelLoad(_)
            | MatchError::DimensionMismatch { .. }
            | MatchError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// HTTP error envelope: `{ "error": "<message>" }` with a non-2xx status.
impl IntoResponse for MatchError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_client_errors() {
        assert_eq!(
            MatchError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            MatchError::NoFaceDetected.status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn store_errors_map_to_bad_gateway() {
        assert_eq!(
            MatchError::StoreUnavailable("down".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn vision_errors_convert_variant_for_variant() {
        let err: MatchError = VisionError::EmbeddingDimension {
            expected: 128,
            got: 512,
        }
        .into();
        match err {
            MatchError::EmbeddingDimension { expected, got } => {
                assert_eq!(expected, 128);
                assert_eq!(got, 512);
            }
            other => panic!("unexpected conversion: {other}"),
        }
    }
}
