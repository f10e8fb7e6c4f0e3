use thiserror::Error;

/// Errors surfaced by the detection/embedding pipeline.
#[derive(Debug, Error)]
pub enum VisionError {
    /// Session construction failed. Fatal for the whole pipeline, never
    /// retried.
    #[error("model load failed: {0}")]
    ModelLoad(String),

    /// The detector found no face in the input image.
    #[error("no face detected in the image")]
    NoFaceDetected,

    /// The encoder produced a vector of unexpected length.
    #[error("encoder produced {got} dimensions, expected {expected}")]
    EmbeddingDimension { expected: usize, got: usize },

    /// Runtime failure inside the inference engine or tensor plumbing.
    #[error("inference failed: {0}")]
    Inference(String),
}

impl From<ort::Error> for VisionError {
    fn from(err: ort::Error) -> Self {
        VisionError::Inference(err.to_string())
    }
}

impl From<ndarray::ShapeError> for VisionError {
    fn from(err: ndarray::ShapeError) -> Self {
        VisionError::Inference(err.to_string())
    }
}
