use image::DynamicImage;

use lookalike_vision::{Pipeline, PipelineConfig};

use crate::config::ModelConfig;
use crate::error::MatchError;

/// Embedding provider seam: anything that turns an image into a
/// fixed-length face embedding. Implementations take `&mut self` because
/// inference engines are not assumed thread-safe; callers serialize access.
pub trait FaceEmbedder: Send {
    fn embed(&mut self, img: &DynamicImage) -> Result<Vec<f32>, MatchError>;
}

/// ONNX-backed embedder wrapping the vision pipeline. Sessions are loaded
/// once at construction and reused for every call.
pub struct OnnxEmbedder {
    pipeline: Pipeline,
}

impl OnnxEmbedder {
    pub fn new(models: &ModelConfig) -> Result<Self, MatchError> {
        let pipeline = Pipeline::new(PipelineConfig {
            detector_model: models.detector.clone(),
            encoder_model: models.encoder.clone(),
            encoder_input: models.encoder_input,
            embedding_dim: models.embedding_dim,
            score_threshold: models.score_threshold,
            nms_threshold: models.nms_threshold,
        })?;
        Ok(Self { pipeline })
    }
}

impl FaceEmbedder for OnnxEmbedder {
    fn embed(&mut self, img: &DynamicImage) -> Result<Vec<f32>, MatchError> {
        Ok(self.pipeline.embed(img)?.vector)
    }
}
