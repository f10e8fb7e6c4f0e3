use std::path::PathBuf;

use image::DynamicImage;
use ort::session::Session;

use crate::error::VisionError;
use crate::face::{self, Detection, Embedding};
use crate::model;

/// Model locations plus detector/encoder tunables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub detector_model: PathBuf,
    pub encoder_model: PathBuf,
    /// Square side length of the encoder input crop.
    pub encoder_input: u32,
    /// Expected embedding length; any other encoder output is a hard error.
    pub embedding_dim: usize,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detector_model: PathBuf::from("models/face_detection_yunet_2023mar.onnx"),
            encoder_model: PathBuf::from("models/face_recognition_sface_2021dec.onnx"),
            encoder_input: 112,
            embedding_dim: 128,
            score_threshold: 0.6,
            nms_threshold: 0.3,
        }
    }
}

/// Full pipeline: detect faces, align the best one, encode it.
pub struct Pipeline {
    detector: Session,
    encoder: Session,
    config: PipelineConfig,
}

impl Pipeline {
    /// Load both sessions once. A failure here is fatal for the pipeline
    /// and is not retried.
    pub fn new(config: PipelineConfig) -> Result<Self, VisionError> {
        Ok(Self {
            detector: model::load_session(&config.detector_model)?,
            encoder: model::load_session(&config.encoder_model)?,
            config,
        })
    }

    /// Detect the best face and return it together with its embedding.
    pub fn process_image(
        &mut self,
        img: &DynamicImage,
    ) -> Result<(Detection, Embedding), VisionError> {
        let detections = face::detect_faces(
            &mut self.detector,
            img,
            self.config.score_threshold,
            self.config.nms_threshold,
        )?;

        let best = detections
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .ok_or(VisionError::NoFaceDetected)?;

        let crop = face::align_face(img, &best, self.config.encoder_input)?;
        let embedding = face::encode_face(
            &mut self.encoder,
            &crop,
            self.config.encoder_input,
            self.config.embedding_dim,
        )?;

        Ok((best, embedding))
    }

    /// Detect and encode, returning only the embedding.
    pub fn embed(&mut self, img: &DynamicImage) -> Result<Embedding, VisionError> {
        let (_detection, embedding) = self.process_image(img)?;
        Ok(embedding)
    }
}
