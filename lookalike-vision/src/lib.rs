pub mod error;
pub mod face;
pub mod model;
pub mod pipeline;
pub mod yunet;

// Re-export commonly used types
pub use error::VisionError;
pub use face::{Detection, Embedding};
pub use pipeline::{Pipeline, PipelineConfig};
