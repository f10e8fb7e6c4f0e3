use std::path::Path;

use ort::{
    ep::{self, ExecutionProvider},
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
};

use crate::error::VisionError;

pub fn session_builder() -> Result<SessionBuilder, VisionError> {
    let mut builder = Session::builder()
        .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
        .map_err(|e| VisionError::ModelLoad(e.to_string()))?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep
            .is_available()
            .map_err(|e| VisionError::ModelLoad(e.to_string()))?
        {
            ep.register(&mut builder)
                .map_err(|e| VisionError::ModelLoad(e.to_string()))?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino");
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep
            .is_available()
            .map_err(|e| VisionError::ModelLoad(e.to_string()))?
        {
            ep.register(&mut builder)
                .map_err(|e| VisionError::ModelLoad(e.to_string()))?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda");
        }
    }

    Ok(builder)
}

/// Load an ONNX model from disk into a session.
pub fn load_session(path: &Path) -> Result<Session, VisionError> {
    session_builder()?
        .commit_from_file(path)
        .map_err(|e| VisionError::ModelLoad(format!("{}: {e}", path.display())))
}
