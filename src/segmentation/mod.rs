pub mod buffer_pool;
mod engine;
mod onnx;
mod postprocess;
mod preprocess;
pub mod types;

pub use buffer_pool::{BufferRole, TensorBuffer, TensorBufferPool};
pub use engine::{InferenceEngine, InferenceRuntime};
pub use onnx::OnnxRuntime;
pub use postprocess::Postprocessor;
pub use preprocess::Preprocessor;
pub use types::{
    InferenceOutput, InputGeometry, ModelGeometry, Orientation, PreparedInput, RecurrentState,
    TensorSpec,
};

use anyhow::Result;

use crate::config::EngineConfig;

/// Load an ONNX model and bind it as an inference engine.
pub fn load_engine(config: &EngineConfig) -> Result<InferenceEngine> {
    let runtime = OnnxRuntime::load(config)?;
    Ok(InferenceEngine::new(Box::new(runtime))?)
}
