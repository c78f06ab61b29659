//! Canonical configuration shared by the pipeline stages.
//!
//! The binary translates its CLI flags into these structs once; library code
//! never re-parses flags.

use std::path::PathBuf;
use std::time::Duration;

/// Timing and failure policy of a pipeline session.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Longest a producer waits on its frame source before re-checking liveness.
    pub poll_timeout: Duration,
    /// Longest the inference loop waits on the hand-off slot before re-checking liveness.
    pub slot_wait: Duration,
    /// Consecutive runtime failures tolerated before the session is declared failed.
    pub max_consecutive_failures: u32,
    /// Sleep file sources down to their natural frame rate.
    pub pace_file_sources: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(50),
            slot_wait: Duration::from_millis(50),
            max_consecutive_failures: 5,
            pace_file_sources: true,
        }
    }
}

/// Geometry rules for the interactive region of interest (view units).
#[derive(Clone, Copy, Debug)]
pub struct RoiConfig {
    /// Smallest width and height a user may shrink the rectangle to.
    pub min_size: f32,
    /// Radius of the corner handles used for resize gestures.
    pub handle_radius: f32,
    /// Fraction of the target rect trimmed from each side for the default rectangle.
    pub default_inset: f32,
}

impl Default for RoiConfig {
    fn default() -> Self {
        Self {
            min_size: 50.0,
            handle_radius: 30.0,
            default_inset: 0.2,
        }
    }
}

/// ONNX Runtime execution provider, tried in the configured order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionProvider {
    TensorRt,
    Cuda,
    Cpu,
}

impl ExecutionProvider {
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "tensorrt" | "trt" => Some(Self::TensorRt),
            "cuda" | "gpu" => Some(Self::Cuda),
            "cpu" => Some(Self::Cpu),
            _ => None,
        }
    }
}

/// How to build an inference engine from a model file.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub model_path: PathBuf,
    pub intra_threads: usize,
    pub execution_providers: Vec<ExecutionProvider>,
}

impl EngineConfig {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            intra_threads: 4,
            execution_providers: vec![
                ExecutionProvider::TensorRt,
                ExecutionProvider::Cuda,
                ExecutionProvider::Cpu,
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_roi_covers_sixty_percent() {
        let roi = RoiConfig::default();
        assert!((1.0 - 2.0 * roi.default_inset - 0.6).abs() < 1e-6);
        assert_eq!(roi.min_size, 50.0);
    }

    #[test]
    fn parses_provider_names() {
        assert_eq!(ExecutionProvider::parse("TRT"), Some(ExecutionProvider::TensorRt));
        assert_eq!(ExecutionProvider::parse(" cuda "), Some(ExecutionProvider::Cuda));
        assert_eq!(ExecutionProvider::parse("npu"), None);
    }
}
