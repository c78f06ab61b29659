use anyhow::{bail, Context, Result};
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
    TensorRTExecutionProvider,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionInputValue};
use ort::value::Tensor;

use super::engine::InferenceRuntime;
use super::types::TensorSpec;
use crate::config::{EngineConfig, ExecutionProvider};

/// ONNX Runtime session behind the [`InferenceRuntime`] contract.
///
/// Tensors are bound by the names the model declares. Dynamic dimensions
/// are pinned to 1 when the shapes are read.
pub struct OnnxRuntime {
    session: Session,
    label: String,
    inputs: Vec<TensorSpec>,
    outputs: Vec<TensorSpec>,
}

impl OnnxRuntime {
    pub fn load(config: &EngineConfig) -> Result<Self> {
        let path = &config.model_path;
        tracing::info!("Loading model from {}", path.display());

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.intra_threads)?
            .with_execution_providers(providers(&config.execution_providers))?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        let inputs = session
            .inputs
            .iter()
            .map(|input| spec(&input.name, input.input_type.tensor_shape().map(|s| s.to_vec())))
            .collect::<Result<Vec<_>>>()?;
        let outputs = session
            .outputs
            .iter()
            .map(|output| spec(&output.name, output.output_type.tensor_shape().map(|s| s.to_vec())))
            .collect::<Result<Vec<_>>>()?;

        for t in inputs.iter() {
            tracing::debug!("  input  {} {:?}", t.name, t.shape);
        }
        for t in outputs.iter() {
            tracing::debug!("  output {} {:?}", t.name, t.shape);
        }
        tracing::info!("Model loaded successfully");

        let label = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "onnx".to_string());

        Ok(Self {
            session,
            label,
            inputs,
            outputs,
        })
    }
}

impl InferenceRuntime for OnnxRuntime {
    fn inputs(&self) -> &[TensorSpec] {
        &self.inputs
    }

    fn outputs(&self) -> &[TensorSpec] {
        &self.outputs
    }

    fn execute(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]]) -> Result<()> {
        if inputs.len() != self.inputs.len() || outputs.len() != self.outputs.len() {
            bail!(
                "expected {} inputs / {} outputs, got {} / {}",
                self.inputs.len(),
                self.outputs.len(),
                inputs.len(),
                outputs.len()
            );
        }

        let mut feeds: Vec<(String, SessionInputValue)> = Vec::with_capacity(inputs.len());
        for (spec, data) in self.inputs.iter().zip(inputs) {
            let tensor = Tensor::from_array((spec.shape.clone(), data.to_vec().into_boxed_slice()))
                .with_context(|| format!("Failed to bind input {}", spec.name))?;
            feeds.push((spec.name.clone(), tensor.into()));
        }

        let results = self.session.run(feeds).context("Failed to run inference")?;

        for (spec, sink) in self.outputs.iter().zip(outputs.iter_mut()) {
            let (_shape, data) = results[spec.name.as_str()]
                .try_extract_tensor::<f32>()
                .with_context(|| format!("Failed to extract output {}", spec.name))?;
            if data.len() != sink.len() {
                bail!(
                    "output {} has {} elements, expected {}",
                    spec.name,
                    data.len(),
                    sink.len()
                );
            }
            sink.copy_from_slice(data);
        }
        Ok(())
    }

    fn name(&self) -> String {
        self.label.clone()
    }
}

fn providers(order: &[ExecutionProvider]) -> Vec<ExecutionProviderDispatch> {
    order
        .iter()
        .map(|provider| match provider {
            ExecutionProvider::TensorRt => TensorRTExecutionProvider::default().build(),
            ExecutionProvider::Cuda => CUDAExecutionProvider::default().build(),
            ExecutionProvider::Cpu => CPUExecutionProvider::default().build(),
        })
        .collect()
}

fn spec(name: &str, shape: Option<Vec<i64>>) -> Result<TensorSpec> {
    let Some(shape) = shape else {
        bail!("model tensor {name} is not a tensor");
    };
    Ok(TensorSpec::new(name, resolve_dims(&shape)))
}

/// Dynamic (negative) dimensions become 1.
fn resolve_dims(dims: &[i64]) -> Vec<usize> {
    dims.iter()
        .map(|&d| if d > 0 { d as usize } else { 1 })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_dims_resolve_to_one() {
        assert_eq!(resolve_dims(&[-1, 3, 256, -1]), vec![1, 3, 256, 1]);
        assert_eq!(resolve_dims(&[1, 0, 8]), vec![1, 1, 8]);
    }

    #[test]
    fn provider_order_is_preserved() {
        let order = [ExecutionProvider::Cuda, ExecutionProvider::Cpu];
        assert_eq!(providers(&order).len(), 2);
    }
}
