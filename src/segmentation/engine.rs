use ndarray::{Array3, ArrayD, IxDyn};

use super::buffer_pool::{BufferRole, TensorBuffer, TensorBufferPool};
use super::types::{
    InferenceOutput, InputGeometry, ModelGeometry, PreparedInput, RecurrentState, TensorSpec,
};
use crate::error::{PipelineError, Result};

/// Opaque neural runtime: one primary plus N recurrent tensors in, the same
/// layout out. Tensor sizes are fixed for the lifetime of the runtime.
pub trait InferenceRuntime: Send {
    fn inputs(&self) -> &[TensorSpec];

    fn outputs(&self) -> &[TensorSpec];

    /// Run once, reading `inputs` and filling `outputs`, both in declaration order.
    fn execute(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]]) -> anyhow::Result<()>;

    /// Short label for logs.
    fn name(&self) -> String {
        "runtime".to_string()
    }
}

/// Threads recurrent state through an [`InferenceRuntime`].
///
/// Not reentrant; the pipeline owns it from exactly one thread.
pub struct InferenceEngine {
    runtime: Box<dyn InferenceRuntime>,
    geometry: ModelGeometry,
    pool: TensorBufferPool,
}

impl InferenceEngine {
    /// Bind a runtime after checking its tensors against the model contract.
    pub fn new(runtime: Box<dyn InferenceRuntime>) -> Result<Self> {
        let geometry = ModelGeometry::from_specs(runtime.inputs(), runtime.outputs())?;
        let declared = runtime.outputs()[0].element_count();
        if declared != geometry.output_elements() {
            return Err(PipelineError::ModelContract(format!(
                "primary output holds {} elements, expected {}x{}x3",
                declared, geometry.output_height, geometry.output_width
            )));
        }
        if geometry.hidden_inputs != geometry.hidden_outputs {
            tracing::warn!(
                "{}: recurrent inputs {:?} differ from outputs {:?}, state will be padded",
                runtime.name(),
                geometry.hidden_inputs,
                geometry.hidden_outputs
            );
        }
        tracing::info!(
            "Bound {}: input {}x{} x{}, output {}x{}, {} recurrent tensors",
            runtime.name(),
            geometry.input.width,
            geometry.input.height,
            geometry.input.frame_repeat(),
            geometry.output_width,
            geometry.output_height,
            geometry.hidden_inputs.len()
        );
        Ok(Self {
            runtime,
            geometry,
            pool: TensorBufferPool::new(),
        })
    }

    pub fn geometry(&self) -> &ModelGeometry {
        &self.geometry
    }

    pub fn input_geometry(&self) -> InputGeometry {
        self.geometry.input
    }

    pub fn name(&self) -> String {
        self.runtime.name()
    }

    /// One inference step.
    ///
    /// Recurrent inputs come from `prev` (zeros on cold start). A state whose
    /// shapes disagree with the model is zero-padded or truncated and a
    /// warning is logged; the call still goes ahead.
    pub fn run(&mut self, input: &PreparedInput, prev: &RecurrentState) -> Result<InferenceOutput> {
        let _span = tracing::debug_span!("inference").entered();

        let expected = self.geometry.input.elements;
        if input.tensor().len() != expected {
            return Err(PipelineError::Frame(format!(
                "prepared input has {} elements, model expects {}",
                input.tensor().len(),
                expected
            )));
        }

        let hidden_in = self.fill_hidden_inputs(prev)?;
        let mut outputs = match self.acquire_outputs() {
            Ok(outputs) => outputs,
            Err(err) => {
                release_into(&mut self.pool, hidden_in);
                return Err(err);
            }
        };

        let executed = {
            let mut feeds: Vec<&[f32]> = Vec::with_capacity(1 + hidden_in.len());
            feeds.push(input.tensor());
            feeds.extend(hidden_in.iter().map(TensorBuffer::as_slice));
            let mut sinks: Vec<&mut [f32]> = outputs.iter_mut().map(|b| b.zero_fill()).collect();
            self.runtime.execute(&feeds, &mut sinks)
        };

        let result = executed
            .map_err(|err| PipelineError::Runtime(format!("{err:#}")))
            .and_then(|()| self.decode(&outputs));
        release_into(&mut self.pool, hidden_in.into_iter().chain(outputs));
        result
    }

    fn fill_hidden_inputs(&mut self, prev: &RecurrentState) -> Result<Vec<TensorBuffer>> {
        let mut buffers = Vec::with_capacity(self.geometry.hidden_inputs.len());
        for (i, shape) in self.geometry.hidden_inputs.iter().enumerate() {
            let elements = shape.iter().product();
            let mut buffer = match self.pool.acquire(BufferRole::HiddenInput(i), elements) {
                Ok(buffer) => buffer,
                Err(err) => {
                    release_into(&mut self.pool, buffers);
                    return Err(err);
                }
            };
            match prev.tensors().get(i) {
                Some(tensor) => {
                    if tensor.shape() != shape.as_slice() {
                        tracing::warn!(
                            "Recurrent input {} has shape {:?}, model expects {:?}; {}",
                            i,
                            tensor.shape(),
                            shape,
                            reshape_action(tensor.len(), elements)
                        );
                    }
                    buffer.extend(tensor.iter().copied());
                    buffer.zero_pad();
                }
                None => {
                    if !prev.is_empty() {
                        tracing::warn!("Recurrent input {} missing from state; using zeros", i);
                    }
                    buffer.zero_fill();
                }
            }
            buffers.push(buffer);
        }
        Ok(buffers)
    }

    fn acquire_outputs(&mut self) -> Result<Vec<TensorBuffer>> {
        let mut wanted = vec![(BufferRole::PrimaryOutput, self.geometry.output_elements())];
        wanted.extend(
            self.geometry
                .hidden_outputs
                .iter()
                .enumerate()
                .map(|(i, shape)| (BufferRole::HiddenOutput(i), shape.iter().product())),
        );
        let mut buffers = Vec::with_capacity(wanted.len());
        for (role, elements) in wanted {
            match self.pool.acquire(role, elements) {
                Ok(buffer) => buffers.push(buffer),
                Err(err) => {
                    release_into(&mut self.pool, buffers);
                    return Err(err);
                }
            }
        }
        Ok(buffers)
    }

    fn decode(&self, outputs: &[TensorBuffer]) -> Result<InferenceOutput> {
        let _span = tracing::debug_span!("decode").entered();
        let (primary, hidden) = outputs
            .split_first()
            .ok_or_else(|| PipelineError::InvalidState("no output buffers".into()))?;

        let primary = Array3::from_shape_vec(
            (self.geometry.output_height, self.geometry.output_width, 3),
            primary.as_slice().to_vec(),
        )
        .map_err(|err| PipelineError::ModelContract(format!("primary output: {err}")))?;

        let tensors = hidden
            .iter()
            .zip(&self.geometry.hidden_outputs)
            .map(|(buffer, shape)| {
                ArrayD::from_shape_vec(IxDyn(shape), buffer.as_slice().to_vec())
                    .map_err(|err| {
                        PipelineError::ModelContract(format!("{}: {err}", buffer.role()))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(InferenceOutput {
            primary,
            next_state: RecurrentState::new(tensors),
        })
    }
}

/// How a carried recurrent tensor of `carried` elements is fitted into an
/// input of `expected` elements.
fn reshape_action(carried: usize, expected: usize) -> &'static str {
    match carried.cmp(&expected) {
        std::cmp::Ordering::Less => "padding with zeros",
        std::cmp::Ordering::Greater => "truncating",
        std::cmp::Ordering::Equal => "reinterpreting",
    }
}

fn release_into(pool: &mut TensorBufferPool, buffers: impl IntoIterator<Item = TensorBuffer>) {
    for buffer in buffers {
        pool.release(buffer);
    }
}
