use std::sync::Arc;

use image::RgbImage;
use ndarray::{Array3, ArrayD};

use super::buffer_pool::TensorBuffer;
use crate::error::{PipelineError, Result};
use crate::roi::OriginalRect;

/// Sensor orientation of a frame source, in clockwise degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Orientation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Orientation {
    /// Normalise arbitrary degrees (negative, >360) onto the nearest quarter turn.
    pub fn from_degrees(degrees: i32) -> Self {
        let quarter = ((degrees as f32 / 90.0).round() as i32).rem_euclid(4);
        match quarter {
            1 => Self::Deg90,
            2 => Self::Deg180,
            3 => Self::Deg270,
            _ => Self::Deg0,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /// Quarter turns exchange width and height.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }
}

/// Name and dense shape of one model tensor (dynamic dimensions resolved to 1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Vec<usize>,
}

impl TensorSpec {
    pub fn new(name: impl Into<String>, shape: impl Into<Vec<usize>>) -> Self {
        Self {
            name: name.into(),
            shape: shape.into(),
        }
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}

/// What the producer needs to know about the primary input tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputGeometry {
    pub width: u32,
    pub height: u32,
    /// Total f32 elements of the primary input tensor.
    pub elements: usize,
}

impl InputGeometry {
    pub fn frame_elements(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// How many copies of a single frame fill the primary input tensor.
    pub fn frame_repeat(&self) -> usize {
        match self.frame_elements() {
            0 => 0,
            n => self.elements / n,
        }
    }
}

/// Tensor layout of a segmentation model, derived once at load time.
///
/// Contract: input 0 is `[1, .., H, W]` (the trailing window/channel slots
/// are filled with copies of one frame), output 0 ends in `[H, W, 3]`, and
/// every further input/output is a recurrent tensor in matching order.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelGeometry {
    pub input: InputGeometry,
    pub output_height: usize,
    pub output_width: usize,
    pub hidden_inputs: Vec<Vec<usize>>,
    pub hidden_outputs: Vec<Vec<usize>>,
}

impl ModelGeometry {
    pub fn from_specs(inputs: &[TensorSpec], outputs: &[TensorSpec]) -> Result<Self> {
        let primary_in = inputs
            .first()
            .ok_or_else(|| PipelineError::ModelContract("model has no inputs".into()))?;
        let shape = &primary_in.shape;
        if shape.len() < 3 || shape[0] != 1 {
            return Err(PipelineError::ModelContract(format!(
                "expected input {} with batch=1 and >=3 dims, got {:?}",
                primary_in.name, shape
            )));
        }
        let height = shape[shape.len() - 2];
        let width = shape[shape.len() - 1];
        if height == 0 || width == 0 {
            return Err(PipelineError::ModelContract(format!(
                "input {} has an empty frame plane {:?}",
                primary_in.name, shape
            )));
        }

        let primary_out = outputs
            .first()
            .ok_or_else(|| PipelineError::ModelContract("model has no outputs".into()))?;
        let out_shape = &primary_out.shape;
        if out_shape.len() < 3 || out_shape[out_shape.len() - 1] != 3 {
            return Err(PipelineError::ModelContract(format!(
                "expected output {} shaped [.., H, W, 3], got {:?}",
                primary_out.name, out_shape
            )));
        }

        Ok(Self {
            input: InputGeometry {
                width: width as u32,
                height: height as u32,
                elements: primary_in.element_count(),
            },
            output_height: out_shape[out_shape.len() - 3],
            output_width: out_shape[out_shape.len() - 2],
            hidden_inputs: inputs[1..].iter().map(|s| s.shape.clone()).collect(),
            hidden_outputs: outputs[1..].iter().map(|s| s.shape.clone()).collect(),
        })
    }

    pub fn output_elements(&self) -> usize {
        self.output_height * self.output_width * 3
    }
}

/// Recurrent tensors carried from one inference call into the next.
///
/// Replaced wholesale after every successful call; never edited in place.
#[derive(Clone, Debug, Default)]
pub struct RecurrentState {
    tensors: Vec<ArrayD<f32>>,
}

impl RecurrentState {
    pub fn new(tensors: Vec<ArrayD<f32>>) -> Self {
        Self { tensors }
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn tensors(&self) -> &[ArrayD<f32>] {
        &self.tensors
    }

    pub fn shapes(&self) -> Vec<Vec<usize>> {
        self.tensors.iter().map(|t| t.shape().to_vec()).collect()
    }

    pub fn clear(&mut self) {
        self.tensors.clear();
    }
}

/// A frame turned into a primary input tensor, plus what is needed to map
/// the result back onto the display.
#[derive(Debug)]
pub struct PreparedInput {
    pub(crate) tensor: TensorBuffer,
    /// Dimensions of the (possibly cropped) image that was converted.
    pub view_width: u32,
    pub view_height: u32,
    pub orientation: Orientation,
    pub original: Option<Arc<RgbImage>>,
    /// Crop in original-frame pixels, `None` when the whole frame was used.
    pub crop: Option<OriginalRect>,
}

impl PreparedInput {
    pub fn tensor(&self) -> &[f32] {
        self.tensor.as_slice()
    }

    /// Hand the tensor storage back so it can return to its pool.
    pub fn into_buffer(self) -> TensorBuffer {
        self.tensor
    }
}

/// Result of one inference call.
#[derive(Clone, Debug)]
pub struct InferenceOutput {
    /// Primary output as `[H, W, 3]` floats in the model's colour order (BGR).
    pub primary: Array3<f32>,
    pub next_state: RecurrentState,
}
