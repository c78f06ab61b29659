use std::sync::Arc;

use image::{imageops, GrayImage, RgbImage};

use super::buffer_pool::{BufferRole, TensorBuffer, TensorBufferPool};
use super::types::{InputGeometry, Orientation, PreparedInput};
use crate::error::{PipelineError, Result};
use crate::roi::RoiSnapshot;

/// Converts frames into primary input tensors for the active model.
///
/// Owns the pool for `BufferRole::PrimaryInput` only; inference keeps its own
/// pool, so the two stages never touch each other's entries.
pub struct Preprocessor {
    geometry: InputGeometry,
    pool: TensorBufferPool,
}

impl Preprocessor {
    pub fn new(geometry: InputGeometry) -> Self {
        Self {
            geometry,
            pool: TensorBufferPool::new(),
        }
    }

    pub fn geometry(&self) -> InputGeometry {
        self.geometry
    }

    /// Retarget to a new model input. The next `prepare` reallocates if the
    /// element count changed.
    pub fn set_geometry(&mut self, geometry: InputGeometry) {
        if geometry != self.geometry {
            tracing::debug!(
                "Preprocessor retargeted to {}x{} ({} elements)",
                geometry.width,
                geometry.height,
                geometry.elements
            );
            self.geometry = geometry;
        }
    }

    /// Give a consumed input buffer back for reuse.
    pub fn recycle(&mut self, buffer: TensorBuffer) {
        if buffer.role() == BufferRole::PrimaryInput {
            self.pool.release(buffer);
        }
    }

    pub fn pool(&self) -> &TensorBufferPool {
        &self.pool
    }

    /// Crop, convert to intensity, resize, rotate and pack `frame`.
    ///
    /// The single frame is repeated across every window slot of the primary
    /// input tensor. `frame` is never modified.
    pub fn prepare(
        &mut self,
        frame: Arc<RgbImage>,
        roi: Option<RoiSnapshot>,
        orientation: Orientation,
    ) -> Result<PreparedInput> {
        let _span = tracing::debug_span!("preprocess").entered();

        let (frame_w, frame_h) = frame.dimensions();
        if frame_w == 0 || frame_h == 0 {
            return Err(PipelineError::Frame("empty frame".into()));
        }
        let geometry = self.geometry;
        if geometry.frame_repeat() == 0 {
            return Err(PipelineError::Frame(format!(
                "input tensor of {} elements cannot hold a {}x{} plane",
                geometry.elements, geometry.width, geometry.height
            )));
        }

        let crop = roi.and_then(|snapshot| snapshot.crop_for(frame_w, frame_h));
        let gray = match crop {
            Some(rect) => {
                let region =
                    imageops::crop_imm(&*frame, rect.left, rect.top, rect.width(), rect.height())
                        .to_image();
                imageops::grayscale(&region)
            }
            None => imageops::grayscale(&*frame),
        };
        let (view_width, view_height) = gray.dimensions();

        let plane = orient(resize_for(gray, geometry, orientation), orientation);
        debug_assert_eq!(plane.dimensions(), (geometry.width, geometry.height));

        let mut tensor = self.pool.acquire(BufferRole::PrimaryInput, geometry.elements)?;
        // Whole copies of the plane, then a partial copy for any remainder.
        tensor.extend(plane.as_raw().iter().map(|&v| f32::from(v)).cycle());

        Ok(PreparedInput {
            tensor,
            view_width,
            view_height,
            orientation,
            original: Some(frame),
            crop,
        })
    }
}

/// Bilinear resize to the pre-rotation size of the model plane.
fn resize_for(gray: GrayImage, geometry: InputGeometry, orientation: Orientation) -> GrayImage {
    let (w, h) = if orientation.swaps_axes() {
        (geometry.height, geometry.width)
    } else {
        (geometry.width, geometry.height)
    };
    if gray.dimensions() == (w, h) {
        gray
    } else {
        imageops::resize(&gray, w, h, imageops::FilterType::Triangle)
    }
}

/// Undo the sensor rotation so the model sees an upright image.
fn orient(plane: GrayImage, orientation: Orientation) -> GrayImage {
    match orientation {
        Orientation::Deg0 => plane,
        Orientation::Deg90 => imageops::rotate270(&plane),
        Orientation::Deg180 => imageops::rotate180(&plane),
        Orientation::Deg270 => imageops::rotate90(&plane),
    }
}
