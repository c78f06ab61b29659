use image::{imageops, ImageBuffer, Rgb, RgbImage};

use super::types::{InferenceOutput, Orientation, PreparedInput};
use crate::error::{PipelineError, Result};
use crate::roi::OriginalRect;

/// Float image normalised to `0..=1`, the range `image` assumes for `f32`
/// samples; resampling clamps anything outside it.
type FloatImage = ImageBuffer<Rgb<f32>, Vec<f32>>;

const CHANNEL_MAX: f32 = 255.0;

/// Turns model output back into displayable frames.
pub struct Postprocessor;

impl Postprocessor {
    /// Rotate the primary output back to sensor orientation, resize it to
    /// `target_w` x `target_h` and saturate to 8-bit RGB.
    ///
    /// The model emits BGR floats in `0..=255`.
    pub fn render(
        output: &InferenceOutput,
        target_w: u32,
        target_h: u32,
        orientation: Orientation,
    ) -> Result<RgbImage> {
        let _span = tracing::debug_span!("postprocess").entered();

        if target_w == 0 || target_h == 0 {
            return Err(PipelineError::Frame(format!(
                "cannot render into {target_w}x{target_h}"
            )));
        }
        let (h, w, _) = output.primary.dim();
        let raw: Vec<f32> = output.primary.iter().map(|v| v / CHANNEL_MAX).collect();
        let model_image = FloatImage::from_raw(w as u32, h as u32, raw).ok_or_else(|| {
            PipelineError::ModelContract(format!("primary output {w}x{h} is not a packed image"))
        })?;

        let upright = match orientation {
            Orientation::Deg0 => model_image,
            Orientation::Deg90 => imageops::rotate90(&model_image),
            Orientation::Deg180 => imageops::rotate180(&model_image),
            Orientation::Deg270 => imageops::rotate270(&model_image),
        };
        let sized = if upright.dimensions() == (target_w, target_h) {
            upright
        } else {
            imageops::resize(&upright, target_w, target_h, imageops::FilterType::Triangle)
        };

        Ok(RgbImage::from_fn(target_w, target_h, |x, y| {
            let [b, g, r] = sized.get_pixel(x, y).0;
            Rgb([saturate(r), saturate(g), saturate(b)])
        }))
    }

    /// Paste `segmented` onto a copy of `original` at the crop origin.
    pub fn compose(original: &RgbImage, segmented: &RgbImage, crop: OriginalRect) -> RgbImage {
        let mut canvas = original.clone();
        imageops::replace(&mut canvas, segmented, i64::from(crop.left), i64::from(crop.top));
        canvas
    }

    /// Render for the display: composited onto the original frame when a crop
    /// was used, the crop alone when `crop_only` is set.
    pub fn render_for_display(
        output: &InferenceOutput,
        input: &PreparedInput,
        crop_only: bool,
    ) -> Result<RgbImage> {
        let segmented =
            Self::render(output, input.view_width, input.view_height, input.orientation)?;
        match (input.crop, input.original.as_deref()) {
            (Some(crop), Some(original)) if !crop_only => {
                let _span = tracing::debug_span!("compose").entered();
                Ok(Self::compose(original, &segmented, crop))
            }
            _ => Ok(segmented),
        }
    }
}

/// Scale a normalised sample back to 8 bits.
fn saturate(value: f32) -> u8 {
    (value * CHANNEL_MAX).round().clamp(0.0, CHANNEL_MAX) as u8
}
