mod loopback;
mod stats;

pub use loopback::V4L2Output;
pub use stats::TimingLog;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use image::RgbImage;

/// Per-frame stage timings handed to the display alongside the image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameTiming {
    /// Frame acquisition plus preprocessing.
    pub producer: Duration,
    /// Inference plus postprocessing.
    pub inference: Duration,
}

/// Destination for segmented frames
pub trait DisplaySink: Send {
    /// Present one frame. Called at most once per completed inference.
    fn present(
        &mut self,
        image: RgbImage,
        original: Option<Arc<RgbImage>>,
        timing: FrameTiming,
    ) -> Result<()>;
}

impl<S: DisplaySink + ?Sized> DisplaySink for Box<S> {
    fn present(
        &mut self,
        image: RgbImage,
        original: Option<Arc<RgbImage>>,
        timing: FrameTiming,
    ) -> Result<()> {
        (**self).present(image, original, timing)
    }
}

/// Sink backed by a closure.
pub struct FnSink<F>(F);

impl<F> FnSink<F>
where
    F: FnMut(RgbImage, Option<Arc<RgbImage>>, FrameTiming) -> Result<()> + Send,
{
    pub fn new(present: F) -> Self {
        Self(present)
    }
}

impl<F> DisplaySink for FnSink<F>
where
    F: FnMut(RgbImage, Option<Arc<RgbImage>>, FrameTiming) -> Result<()> + Send,
{
    fn present(
        &mut self,
        image: RgbImage,
        original: Option<Arc<RgbImage>>,
        timing: FrameTiming,
    ) -> Result<()> {
        (self.0)(image, original, timing)
    }
}
