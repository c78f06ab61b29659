use super::{DisplaySink, FrameTiming};
use anyhow::{Context, Result};
use image::RgbImage;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use v4l::video::Output;
use v4l::{Device, FourCC};

/// Writes frames to a v4l2loopback device as YUYV.
pub struct V4L2Output {
    _device: Device,
    file: File,
    width: u32,
    height: u32,
    yuyv: Vec<u8>,
    show_original: Arc<AtomicBool>,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        let device = Device::with_path(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;
        let mut format = Output::format(&device).context("Failed to query output format")?;
        format.width = width;
        format.height = height;
        format.fourcc = FourCC::new(b"YUYV");
        let applied = Output::set_format(&device, &format).context("Failed to set output format")?;
        if applied.width != width || applied.height != height {
            tracing::warn!(
                "Device accepted {}x{} instead of {}x{}",
                applied.width,
                applied.height,
                width,
                height
            );
        }

        // v4l2loopback takes raw frames written to the device node.
        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open {} for writing", path.display()))?;

        tracing::info!("v4l2loopback device opened successfully");

        Ok(Self {
            _device: device,
            file,
            width: applied.width,
            height: applied.height,
            yuyv: Vec::with_capacity((applied.width * applied.height * 2) as usize),
            show_original: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Switch that makes the device show the unsegmented source frame.
    /// Stays usable after the output is handed to a pipeline.
    pub fn show_original_switch(&self) -> Arc<AtomicBool> {
        self.show_original.clone()
    }
}

fn displayed(image: RgbImage, original: Option<Arc<RgbImage>>, show_original: bool) -> RgbImage {
    match original {
        Some(original) if show_original => Arc::unwrap_or_clone(original),
        _ => image,
    }
}

/// Pack RGB into YUV 4:2:2 (Y0 U Y1 V), chroma averaged per pixel pair.
fn rgb_to_yuyv(rgb_image: &RgbImage, yuyv: &mut Vec<u8>) {
    let (width, height) = rgb_image.dimensions();
    yuyv.clear();

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let pixel1 = rgb_image.get_pixel(x, y);
            let pixel2 = if x + 1 < width {
                rgb_image.get_pixel(x + 1, y)
            } else {
                pixel1
            };

            let (y1, u1, v1) = rgb_to_yuv(pixel1[0], pixel1[1], pixel1[2]);
            let (y2, u2, v2) = rgb_to_yuv(pixel2[0], pixel2[1], pixel2[2]);
            let u = ((u1 as u16 + u2 as u16) / 2) as u8;
            let v = ((v1 as u16 + v2 as u16) / 2) as u8;

            yuyv.extend_from_slice(&[y1, u, y2, v]);
        }
    }
}

fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let r = r as f32;
    let g = g as f32;
    let b = b as f32;

    let y = (0.299 * r + 0.587 * g + 0.114 * b).clamp(0.0, 255.0) as u8;
    let u = ((-0.147 * r - 0.289 * g + 0.436 * b) + 128.0).clamp(0.0, 255.0) as u8;
    let v = ((0.615 * r - 0.515 * g - 0.100 * b) + 128.0).clamp(0.0, 255.0) as u8;

    (y, u, v)
}

impl DisplaySink for V4L2Output {
    fn present(
        &mut self,
        image: RgbImage,
        original: Option<Arc<RgbImage>>,
        _timing: FrameTiming,
    ) -> Result<()> {
        let image = displayed(image, original, self.show_original.load(Ordering::Relaxed));
        let frame = if image.dimensions() != (self.width, self.height) {
            image::imageops::resize(
                &image,
                self.width,
                self.height,
                image::imageops::FilterType::Triangle,
            )
        } else {
            image
        };

        rgb_to_yuyv(&frame, &mut self.yuyv);
        self.file
            .write_all(&self.yuyv)
            .context("Failed to write frame to v4l2loopback device")?;

        Ok(())
    }
}
