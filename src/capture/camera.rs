use std::thread;

use super::reader::{FrameReader, FrameSender};
use super::{FramePoll, FrameSource};
use crate::error::PipelineError;
use crate::segmentation::Orientation;
use anyhow::{anyhow, Context, Result};
use crossbeam_channel::bounded;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use std::time::Duration;

/// Live webcam. The camera lives on its own thread; frames arrive newest-first.
pub struct CameraSource {
    reader: FrameReader,
    device_index: u32,
    width: u32,
    height: u32,
    frame_rate: u32,
    orientation: Orientation,
}

impl CameraSource {
    pub fn open(device_index: u32, orientation: Orientation) -> Result<Self> {
        tracing::info!("Initializing webcam {}", device_index);

        let (sender, reader) = FrameReader::channel(true);
        let (init_tx, init_rx) = bounded(1);
        thread::Builder::new()
            .name(format!("camera-{device_index}"))
            .spawn(move || {
                let mut camera = match open_camera(device_index) {
                    Ok(camera) => camera,
                    Err(err) => {
                        let _ = init_tx.send(Err(err));
                        return;
                    }
                };
                let resolution = camera.resolution();
                let opened = (resolution.width(), resolution.height(), camera.frame_rate());
                let _ = init_tx.send(Ok(opened));
                capture_loop(&mut camera, &sender);
                if let Err(err) = camera.stop_stream() {
                    tracing::debug!("Camera stop_stream failed: {err}");
                }
            })
            .context("Failed to spawn camera thread")?;

        let (width, height, frame_rate) = init_rx
            .recv()
            .map_err(|_| anyhow!("Camera thread exited during initialisation"))??;

        tracing::info!(
            "Webcam initialized successfully at {}x{} @ {} fps",
            width,
            height,
            frame_rate
        );

        Ok(Self {
            reader,
            device_index,
            width,
            height,
            frame_rate,
            orientation,
        })
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

fn open_camera(device_index: u32) -> Result<Camera> {
    let index = CameraIndex::Index(device_index);
    let requested =
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution);

    let mut camera = Camera::new(index, requested).context("Failed to open camera")?;
    camera
        .open_stream()
        .context("Failed to open camera stream")?;
    Ok(camera)
}

fn capture_loop(camera: &mut Camera, sender: &FrameSender) {
    while !sender.is_stopped() {
        let buffer = match camera.frame() {
            Ok(buffer) => buffer,
            Err(err) => {
                sender.send(Err(anyhow!(PipelineError::Source(format!(
                    "camera capture failed: {err}"
                )))));
                return;
            }
        };
        let message = buffer
            .decode_image::<RgbFormat>()
            .map_err(|err| anyhow!(PipelineError::Frame(format!("failed to decode frame: {err}"))));
        if !sender.send(message) {
            return;
        }
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self, timeout: Duration) -> Result<FramePoll> {
        self.reader.poll(timeout)
    }

    fn orientation(&self) -> Orientation {
        self.orientation
    }

    fn frame_rate_hint(&self) -> Option<f32> {
        (self.frame_rate > 0).then_some(self.frame_rate as f32)
    }

    fn is_live(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("camera {} ({}x{})", self.device_index, self.width, self.height)
    }
}
