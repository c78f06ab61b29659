use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use super::ffmpeg;
use super::reader::FrameReader;
use super::{FramePoll, FrameSource};
use crate::segmentation::Orientation;

/// Frame rate assumed when the container does not report one.
pub const FALLBACK_FPS: f32 = 10.0;

/// Decoded video file. Frames come at decode speed; the pipeline paces them.
pub struct FileSource {
    reader: FrameReader,
    path: PathBuf,
    info: ffmpeg::StreamInfo,
}

impl FileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let input = path.to_string_lossy();
        tracing::info!("Opening video file {}", path.display());

        let info = ffmpeg::probe(&[], &input)
            .with_context(|| format!("Failed to probe {}", path.display()))?;
        // Rotation is applied by the pipeline, so decode at coded size.
        let command = ffmpeg::rawvideo_command(&["-noautorotate"], &input);
        let reader =
            FrameReader::spawn_rawvideo(command, info.width, info.height, false, "file-decode")?;

        tracing::info!(
            "Video {}x{}, {:.2} fps, rotation {}",
            info.width,
            info.height,
            info.frame_rate.unwrap_or(FALLBACK_FPS),
            info.orientation.degrees()
        );
        Ok(Self {
            reader,
            path: path.to_path_buf(),
            info,
        })
    }
}

impl FrameSource for FileSource {
    fn next_frame(&mut self, timeout: Duration) -> Result<FramePoll> {
        self.reader.poll(timeout)
    }

    fn orientation(&self) -> Orientation {
        self.info.orientation
    }

    fn frame_rate_hint(&self) -> Option<f32> {
        Some(self.info.frame_rate.unwrap_or(FALLBACK_FPS))
    }

    fn is_live(&self) -> bool {
        false
    }

    fn describe(&self) -> String {
        format!(
            "file {} ({}x{})",
            self.path.display(),
            self.info.width,
            self.info.height
        )
    }
}
