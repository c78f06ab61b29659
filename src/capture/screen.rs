use std::time::Duration;

use anyhow::{Context, Result};

use super::ffmpeg;
use super::reader::FrameReader;
use super::{FramePoll, FrameSource};
use crate::segmentation::Orientation;

const CAPTURE_FPS: &str = "30";

/// X11 screen capture through `ffmpeg -f x11grab`.
pub struct ScreenSource {
    reader: FrameReader,
    display: String,
    width: u32,
    height: u32,
}

impl ScreenSource {
    pub fn open(display_name: &str) -> Result<Self> {
        tracing::info!("Opening screen capture on {}", display_name);
        let options = ["-f", "x11grab", "-framerate", CAPTURE_FPS];

        let info = ffmpeg::probe(&options, display_name)
            .with_context(|| format!("Failed to probe display {display_name}"))?;
        let command = ffmpeg::rawvideo_command(&options, display_name);
        let reader =
            FrameReader::spawn_rawvideo(command, info.width, info.height, true, "screen")?;

        tracing::info!("Screen capture running at {}x{}", info.width, info.height);
        Ok(Self {
            reader,
            display: display_name.to_string(),
            width: info.width,
            height: info.height,
        })
    }
}

impl FrameSource for ScreenSource {
    fn next_frame(&mut self, timeout: Duration) -> Result<FramePoll> {
        self.reader.poll(timeout)
    }

    fn orientation(&self) -> Orientation {
        Orientation::Deg0
    }

    fn frame_rate_hint(&self) -> Option<f32> {
        CAPTURE_FPS.parse().ok()
    }

    fn is_live(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("screen {} ({}x{})", self.display, self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_the_display_it_captures() {
        let (_sender, reader) = FrameReader::channel(true);
        let source = ScreenSource {
            reader,
            display: ":1".to_string(),
            width: 1920,
            height: 1080,
        };
        assert_eq!(source.describe(), "screen :1 (1920x1080)");
        assert!(source.is_live());
        assert_eq!(source.frame_rate_hint(), Some(30.0));
    }

    #[test]
    fn open_failure_names_the_display() {
        let Err(err) = ScreenSource::open(":segstream-missing") else {
            panic!("opened a display that does not exist");
        };
        assert!(format!("{err:#}").contains("Failed to probe display :segstream-missing"));
    }
}
