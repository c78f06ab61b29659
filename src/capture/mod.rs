mod camera;
pub mod ffmpeg;
mod file;
mod reader;
mod screen;

pub use camera::CameraSource;
pub use file::{FileSource, FALLBACK_FPS};
pub use screen::ScreenSource;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use image::RgbImage;

use crate::segmentation::Orientation;

/// Outcome of one poll of a frame source.
#[derive(Debug)]
pub enum FramePoll {
    Frame(RgbImage),
    /// Nothing arrived within the timeout; poll again.
    Timeout,
    EndOfStream,
}

/// Anything that produces frames at its own cadence
pub trait FrameSource: Send {
    /// Wait at most `timeout` for the next frame.
    ///
    /// Errors that wrap a transient `PipelineError` cost one frame; any other
    /// error ends the session.
    fn next_frame(&mut self, timeout: Duration) -> Result<FramePoll>;

    /// Sensor orientation of the frames
    fn orientation(&self) -> Orientation;

    /// Natural frame rate, used to pace sources that are not live.
    fn frame_rate_hint(&self) -> Option<f32>;

    /// Live sources are paced by hardware and never slowed down.
    fn is_live(&self) -> bool;

    fn describe(&self) -> String;
}

/// Which frame source to open, as given on the command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSpec {
    Camera(u32),
    Screen(String),
    File(PathBuf),
}

impl FromStr for SourceSpec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (kind, arg) = match s.split_once(':') {
            Some((kind, arg)) => (kind, Some(arg)),
            None => (s, None),
        };
        match (kind, arg) {
            ("camera", None) => Ok(Self::Camera(0)),
            ("camera", Some(index)) => index
                .parse()
                .map(Self::Camera)
                .map_err(|_| format!("invalid camera index '{index}'")),
            ("screen", None) => Ok(Self::Screen(default_display())),
            ("screen", Some(display)) if !display.is_empty() => {
                Ok(Self::Screen(display.to_string()))
            }
            ("file", Some(path)) if !path.is_empty() => Ok(Self::File(PathBuf::from(path))),
            _ => Err(format!(
                "unknown source '{s}', expected camera[:<index>], screen[:<display>] or file:<path>"
            )),
        }
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Camera(index) => write!(f, "camera:{index}"),
            Self::Screen(display) => write!(f, "screen:{display}"),
            Self::File(path) => write!(f, "file:{}", path.display()),
        }
    }
}

fn default_display() -> String {
    std::env::var("DISPLAY").unwrap_or_else(|_| ":0.0".to_string())
}

/// Open the source described by `spec`.
///
/// `orientation` overrides what the source reports (cameras report none).
pub fn open_source(
    spec: &SourceSpec,
    orientation: Option<Orientation>,
) -> Result<Box<dyn FrameSource>> {
    let source: Box<dyn FrameSource> = match spec {
        SourceSpec::Camera(index) => {
            Box::new(CameraSource::open(*index, orientation.unwrap_or_default())?)
        }
        SourceSpec::Screen(display) => Box::new(ScreenSource::open(display)?),
        SourceSpec::File(path) => Box::new(FileSource::open(path)?),
    };
    match orientation {
        Some(orientation) if orientation != source.orientation() => {
            tracing::info!("Orientation override: {} degrees", orientation.degrees());
            Ok(Box::new(Oriented { inner: source, orientation }))
        }
        _ => Ok(source),
    }
}

/// Replaces the orientation a source reports.
struct Oriented {
    inner: Box<dyn FrameSource>,
    orientation: Orientation,
}

impl FrameSource for Oriented {
    fn next_frame(&mut self, timeout: Duration) -> Result<FramePoll> {
        self.inner.next_frame(timeout)
    }

    fn orientation(&self) -> Orientation {
        self.orientation
    }

    fn frame_rate_hint(&self) -> Option<f32> {
        self.inner.frame_rate_hint()
    }

    fn is_live(&self) -> bool {
        self.inner.is_live()
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}
