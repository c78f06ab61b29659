//! ffmpeg/ffprobe command lines shared by the screen and file sources.

use std::collections::HashMap;
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::segmentation::Orientation;

/// Stream properties reported by ffprobe.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub frame_rate: Option<f32>,
    pub orientation: Orientation,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    side_data_list: Vec<SideData>,
}

#[derive(Debug, Deserialize)]
struct SideData {
    rotation: Option<f64>,
}

/// Probe the first video stream of `input`, with optional input options
/// (e.g. `-f x11grab`) placed before `-i`.
pub fn probe(input_options: &[&str], input: &str) -> Result<StreamInfo> {
    let output = Command::new("ffprobe")
        .args(["-v", "error", "-select_streams", "v:0"])
        .args([
            "-show_entries",
            "stream=width,height,avg_frame_rate:stream_tags=rotate:stream_side_data=rotation",
            "-of",
            "json",
        ])
        .args(input_options)
        .arg("-i")
        .arg(input)
        .stdin(Stdio::null())
        .output()
        .context("Failed to run ffprobe")?;
    if !output.status.success() {
        bail!(
            "ffprobe failed on {}: {}",
            input,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    let text = String::from_utf8_lossy(&output.stdout);
    parse_probe(&text).with_context(|| format!("Unexpected ffprobe output for {input}"))
}

fn parse_probe(json: &str) -> Result<StreamInfo> {
    let parsed: ProbeOutput = serde_json::from_str(json)?;
    let Some(stream) = parsed.streams.into_iter().next() else {
        bail!("no video stream");
    };
    let (Some(width), Some(height)) = (stream.width, stream.height) else {
        bail!("video stream has no dimensions");
    };
    if width == 0 || height == 0 {
        bail!("video stream is {width}x{height}");
    }

    // The rotate tag is clockwise; display-matrix side data is counter-clockwise.
    let degrees = stream
        .tags
        .get("rotate")
        .and_then(|r| r.trim().parse::<i32>().ok())
        .or_else(|| {
            stream
                .side_data_list
                .iter()
                .find_map(|s| s.rotation)
                .map(|r| -(r.round() as i32))
        })
        .unwrap_or(0);

    Ok(StreamInfo {
        width,
        height,
        frame_rate: stream.avg_frame_rate.as_deref().and_then(parse_frame_rate),
        orientation: Orientation::from_degrees(degrees),
    })
}

/// Parse ffprobe's `num/den` rate. `None` for `0/0` and other non-rates.
pub fn parse_frame_rate(rate: &str) -> Option<f32> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f32 = num.trim().parse().ok()?;
            let den: f32 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

/// `ffmpeg` invocation emitting packed rgb24 frames on stdout.
pub fn rawvideo_command(input_options: &[&str], input: &str) -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin"])
        .args(input_options)
        .arg("-i")
        .arg(input)
        .args(["-an", "-pix_fmt", "rgb24", "-f", "rawvideo", "-"]);
    cmd
}
