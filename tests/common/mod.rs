#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use image::{Rgb, RgbImage};
use segstream::capture::{FramePoll, FrameSource};
use segstream::config::{PipelineConfig, RoiConfig};
use segstream::output::{DisplaySink, FnSink, FrameTiming};
use segstream::roi::{MemoryStore, RegionOfInterestController};
use segstream::segmentation::{InferenceEngine, InferenceRuntime, Orientation, TensorSpec};
use segstream::Pipeline;

/// Frames pushed by the test through a channel. Dropping the sender ends
/// the stream.
pub struct ScriptedSource {
    frames: Receiver<RgbImage>,
    /// Simulated decode time spent inside every poll.
    decode_time: Duration,
}

impl ScriptedSource {
    pub fn new() -> (Sender<RgbImage>, Self) {
        let (tx, rx) = unbounded();
        (
            tx,
            Self {
                frames: rx,
                decode_time: Duration::ZERO,
            },
        )
    }

    pub fn with_decode_time(mut self, decode_time: Duration) -> Self {
        self.decode_time = decode_time;
        self
    }
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self, timeout: Duration) -> anyhow::Result<FramePoll> {
        if !self.decode_time.is_zero() {
            thread::sleep(self.decode_time.min(timeout));
        }
        match self.frames.recv_timeout(timeout) {
            Ok(frame) => Ok(FramePoll::Frame(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(FramePoll::Timeout),
            Err(RecvTimeoutError::Disconnected) => Ok(FramePoll::EndOfStream),
        }
    }

    fn orientation(&self) -> Orientation {
        Orientation::Deg0
    }

    fn frame_rate_hint(&self) -> Option<f32> {
        None
    }

    fn is_live(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// One `execute` call as seen by a [`FakeRuntime`].
#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    pub model: &'static str,
    /// Element count of every recurrent input.
    pub hidden_lens: Vec<usize>,
    /// First element of every recurrent input; counts prior calls since cold start.
    pub hidden_first: Vec<f32>,
}

/// Echoes the first input sample into the primary output and adds one to
/// every recurrent tensor, recording each call.
pub struct FakeRuntime {
    model: &'static str,
    inputs: Vec<TensorSpec>,
    outputs: Vec<TensorSpec>,
    calls: Arc<Mutex<Vec<Call>>>,
    delay: Duration,
    fail: bool,
}

impl FakeRuntime {
    pub fn new(model: &'static str, side: usize, hidden: &[&[usize]]) -> Self {
        let mut inputs = vec![TensorSpec::new("src", vec![1, 2, side, side])];
        let mut outputs = vec![TensorSpec::new("fgr", vec![1, side, side, 3])];
        for (i, shape) in hidden.iter().enumerate() {
            inputs.push(TensorSpec::new(format!("r{}i", i + 1), shape.to_vec()));
            outputs.push(TensorSpec::new(format!("r{}o", i + 1), shape.to_vec()));
        }
        Self {
            model,
            inputs,
            outputs,
            calls: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::ZERO,
            fail: false,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<Call>>> {
        self.calls.clone()
    }

    pub fn into_engine(self) -> InferenceEngine {
        InferenceEngine::new(Box::new(self)).unwrap()
    }
}

impl InferenceRuntime for FakeRuntime {
    fn inputs(&self) -> &[TensorSpec] {
        &self.inputs
    }

    fn outputs(&self) -> &[TensorSpec] {
        &self.outputs
    }

    fn execute(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]]) -> anyhow::Result<()> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.calls.lock().unwrap().push(Call {
            model: self.model,
            hidden_lens: inputs[1..].iter().map(|t| t.len()).collect(),
            hidden_first: inputs[1..].iter().map(|t| t[0]).collect(),
        });
        if self.fail {
            anyhow::bail!("execution provider lost");
        }
        let first = inputs[0][0];
        outputs[0].iter_mut().for_each(|v| *v = first);
        for (out, input) in outputs[1..].iter_mut().zip(&inputs[1..]) {
            for (o, i) in out.iter_mut().zip(input.iter()) {
                *o = i + 1.0;
            }
        }
        Ok(())
    }

    fn name(&self) -> String {
        format!("fake-{}", self.model)
    }
}

/// What the sink saw for one presentation.
#[derive(Clone, Debug)]
pub struct Presented {
    pub width: u32,
    pub height: u32,
    pub value: u8,
    pub timing: FrameTiming,
}

pub fn collecting_sink() -> (Box<dyn DisplaySink>, Receiver<Presented>) {
    let (tx, rx) = unbounded();
    let sink = FnSink::new(move |image: RgbImage, _original: Option<Arc<RgbImage>>, timing| {
        let value = image.get_pixel(image.width() / 2, image.height() / 2)[0];
        let _ = tx.send(Presented {
            width: image.width(),
            height: image.height(),
            value,
            timing,
        });
        Ok(())
    });
    (Box::new(sink), rx)
}

pub fn uniform_frame(width: u32, height: u32, value: u8) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([value, value, value]))
}

pub fn controller() -> Arc<RegionOfInterestController> {
    Arc::new(RegionOfInterestController::new(
        RoiConfig::default(),
        Box::new(MemoryStore::new()),
    ))
}

pub fn pipeline() -> Pipeline {
    let config = PipelineConfig {
        poll_timeout: Duration::from_millis(20),
        slot_wait: Duration::from_millis(20),
        ..PipelineConfig::default()
    };
    Pipeline::new(config, controller())
}

pub const WAIT: Duration = Duration::from_secs(5);
