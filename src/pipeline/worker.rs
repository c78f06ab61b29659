use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use image::RgbImage;

use super::slot::HandoffSlot;
use super::PipelineEvent;
use crate::capture::{FramePoll, FrameSource};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::output::{DisplaySink, FrameTiming};
use crate::roi::RegionOfInterestController;
use crate::segmentation::{
    InferenceEngine, InputGeometry, Postprocessor, PreparedInput, Preprocessor, RecurrentState,
    TensorBuffer,
};

/// A prepared frame in flight between producer and inference.
pub(crate) struct Handoff {
    pub(crate) input: PreparedInput,
    pub(crate) producer_elapsed: Duration,
}

/// State shared by both loops of one session.
pub(crate) struct Shared {
    running: AtomicBool,
    pub(crate) slot: HandoffSlot<Handoff>,
    geometry: Mutex<InputGeometry>,
    latest_frame: Mutex<Option<Arc<RgbImage>>>,
    events: Sender<PipelineEvent>,
}

impl Shared {
    pub(crate) fn new(geometry: InputGeometry, events: Sender<PipelineEvent>) -> Self {
        Self {
            running: AtomicBool::new(true),
            slot: HandoffSlot::new(),
            geometry: Mutex::new(geometry),
            latest_frame: Mutex::new(None),
            events,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Clear the liveness flag; `true` if this call did it.
    pub(crate) fn halt(&self) -> bool {
        let was_running = self.running.swap(false, Ordering::AcqRel);
        self.slot.close();
        was_running
    }

    /// End the session from inside a loop, reporting why.
    pub(crate) fn finish(&self, event: PipelineEvent) {
        if self.halt() {
            self.emit(event);
            self.emit(PipelineEvent::Stopped);
        }
    }

    pub(crate) fn emit(&self, event: PipelineEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn geometry(&self) -> InputGeometry {
        *self.geometry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_geometry(&self, geometry: InputGeometry) {
        *self.geometry.lock().unwrap_or_else(PoisonError::into_inner) = geometry;
    }

    pub(crate) fn latest_frame(&self) -> Option<Arc<RgbImage>> {
        self.latest_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_latest_frame(&self, frame: Arc<RgbImage>) {
        *self.latest_frame.lock().unwrap_or_else(PoisonError::into_inner) = Some(frame);
    }
}

/// Owns the frame source and preprocessor; fills the hand-off slot.
pub(crate) struct Producer {
    pub(crate) source: Box<dyn FrameSource>,
    pub(crate) preprocessor: Preprocessor,
    pub(crate) shared: Arc<Shared>,
    pub(crate) roi: Arc<RegionOfInterestController>,
    pub(crate) recycled: Receiver<TensorBuffer>,
    pub(crate) config: PipelineConfig,
}

impl Producer {
    pub(crate) fn run(mut self) {
        let orientation = self.source.orientation();
        let interval = self.pacing_interval();
        let mut produced = 0u64;
        let mut displaced = 0u64;
        tracing::info!("Producer started on {}", self.source.describe());

        while self.shared.is_running() {
            for buffer in self.recycled.try_iter() {
                self.preprocessor.recycle(buffer);
            }

            let started = Instant::now();
            let frame = match self.source.next_frame(self.config.poll_timeout) {
                Ok(FramePoll::Frame(frame)) => frame,
                Ok(FramePoll::Timeout) => continue,
                Ok(FramePoll::EndOfStream) => {
                    tracing::info!("{} reached end of stream", self.source.describe());
                    self.shared.finish(PipelineEvent::SourceEnded);
                    break;
                }
                Err(err) if is_transient(&err) => {
                    tracing::warn!("Dropping frame: {err:#}");
                    continue;
                }
                Err(err) => {
                    tracing::error!("Frame source failed: {err:#}");
                    let err = PipelineError::Source(format!("{err:#}"));
                    self.shared.finish(PipelineEvent::Failed(err.to_string()));
                    break;
                }
            };
            if !self.shared.is_running() {
                break;
            }

            let frame = Arc::new(frame);
            self.shared.set_latest_frame(frame.clone());
            let (width, height) = frame.dimensions();
            self.roi.update_reference_size(width, height);
            let snapshot = self.roi.snapshot();
            self.preprocessor.set_geometry(self.shared.geometry());

            match self.preprocessor.prepare(frame, snapshot, orientation) {
                Ok(input) => {
                    let handoff = Handoff {
                        input,
                        producer_elapsed: started.elapsed(),
                    };
                    match self.shared.slot.offer(handoff) {
                        Ok(None) => {}
                        Ok(Some(stale)) => {
                            displaced += 1;
                            self.preprocessor.recycle(stale.input.into_buffer());
                        }
                        Err(refused) => {
                            self.preprocessor.recycle(refused.input.into_buffer());
                            break;
                        }
                    }
                    produced += 1;
                }
                Err(err) if err.is_transient() => {
                    tracing::warn!("Dropping frame: {err}");
                }
                Err(err) => {
                    tracing::error!("Preprocessing failed: {err}");
                    self.shared.finish(PipelineEvent::Failed(err.to_string()));
                    break;
                }
            }

            if let Some(interval) = interval {
                self.sleep_until(started + interval);
            }
        }

        tracing::info!(
            "Producer stopped after {} frames ({} superseded before inference)",
            produced,
            displaced
        );
    }

    fn pacing_interval(&self) -> Option<Duration> {
        if self.source.is_live() || !self.config.pace_file_sources {
            return None;
        }
        self.source
            .frame_rate_hint()
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .map(|fps| Duration::from_secs_f32(1.0 / fps))
    }

    /// Sleep in short steps so a stop request is seen promptly.
    fn sleep_until(&self, deadline: Instant) {
        const STEP: Duration = Duration::from_millis(10);
        while self.shared.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(STEP));
        }
    }
}

fn is_transient(err: &anyhow::Error) -> bool {
    err.downcast_ref::<PipelineError>()
        .is_some_and(PipelineError::is_transient)
}

/// Owns the engine and the sink; drains the hand-off slot.
pub(crate) struct InferenceWorker {
    pub(crate) engine: InferenceEngine,
    pub(crate) sink: Box<dyn DisplaySink>,
    pub(crate) shared: Arc<Shared>,
    pub(crate) alive: Arc<AtomicBool>,
    pub(crate) roi: Arc<RegionOfInterestController>,
    pub(crate) recycle: Sender<TensorBuffer>,
    pub(crate) config: PipelineConfig,
}

impl InferenceWorker {
    fn is_live(&self) -> bool {
        self.alive.load(Ordering::Acquire) && self.shared.is_running()
    }

    /// Loop until stopped or swapped out; hands the sink back for reuse.
    pub(crate) fn run(mut self) -> Box<dyn DisplaySink> {
        let mut state = RecurrentState::default();
        let mut consecutive_failures = 0u32;
        let mut presented = 0u64;
        tracing::info!("Inference started with {}", self.engine.name());

        while self.is_live() {
            let Some(handoff) = self.shared.slot.take(self.config.slot_wait) else {
                continue;
            };
            if !self.shared.is_running() {
                let _ = self.recycle.try_send(handoff.input.into_buffer());
                break;
            }
            if !self.alive.load(Ordering::Acquire) {
                // Swapped out: leave the frame for the next engine.
                if let Err(handoff) = self.shared.slot.restore(handoff) {
                    let _ = self.recycle.try_send(handoff.input.into_buffer());
                }
                break;
            }
            let Handoff {
                input,
                producer_elapsed,
            } = handoff;

            let started = Instant::now();
            let rendered = match self.engine.run(&input, &state) {
                Ok(output) => {
                    let _span = tracing::debug_span!("render").entered();
                    let crop_only = self.roi.is_crop_only();
                    let image = Postprocessor::render_for_display(&output, &input, crop_only);
                    state = output.next_state;
                    image
                }
                Err(err) => Err(err),
            };
            let timing = FrameTiming {
                producer: producer_elapsed,
                inference: started.elapsed(),
            };
            let original = input.original.clone();
            let _ = self.recycle.try_send(input.into_buffer());

            match rendered {
                Ok(image) => {
                    consecutive_failures = 0;
                    // A swap still presents the finished frame; a stop does not.
                    if !self.shared.is_running() {
                        break;
                    }
                    match self.sink.present(image, original, timing) {
                        Ok(()) => presented += 1,
                        Err(err) => {
                            let err = PipelineError::Display(format!("{err:#}"));
                            tracing::warn!("{err}");
                        }
                    }
                }
                Err(err @ PipelineError::Runtime(_)) => {
                    consecutive_failures += 1;
                    tracing::warn!(
                        "Dropping frame ({}/{} consecutive failures): {err}",
                        consecutive_failures,
                        self.config.max_consecutive_failures
                    );
                    if consecutive_failures >= self.config.max_consecutive_failures {
                        tracing::error!("Inference keeps failing, stopping session");
                        self.shared.finish(PipelineEvent::Failed(err.to_string()));
                        break;
                    }
                }
                Err(err) if err.is_transient() => {
                    tracing::warn!("Dropping frame: {err}");
                }
                Err(err) => {
                    tracing::error!("Inference failed: {err}");
                    self.shared.finish(PipelineEvent::Failed(err.to_string()));
                    break;
                }
            }
        }

        tracing::info!("Inference stopped after {} presented frames", presented);
        self.sink
    }
}
