//! Producer → single-slot hand-off → inference, with model hot-swap.
//!
//! One producer thread owns the frame source and the preprocessor. One
//! inference thread owns the engine, the recurrent state and the display
//! sink. They meet only at a [`HandoffSlot`], so at most one prepared frame
//! waits for inference at any time.

pub mod slot;
mod worker;

pub use slot::HandoffSlot;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use image::RgbImage;

use crate::capture::FrameSource;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::output::DisplaySink;
use crate::roi::RegionOfInterestController;
use crate::segmentation::{InferenceEngine, Preprocessor, TensorBuffer};
use worker::{InferenceWorker, Producer, Shared};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    Starting,
    Running,
    Swapping,
    Stopping,
}

/// Upward notifications from a running session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineEvent {
    Started,
    ModelSwapped,
    /// The source ran out of frames; followed by `Stopped`.
    SourceEnded,
    /// The session hit a terminal error; followed by `Stopped`.
    Failed(String),
    Stopped,
}

struct InferenceThread {
    alive: Arc<AtomicBool>,
    handle: JoinHandle<Box<dyn DisplaySink>>,
}

struct Session {
    shared: Arc<Shared>,
    recycle: Sender<TensorBuffer>,
    producer: JoinHandle<()>,
    inference: InferenceThread,
}

pub struct Pipeline {
    config: PipelineConfig,
    roi: Arc<RegionOfInterestController>,
    state: PipelineState,
    session: Option<Session>,
    events_tx: Sender<PipelineEvent>,
    events_rx: Receiver<PipelineEvent>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, roi: Arc<RegionOfInterestController>) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            config,
            roi,
            state: PipelineState::Stopped,
            session: None,
            events_tx,
            events_rx,
        }
    }

    pub fn roi(&self) -> Arc<RegionOfInterestController> {
        self.roi.clone()
    }

    pub fn events(&self) -> Receiver<PipelineEvent> {
        self.events_rx.clone()
    }

    /// Current state. A session that ended on its own reads as `Stopped`.
    pub fn state(&self) -> PipelineState {
        match (&self.session, self.state) {
            (Some(session), PipelineState::Running | PipelineState::Swapping)
                if !session.shared.is_running() =>
            {
                PipelineState::Stopped
            }
            (_, state) => state,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == PipelineState::Running
    }

    /// Most recent raw frame from the source, if any.
    pub fn latest_frame(&self) -> Option<Arc<RgbImage>> {
        self.session.as_ref().and_then(|s| s.shared.latest_frame())
    }

    /// Begin a session: fresh recurrent state, fresh ROI session, one
    /// producer and one inference thread.
    pub fn start(
        &mut self,
        source: Box<dyn FrameSource>,
        engine: InferenceEngine,
        sink: Box<dyn DisplaySink>,
    ) -> Result<()> {
        self.reap_finished();
        if self.session.is_some() {
            return Err(PipelineError::InvalidState(format!(
                "cannot start while {:?}",
                self.state()
            )));
        }
        self.state = PipelineState::Starting;
        tracing::info!("Starting pipeline: {} with {}", source.describe(), engine.name());

        self.roi.reset();
        let geometry = engine.input_geometry();
        let shared = Arc::new(Shared::new(geometry, self.events_tx.clone()));
        let (recycle_tx, recycle_rx) = bounded(4);
        shared.emit(PipelineEvent::Started);

        let producer = Producer {
            source,
            preprocessor: Preprocessor::new(geometry),
            shared: shared.clone(),
            roi: self.roi.clone(),
            recycled: recycle_rx,
            config: self.config.clone(),
        };
        let producer = match thread::Builder::new()
            .name("producer".to_string())
            .spawn(move || producer.run())
        {
            Ok(handle) => handle,
            Err(err) => {
                let err = PipelineError::InvalidState(format!("failed to spawn producer: {err}"));
                shared.finish(PipelineEvent::Failed(err.to_string()));
                self.state = PipelineState::Stopped;
                return Err(err);
            }
        };

        let inference = match self.spawn_inference(&shared, recycle_tx.clone(), engine, sink) {
            Ok(inference) => inference,
            Err(err) => {
                shared.finish(PipelineEvent::Failed(err.to_string()));
                let _ = producer.join();
                self.state = PipelineState::Stopped;
                return Err(err);
            }
        };

        self.session = Some(Session {
            shared,
            recycle: recycle_tx,
            producer,
            inference,
        });
        self.state = PipelineState::Running;
        Ok(())
    }

    /// Replace the model without stopping the producer.
    ///
    /// Only the inference thread is restarted; its recurrent state is
    /// discarded and the new engine starts cold.
    pub fn swap_model(&mut self, engine: InferenceEngine) -> Result<()> {
        self.reap_finished();
        let Some(session) = self.session.take() else {
            return Err(PipelineError::InvalidState("no session to swap into".into()));
        };
        self.state = PipelineState::Swapping;
        tracing::info!("Swapping model to {}", engine.name());

        let Session {
            shared,
            recycle,
            producer,
            inference,
        } = session;
        inference.alive.store(false, Ordering::Release);
        let sink = match inference.handle.join() {
            Ok(sink) => sink,
            Err(_) => {
                tracing::error!("Inference thread panicked during swap");
                shared.finish(PipelineEvent::Failed("inference thread panicked".into()));
                let _ = producer.join();
                self.state = PipelineState::Stopped;
                return Err(PipelineError::InvalidState("inference thread panicked".into()));
            }
        };

        shared.set_geometry(engine.input_geometry());
        shared.emit(PipelineEvent::ModelSwapped);
        let inference = match self.spawn_inference(&shared, recycle.clone(), engine, sink) {
            Ok(inference) => inference,
            Err(err) => {
                shared.finish(PipelineEvent::Failed(err.to_string()));
                let _ = producer.join();
                self.state = PipelineState::Stopped;
                return Err(err);
            }
        };

        self.session = Some(Session {
            shared,
            recycle,
            producer,
            inference,
        });
        self.state = PipelineState::Running;
        tracing::info!("Model swap complete");
        Ok(())
    }

    /// Stop both threads, drop pending work and release the source.
    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            self.state = PipelineState::Stopped;
            return;
        };
        self.state = PipelineState::Stopping;
        let started = Instant::now();

        let was_running = session.shared.halt();
        session.inference.alive.store(false, Ordering::Release);
        session.shared.slot.clear();
        join_session(session);

        self.state = PipelineState::Stopped;
        if was_running {
            let _ = self.events_tx.send(PipelineEvent::Stopped);
        }
        tracing::info!("Pipeline stopped in {:.1}ms", started.elapsed().as_secs_f64() * 1000.0);
    }

    /// Block until the session ends on its own or `timeout` passes.
    pub fn wait_stopped(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.reap_finished();
            if self.session.is_none() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn spawn_inference(
        &self,
        shared: &Arc<Shared>,
        recycle: Sender<TensorBuffer>,
        engine: InferenceEngine,
        sink: Box<dyn DisplaySink>,
    ) -> Result<InferenceThread> {
        let alive = Arc::new(AtomicBool::new(true));
        let worker = InferenceWorker {
            engine,
            sink,
            shared: shared.clone(),
            alive: alive.clone(),
            roi: self.roi.clone(),
            recycle,
            config: self.config.clone(),
        };
        let handle = thread::Builder::new()
            .name("inference".to_string())
            .spawn(move || worker.run())
            .map_err(|err| {
                PipelineError::InvalidState(format!("failed to spawn inference: {err}"))
            })?;
        Ok(InferenceThread { alive, handle })
    }

    /// Join the threads of a session that ended by itself.
    fn reap_finished(&mut self) {
        let finished = self
            .session
            .as_ref()
            .is_some_and(|s| !s.shared.is_running());
        if finished {
            if let Some(session) = self.session.take() {
                join_session(session);
            }
            self.state = PipelineState::Stopped;
        }
    }
}

fn join_session(session: Session) {
    if session.producer.join().is_err() {
        tracing::error!("Producer thread panicked");
    }
    if session.inference.handle.join().is_err() {
        tracing::error!("Inference thread panicked");
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
