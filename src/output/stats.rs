use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use image::RgbImage;

use super::{DisplaySink, FrameTiming};

/// Logs averaged stage timings every `interval` presented frames.
pub struct TimingLog<S> {
    inner: S,
    interval: u64,
    frame_count: u64,
    total_producer_time: Duration,
    total_inference_time: Duration,
    total_present_time: Duration,
    window_start: Instant,
}

impl<S: DisplaySink> TimingLog<S> {
    pub fn new(inner: S) -> Self {
        Self::with_interval(inner, 30)
    }

    pub fn with_interval(inner: S, interval: u64) -> Self {
        Self {
            inner,
            interval: interval.max(1),
            frame_count: 0,
            total_producer_time: Duration::ZERO,
            total_inference_time: Duration::ZERO,
            total_present_time: Duration::ZERO,
            window_start: Instant::now(),
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn log_window(&mut self) {
        let n = self.interval as f64;
        let avg_producer_ms = self.total_producer_time.as_secs_f64() * 1000.0 / n;
        let avg_inference_ms = self.total_inference_time.as_secs_f64() * 1000.0 / n;
        let avg_present_ms = self.total_present_time.as_secs_f64() * 1000.0 / n;
        let window = self.window_start.elapsed().as_secs_f64();
        let fps = if window > 0.0 { n / window } else { 0.0 };

        tracing::info!(
            "Frame {}: producer={:.1}ms, inference={:.1}ms, present={:.1}ms, fps={:.1}",
            self.frame_count,
            avg_producer_ms,
            avg_inference_ms,
            avg_present_ms,
            fps
        );

        self.total_producer_time = Duration::ZERO;
        self.total_inference_time = Duration::ZERO;
        self.total_present_time = Duration::ZERO;
        self.window_start = Instant::now();
    }
}

impl<S: DisplaySink> DisplaySink for TimingLog<S> {
    fn present(
        &mut self,
        image: RgbImage,
        original: Option<Arc<RgbImage>>,
        timing: FrameTiming,
    ) -> Result<()> {
        let present_start = Instant::now();
        let result = self.inner.present(image, original, timing);
        self.total_present_time += present_start.elapsed();
        self.total_producer_time += timing.producer;
        self.total_inference_time += timing.inference;
        self.frame_count += 1;

        if self.frame_count % self.interval == 0 {
            self.log_window();
        }
        result
    }
}
