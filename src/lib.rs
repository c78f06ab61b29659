//! Real-time segmentation over camera, screen or video-file frames.
//!
//! Frames flow producer → single-slot hand-off → recurrent inference →
//! display sink, with an interactively adjustable region of interest and
//! model hot-swap. See [`pipeline::Pipeline`].

pub mod capture;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod roi;
pub mod segmentation;

pub use error::{PipelineError, Result};
pub use pipeline::{Pipeline, PipelineEvent, PipelineState};
