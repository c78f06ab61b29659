use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use image::RgbImage;

use super::autocrop;
use super::geometry::{self, fit_rect, OriginalRect, ViewRect};
use super::store::{PersistedRoi, RoiStore};
use crate::config::RoiConfig;

/// Lifecycle of the ROI within one source session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoiState {
    Uninitialized,
    Default,
    UserSet,
}

/// Which part of the rectangle a gesture grabbed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InteractionZone {
    ResizeTopLeft,
    ResizeBottomRight,
    Drag,
}

/// ROI and target rect read together under one lock.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RoiSnapshot {
    pub roi: ViewRect,
    pub target: ViewRect,
}

impl RoiSnapshot {
    /// Crop in original pixels, `None` for "whole frame".
    pub fn crop_for(&self, original_w: u32, original_h: u32) -> Option<OriginalRect> {
        geometry::crop_for_frame(self.roi, self.target, original_w, original_h)
    }
}

struct Inner {
    state: RoiState,
    rect: ViewRect,
    target: ViewRect,
    reference: Option<(u32, u32)>,
    gesture: Option<InteractionZone>,
}

/// User-adjustable region of interest in view coordinates.
///
/// Mutated from the display/input context and read by the producer. The
/// lock covers only rectangle reads and writes; persistence and contour
/// detection run outside it.
pub struct RegionOfInterestController {
    inner: Mutex<Inner>,
    config: RoiConfig,
    store: Box<dyn RoiStore>,
    crop_only: AtomicBool,
}

impl RegionOfInterestController {
    pub fn new(config: RoiConfig, store: Box<dyn RoiStore>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: RoiState::Uninitialized,
                rect: ViewRect::EMPTY,
                target: ViewRect::EMPTY,
                reference: None,
                gesture: None,
            }),
            config,
            store,
            crop_only: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> RoiState {
        self.lock().state
    }

    /// Current rectangle, `None` until initialised.
    pub fn rect(&self) -> Option<ViewRect> {
        let inner = self.lock();
        (!inner.rect.is_empty()).then_some(inner.rect)
    }

    pub fn target_rect(&self) -> ViewRect {
        self.lock().target
    }

    pub fn snapshot(&self) -> Option<RoiSnapshot> {
        let inner = self.lock();
        if inner.rect.is_empty() || inner.target.is_empty() {
            return None;
        }
        Some(RoiSnapshot {
            roi: inner.rect,
            target: inner.target,
        })
    }

    pub fn set_crop_only(&self, enabled: bool) {
        self.crop_only.store(enabled, Ordering::Relaxed);
    }

    /// Show the segmented crop alone instead of composited onto the frame.
    pub fn is_crop_only(&self) -> bool {
        self.crop_only.load(Ordering::Relaxed)
    }

    /// Record the size of the frames the source is producing.
    pub fn update_reference_size(&self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.lock().reference = Some((width, height));
        }
    }

    pub fn reference_size(&self) -> Option<(u32, u32)> {
        self.lock().reference
    }

    /// Lay the reference frame out in a `view_w` x `view_h` surface.
    ///
    /// Does nothing until the producer reported a frame size.
    pub fn layout(&self, view_w: u32, view_h: u32) {
        let Some((ref_w, ref_h)) = self.reference_size() else {
            return;
        };
        self.set_target_rect(fit_rect(view_w, view_h, ref_w, ref_h));
    }

    /// Install the view-space rect the frame is displayed in.
    ///
    /// The first non-empty target initialises the ROI: a persisted rectangle
    /// when a valid one exists, otherwise the default centred rectangle.
    pub fn set_target_rect(&self, target: ViewRect) {
        if target.is_empty() || !target.is_finite() {
            return;
        }

        let needs_restore = {
            let mut inner = self.lock();
            inner.target = target;
            if inner.state == RoiState::Uninitialized {
                true
            } else {
                if !target.encloses(&inner.rect) {
                    inner.rect = self.clamp_moved(inner.rect, target);
                }
                false
            }
        };
        if !needs_restore {
            return;
        }

        let restored = match self.store.load() {
            Ok(record) => record
                .map(|r| r.rect())
                .filter(|r| self.is_restorable(r, target)),
            Err(err) => {
                tracing::warn!("Ignoring persisted ROI: {err:#}");
                None
            }
        };

        let mut inner = self.lock();
        // Another context may have initialised while the store was read.
        if inner.state != RoiState::Uninitialized || inner.target != target {
            return;
        }
        match restored {
            Some(rect) => {
                inner.rect = self.clamp_moved(rect, target);
                inner.state = RoiState::UserSet;
                tracing::debug!("Restored ROI {:?}", inner.rect);
            }
            None => {
                inner.rect = target.inset(self.config.default_inset);
                inner.state = RoiState::Default;
                tracing::debug!("Default ROI {:?}", inner.rect);
            }
        }
    }

    /// Begin a gesture at `(x, y)`; the grabbed zone holds until `gesture_end`.
    pub fn gesture_start(&self, x: f32, y: f32) -> Option<InteractionZone> {
        let mut inner = self.lock();
        inner.gesture = None;
        if self.is_crop_only() || inner.rect.is_empty() {
            return None;
        }
        let rect = inner.rect;
        let zone = if self.near(x, y, rect.left, rect.top) {
            Some(InteractionZone::ResizeTopLeft)
        } else if self.near(x, y, rect.right, rect.bottom) {
            Some(InteractionZone::ResizeBottomRight)
        } else if rect.contains(x, y) {
            Some(InteractionZone::Drag)
        } else {
            None
        };
        inner.gesture = zone;
        zone
    }

    /// Apply a pointer delta to the active gesture. Returns whether the ROI changed.
    pub fn gesture_move(&self, dx: f32, dy: f32) -> bool {
        if !dx.is_finite() || !dy.is_finite() {
            return false;
        }
        let rect = {
            let mut inner = self.lock();
            let Some(zone) = inner.gesture else {
                return false;
            };
            let target = inner.target;
            let min = self.config.min_size;
            let mut rect = inner.rect;
            match zone {
                InteractionZone::Drag => {
                    rect = self.clamp_moved(rect.offset(dx, dy), target);
                }
                InteractionZone::ResizeTopLeft => {
                    rect.left = (rect.left + dx).max(target.left).min(rect.right - min);
                    rect.top = (rect.top + dy).max(target.top).min(rect.bottom - min);
                }
                InteractionZone::ResizeBottomRight => {
                    rect.right = (rect.right + dx).min(target.right).max(rect.left + min);
                    rect.bottom = (rect.bottom + dy).min(target.bottom).max(rect.top + min);
                }
            }
            inner.rect = rect;
            inner.state = RoiState::UserSet;
            rect
        };
        self.persist(rect);
        true
    }

    pub fn gesture_end(&self) {
        self.lock().gesture = None;
    }

    /// Replace the ROI programmatically, clamped into the target rect.
    pub fn set_rect(&self, rect: ViewRect) -> bool {
        if rect.is_empty() || !rect.is_finite() {
            return false;
        }
        let rect = {
            let mut inner = self.lock();
            if inner.target.is_empty() {
                return false;
            }
            inner.rect = self.clamp_moved(rect, inner.target);
            inner.state = RoiState::UserSet;
            inner.rect
        };
        self.persist(rect);
        true
    }

    /// Snap the ROI to the largest bright blob in `frame`.
    pub fn initialize_from_frame(&self, frame: &RgbImage) -> bool {
        if self.target_rect().is_empty() {
            return false;
        }
        let Some(found) = autocrop::detect_largest_contour(frame) else {
            return false;
        };
        let (w, h) = frame.dimensions();
        let rect = {
            let mut inner = self.lock();
            let Some(view) = geometry::original_to_view(found, inner.target, w, h) else {
                return false;
            };
            inner.rect = self.clamp_moved(view, inner.target);
            inner.state = RoiState::UserSet;
            inner.rect
        };
        tracing::info!("ROI initialised from largest contour: {:?}", rect);
        self.persist(rect);
        true
    }

    /// Forget the ROI for a new source session. The persisted record stays.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = RoiState::Uninitialized;
        inner.rect = ViewRect::EMPTY;
        inner.gesture = None;
        inner.reference = None;
    }

    fn near(&self, px: f32, py: f32, cx: f32, cy: f32) -> bool {
        let dx = px - cx;
        let dy = py - cy;
        let r = self.config.handle_radius;
        dx * dx + dy * dy <= r * r
    }

    /// A record from an earlier, larger layout that misses `target` entirely
    /// is not restored.
    fn is_restorable(&self, rect: &ViewRect, target: ViewRect) -> bool {
        rect.is_finite()
            && rect.left >= 0.0
            && rect.top >= 0.0
            && rect.width() >= self.config.min_size
            && rect.height() >= self.config.min_size
            && rect.left < target.right
            && rect.right > target.left
            && rect.top < target.bottom
            && rect.bottom > target.top
    }

    /// Fit `rect` inside `target` keeping its size where possible.
    fn clamp_moved(&self, rect: ViewRect, target: ViewRect) -> ViewRect {
        let min_w = self.config.min_size.min(target.width());
        let min_h = self.config.min_size.min(target.height());
        let width = rect.width().max(min_w).min(target.width());
        let height = rect.height().max(min_h).min(target.height());
        let left = rect.left.max(target.left).min(target.right - width);
        let top = rect.top.max(target.top).min(target.bottom - height);
        ViewRect::new(left, top, left + width, top + height)
    }

    fn persist(&self, rect: ViewRect) {
        if let Err(err) = self.store.save(&PersistedRoi::from(rect)) {
            tracing::warn!("Failed to persist ROI: {err:#}");
        }
    }
}
