//! Rectangle transforms between view space (the display surface) and
//! original space (pixels of the source frame).
//!
//! All functions are pure. Every mapping answers `None` while the target
//! rect has no area, i.e. before the display layout has settled.

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in view coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl ViewRect {
    pub const EMPTY: ViewRect = ViewRect {
        left: 0.0,
        top: 0.0,
        right: 0.0,
        bottom: 0.0,
    };

    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    /// No area (or not a number).
    pub fn is_empty(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }

    pub fn is_finite(&self) -> bool {
        self.left.is_finite()
            && self.top.is_finite()
            && self.right.is_finite()
            && self.bottom.is_finite()
    }

    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }

    /// Contains `other` entirely (edges may touch).
    pub fn encloses(&self, other: &ViewRect) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right <= self.right
            && other.bottom <= self.bottom
    }

    pub fn offset(&self, dx: f32, dy: f32) -> Self {
        Self::new(self.left + dx, self.top + dy, self.right + dx, self.bottom + dy)
    }

    /// Shrink by `fraction` of the width/height on every side.
    pub fn inset(&self, fraction: f32) -> Self {
        let pad_w = self.width() * fraction;
        let pad_h = self.height() * fraction;
        Self::new(
            self.left + pad_w,
            self.top + pad_h,
            self.right - pad_w,
            self.bottom - pad_h,
        )
    }
}

/// Axis-aligned rectangle in original-frame pixels, right/bottom exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OriginalRect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl OriginalRect {
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    /// The rect is the whole `width` x `height` frame.
    pub fn covers(&self, width: u32, height: u32) -> bool {
        self.left == 0 && self.top == 0 && self.right == width && self.bottom == height
    }
}

/// Map a view-space rectangle onto original-frame pixels.
///
/// Coordinates are truncated, `left/top` clamp to `[0, dim-1]` and
/// `right/bottom` to `[0, dim]`; width and height never drop below one pixel,
/// so the result always satisfies `0 <= left < right <= dim`.
pub fn view_to_original(
    rect: ViewRect,
    target: ViewRect,
    original_w: u32,
    original_h: u32,
) -> Option<OriginalRect> {
    if target.is_empty() || !target.is_finite() || !rect.is_finite() {
        return None;
    }
    if original_w == 0 || original_h == 0 {
        return None;
    }

    let scale_x = original_w as f32 / target.width();
    let scale_y = original_h as f32 / target.height();
    let max_w = i64::from(original_w);
    let max_h = i64::from(original_h);

    let left = (((rect.left - target.left) * scale_x) as i64).clamp(0, max_w - 1);
    let top = (((rect.top - target.top) * scale_y) as i64).clamp(0, max_h - 1);
    let right = (((rect.right - target.left) * scale_x) as i64).clamp(0, max_w);
    let bottom = (((rect.bottom - target.top) * scale_y) as i64).clamp(0, max_h);
    let width = (right - left).max(1);
    let height = (bottom - top).max(1);

    Some(OriginalRect::new(
        left as u32,
        top as u32,
        (left + width) as u32,
        (top + height) as u32,
    ))
}

/// Map an original-frame rectangle back into view space.
pub fn original_to_view(
    rect: OriginalRect,
    target: ViewRect,
    original_w: u32,
    original_h: u32,
) -> Option<ViewRect> {
    if target.is_empty() || !target.is_finite() || original_w == 0 || original_h == 0 {
        return None;
    }
    let scale_x = target.width() / original_w as f32;
    let scale_y = target.height() / original_h as f32;
    Some(ViewRect::new(
        target.left + rect.left as f32 * scale_x,
        target.top + rect.top as f32 * scale_y,
        target.left + rect.right as f32 * scale_x,
        target.top + rect.bottom as f32 * scale_y,
    ))
}

/// Crop to extract for a frame, `None` meaning "use the whole frame".
pub fn crop_for_frame(
    rect: ViewRect,
    target: ViewRect,
    original_w: u32,
    original_h: u32,
) -> Option<OriginalRect> {
    if rect.is_empty() {
        return None;
    }
    view_to_original(rect, target, original_w, original_h)
        .filter(|crop| !crop.covers(original_w, original_h))
}

/// Largest rectangle with the content's aspect ratio, centred in the view.
pub fn fit_rect(view_w: u32, view_h: u32, content_w: u32, content_h: u32) -> ViewRect {
    if view_w == 0 || view_h == 0 || content_w == 0 || content_h == 0 {
        return ViewRect::EMPTY;
    }
    let view_ratio = view_w as f32 / view_h as f32;
    let content_ratio = content_w as f32 / content_h as f32;
    let (inset_w, inset_h) = if view_ratio > content_ratio {
        ((view_h as f32 * content_ratio) as u32, view_h)
    } else {
        (view_w, (view_w as f32 / content_ratio) as u32)
    };
    let offset_x = (view_w - inset_w) / 2;
    let offset_y = (view_h - inset_h) / 2;
    ViewRect::new(
        offset_x as f32,
        offset_y as f32,
        (offset_x + inset_w) as f32,
        (offset_y + inset_h) as f32,
    )
}
