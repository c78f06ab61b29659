//! Initial ROI guess: bounding box of the largest bright blob in a frame.

use image::{imageops, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::morphology;
use imageproc::point::Point;

use super::geometry::OriginalRect;

/// Pixels at or below this intensity are zeroed before contour search.
const THRESHOLD: u8 = 30;
/// Opening radius under the L-infinity norm, i.e. a 5x5 square kernel.
const KERNEL_RADIUS: u8 = 2;

/// Bounding box of the largest external contour, in frame pixels.
///
/// Returns `None` when the frame holds no contour with a positive area.
pub fn detect_largest_contour(frame: &RgbImage) -> Option<OriginalRect> {
    let _span = tracing::debug_span!("autocrop").entered();

    let mut gray = imageops::grayscale(frame);
    for pixel in gray.pixels_mut() {
        if pixel[0] <= THRESHOLD {
            pixel[0] = 0;
        }
    }
    let opened = morphology::open(&gray, Norm::LInf, KERNEL_RADIUS);

    let contours = find_contours::<i32>(&opened);
    let (area, points) = contours
        .iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .map(|c| (polygon_area(&c.points), &c.points))
        .filter(|(area, _)| *area > 0.0)
        .max_by(|a, b| a.0.total_cmp(&b.0))?;

    let min_x = points.iter().map(|p| p.x).min()?;
    let max_x = points.iter().map(|p| p.x).max()?;
    let min_y = points.iter().map(|p| p.y).min()?;
    let max_y = points.iter().map(|p| p.y).max()?;
    tracing::debug!(
        "Largest contour area {:.0} at ({}, {})-({}, {})",
        area,
        min_x,
        min_y,
        max_x,
        max_y
    );

    Some(OriginalRect::new(
        min_x.max(0) as u32,
        min_y.max(0) as u32,
        (max_x + 1).max(0) as u32,
        (max_y + 1).max(0) as u32,
    ))
}

/// Shoelace area of a closed polygon.
fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| i64::from(a.x) * i64::from(b.y) - i64::from(b.x) * i64::from(a.y))
        .sum();
    (twice as f64 / 2.0).abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn frame_with_box(w: u32, h: u32, boxes: &[(u32, u32, u32, u32)]) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            let inside = boxes
                .iter()
                .any(|&(l, t, r, b)| x >= l && x < r && y >= t && y < b);
            if inside {
                Rgb([220, 220, 220])
            } else {
                Rgb([10, 12, 8])
            }
        })
    }

    #[test]
    fn finds_single_bright_box() {
        let frame = frame_with_box(120, 90, &[(20, 30, 60, 50)]);
        assert_eq!(
            detect_largest_contour(&frame),
            Some(OriginalRect::new(20, 30, 60, 50))
        );
    }

    #[test]
    fn prefers_the_larger_blob() {
        let frame = frame_with_box(200, 120, &[(10, 10, 30, 30), (80, 20, 180, 100)]);
        assert_eq!(
            detect_largest_contour(&frame),
            Some(OriginalRect::new(80, 20, 180, 100))
        );
    }

    #[test]
    fn dark_frame_has_no_contour() {
        let frame = frame_with_box(64, 64, &[]);
        assert_eq!(detect_largest_contour(&frame), None);
    }

    #[test]
    fn specks_are_removed_by_opening() {
        let frame = frame_with_box(64, 64, &[(30, 30, 32, 32)]);
        assert_eq!(detect_largest_contour(&frame), None);
    }

    #[test]
    fn shoelace_area_of_square() {
        let square = [
            Point::new(0, 0),
            Point::new(4, 0),
            Point::new(4, 4),
            Point::new(0, 4),
        ];
        assert_eq!(polygon_area(&square), 16.0);
    }
}
