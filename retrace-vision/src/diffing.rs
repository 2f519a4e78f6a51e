//! Change detection gate: decides whether a grabbed frame differs enough
//! from the last accepted one to be worth persisting.
//!
//! This is the sole admission-control point of the pipeline, so it stays a
//! pure, allocation-free, single-pass comparison.

use image::RgbaImage;
use tracing::warn;

pub const DEFAULT_DIFF_THRESHOLD: f64 = 0.03;

/// True when `current` should be treated as a new sample. A missing
/// previous frame or mismatched dimensions always count as distinct. Pixels
/// differ when any of the R, G or B channels differ exactly; alpha is
/// ignored. Distinct iff the differing fraction exceeds `threshold`.
pub fn is_distinct(current: &RgbaImage, previous: Option<&RgbaImage>, threshold: f64) -> bool {
    let Some(previous) = previous else {
        return true;
    };

    if current.dimensions() != previous.dimensions() {
        warn!(
            current = ?current.dimensions(),
            previous = ?previous.dimensions(),
            "frame dimensions changed, treating as distinct"
        );
        return true;
    }

    let total_pixels = (current.width() as u64) * (current.height() as u64);
    if total_pixels == 0 {
        return false;
    }

    let mut diff_pixels: u64 = 0;
    for (a, b) in current
        .as_raw()
        .chunks_exact(4)
        .zip(previous.as_raw().chunks_exact(4))
    {
        if a[0] != b[0] || a[1] != b[1] || a[2] != b[2] {
            diff_pixels += 1;
        }
    }

    (diff_pixels as f64 / total_pixels as f64) > threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid(width: u32, height: u32, px: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba(px))
    }

    /// Image where exactly `changed` pixels differ from `base`.
    fn with_changed_pixels(base: &RgbaImage, changed: u32) -> RgbaImage {
        let mut img = base.clone();
        let mut remaining = changed;
        'outer: for y in 0..img.height() {
            for x in 0..img.width() {
                if remaining == 0 {
                    break 'outer;
                }
                let mut px = *img.get_pixel(x, y);
                px.0[0] = px.0[0].wrapping_add(1);
                img.put_pixel(x, y, px);
                remaining -= 1;
            }
        }
        img
    }

    #[test]
    fn identical_frames_are_never_distinct() {
        let frame = solid(64, 64, [10, 20, 30, 255]);
        for threshold in [0.0001, 0.03, 0.5, 0.99] {
            assert!(!is_distinct(&frame, Some(&frame.clone()), threshold));
        }
    }

    #[test]
    fn fully_changed_frames_are_distinct_below_threshold_one() {
        let a = solid(64, 64, [0, 0, 0, 255]);
        let b = solid(64, 64, [255, 255, 255, 255]);
        for threshold in [0.0, 0.5, 0.999] {
            assert!(is_distinct(&b, Some(&a), threshold));
        }
    }

    #[test]
    fn missing_previous_frame_is_distinct() {
        let frame = solid(8, 8, [1, 2, 3, 255]);
        assert!(is_distinct(&frame, None, 0.03));
    }

    #[test]
    fn dimension_mismatch_is_distinct() {
        let a = solid(8, 8, [1, 2, 3, 255]);
        let b = solid(16, 8, [1, 2, 3, 255]);
        assert!(is_distinct(&b, Some(&a), 0.03));
    }

    #[test]
    fn alpha_only_changes_are_ignored() {
        let a = solid(8, 8, [1, 2, 3, 255]);
        let b = solid(8, 8, [1, 2, 3, 0]);
        assert!(!is_distinct(&b, Some(&a), 0.0));
    }

    #[test]
    fn default_threshold_separates_one_and_five_percent_change() {
        // 100x100 frame: 1% changed stays below 0.03, 5% exceeds it.
        let base = solid(100, 100, [128, 128, 128, 255]);
        let one_percent = with_changed_pixels(&base, 100);
        let five_percent = with_changed_pixels(&base, 500);

        assert!(!is_distinct(&one_percent, Some(&base), DEFAULT_DIFF_THRESHOLD));
        assert!(is_distinct(&five_percent, Some(&base), DEFAULT_DIFF_THRESHOLD));
    }
}
