// THEORY:
// The `CoverageMap` is the session's memory of *where* the camera has already been.
// It is a binary raster at frame resolution, fixed for the lifetime of a session.
//
// Key architectural principles:
// 1.  **Monotonic accumulation**: A pixel, once observed, is never cleared. The only
//     way back to an empty map is to drop it and build a new one (session reset), so
//     the coverage ratio can only grow within a session.
// 2.  **Translation-only alignment**: Each frame contributes a full-frame observation,
//     shifted by the inverse of the estimated motion and OR-ed into the map. Rotation
//     is deliberately not applied. Under rotation the alignment is approximate; this
//     is a known limitation that completion thresholds are calibrated against.
// 3.  **Observation counts**: Next to the binary mask, a saturating per-pixel count
//     records how often each pixel was seen. The mask is exactly `count > 0`. Counts
//     only feed the heatmap.
// 4.  **Owned buffers**: The rasters are owned by the map and freed when it drops.
//     Nobody else keeps a writable handle across frames.

use crate::core_modules::motion_estimator::MotionEstimate;
use image::{GrayImage, Luma, Rgb, RgbImage};

pub const COVERED: u8 = 255;
pub const UNCOVERED: u8 = 0;
/// Observation count at which the heatmap ramp saturates.
const HEATMAP_SATURATION: f64 = 10.0;

pub struct CoverageMap {
    mask: GrayImage,
    hits: GrayImage,
    covered_pixels: u64,
}

impl CoverageMap {
    /// An all-unset map at frame resolution.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            mask: GrayImage::from_pixel(width, height, Luma([UNCOVERED])),
            hits: GrayImage::new(width, height),
            covered_pixels: 0,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.mask.dimensions()
    }

    /// Folds one frame's observation into the map. A non-finite estimate carries no
    /// position, so it observes nothing.
    pub fn update(&mut self, motion: &MotionEstimate) {
        if !(motion.delta_x.is_finite() && motion.delta_y.is_finite()) {
            log::warn!("non-finite motion {:?}, coverage left unchanged", motion);
            return;
        }
        let (width, height) = self.mask.dimensions();
        let shift = (
            Self::to_pixels(-motion.delta_x, width),
            Self::to_pixels(-motion.delta_y, height),
        );
        let Some((x0, y0, x1, y1)) = Self::observed_window(shift, width, height) else {
            log::trace!("coverage shift {:?} leaves the frame, nothing observed", shift);
            return;
        };

        let mut newly_covered = 0u64;
        for y in y0..y1 {
            for x in x0..x1 {
                let mask = self.mask.get_pixel_mut(x, y);
                if mask.0[0] != COVERED {
                    mask.0[0] = COVERED;
                    newly_covered += 1;
                }
                let hits = self.hits.get_pixel_mut(x, y);
                hits.0[0] = hits.0[0].saturating_add(1);
            }
        }
        self.covered_pixels += newly_covered;
        log::trace!(
            "coverage shift {:?}: {} new pixels, ratio {:.4}",
            shift,
            newly_covered,
            self.ratio()
        );
    }

    /// Rounds to whole pixels, clamped to one frame extent.
    fn to_pixels(delta: f64, extent: u32) -> i64 {
        let limit = extent as f64;
        delta.round().clamp(-limit, limit) as i64
    }

    /// The part of the frame a full-frame observation shifted by `shift` lands on, as
    /// half-open `(x0, y0, x1, y1)`.
    fn observed_window(shift: (i64, i64), width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let span = |offset: i64, extent: u32| {
            let extent = extent as i64;
            let start = offset.max(0);
            let end = (extent + offset).min(extent);
            (start < end).then_some((start as u32, end as u32))
        };
        let (x0, x1) = span(shift.0, width)?;
        let (y0, y1) = span(shift.1, height)?;
        Some((x0, y0, x1, y1))
    }

    /// Set pixels over total pixels, within [0, 1].
    pub fn ratio(&self) -> f64 {
        let total = self.mask.width() as u64 * self.mask.height() as u64;
        if total == 0 {
            return 0.0;
        }
        (self.covered_pixels as f64 / total as f64).clamp(0.0, 1.0)
    }

    pub fn mask(&self) -> &GrayImage {
        &self.mask
    }

    pub fn is_covered(&self, x: u32, y: u32) -> bool {
        self.mask
            .get_pixel_checked(x, y)
            .is_some_and(|p| p.0[0] == COVERED)
    }

    pub fn observation_count(&self, x: u32, y: u32) -> u8 {
        self.hits.get_pixel_checked(x, y).map_or(0, |p| p.0[0])
    }

    /// Color-mapped view of the accumulated coverage. Unobserved pixels are black;
    /// observed pixels run from blue (seen once) through green to red (seen often).
    pub fn heatmap(&self) -> RgbImage {
        RgbImage::from_fn(self.hits.width(), self.hits.height(), |x, y| {
            let count = self.hits.get_pixel(x, y).0[0];
            if count == 0 {
                return Rgb([0, 0, 0]);
            }
            let score = (count as f64).clamp(1.0, HEATMAP_SATURATION);
            let half = HEATMAP_SATURATION / 2.0;
            let (r, g, b) = if score <= half {
                let ratio = score / half;
                (0.0, 255.0 * ratio, 255.0 * (1.0 - ratio))
            } else {
                let ratio = (score - half) / half;
                (255.0 * ratio, 255.0 * (1.0 - ratio), 0.0)
            };
            Rgb([r as u8, g as u8, b as u8])
        })
    }
}
