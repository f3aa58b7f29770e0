// THEORY:
// The `feature_extractor` module is the seam between the engine and the vision
// primitives that turn a raw frame into keypoints with binary descriptors. The engine
// only depends on the `FeatureExtractor` trait; any detector that can produce an
// ordered `FeatureSet` can be plugged in (a hardware ORB block, a test double...).
//
// The bundled `OrientedBriefExtractor` is an ORB-style pipeline:
// 1.  **Detection**: FAST-9 corners on the raw luminance frame.
// 2.  **Selection**: non-maximal corners are suppressed and corners too close to the
//     border for a full patch are dropped. The rest are ranked by response and capped
//     at `max_features`.
// 3.  **Orientation**: the intensity centroid of a circular patch gives each keypoint a
//     dominant angle, so descriptors can be steered.
// 4.  **Description**: 256 pairwise intensity comparisons, sampled on a blurred copy of
//     the frame with a fixed pseudo-random pattern rotated by the keypoint angle.
//
// Everything is deterministic: the same frame always yields the same feature set.

use crate::core_modules::frame::{Descriptor, Feature, FeatureSet, Frame, Keypoint};
use crate::error::Result;
use bitarray::BitArray;
use image::GrayImage;
use imageproc::corners::corners_fast9;
use imageproc::filter::gaussian_blur_f32;
use imageproc::suppress::local_maxima;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use std::sync::OnceLock;

const DESCRIPTOR_BYTES: usize = 32;
const DESCRIPTOR_BITS: usize = DESCRIPTOR_BYTES * 8;
const PATTERN_SEED: u64 = 0x5EED_0F_B41EF;
/// Sampling offsets are drawn from [-PATTERN_RADIUS, PATTERN_RADIUS] on both axes.
const PATTERN_RADIUS: i32 = 12;
const ORIENTATION_RADIUS: i32 = 15;
/// Rotated pattern points reach PATTERN_RADIUS * sqrt(2) < 18 px.
const BORDER: u32 = 20;
const BLUR_SIGMA: f32 = 2.0;
const SUPPRESSION_RADIUS: u32 = 3;

type SamplingPattern = [(i32, i32, i32, i32); DESCRIPTOR_BITS];

static SAMPLING_PATTERN: OnceLock<SamplingPattern> = OnceLock::new();

/// Converts one frame into its ordered feature set.
pub trait FeatureExtractor: Send {
    fn extract(&mut self, frame: &Frame) -> Result<FeatureSet>;
}

/// ORB-style detector: FAST-9 corners, intensity-centroid orientation, steered BRIEF.
#[derive(Debug, Clone)]
pub struct OrientedBriefExtractor {
    max_features: usize,
    fast_threshold: u8,
}

impl OrientedBriefExtractor {
    pub fn new(max_features: usize, fast_threshold: u8) -> Self {
        Self {
            max_features,
            fast_threshold,
        }
    }

    pub fn max_features(&self) -> usize {
        self.max_features
    }

    fn sampling_pattern() -> &'static SamplingPattern {
        SAMPLING_PATTERN.get_or_init(|| {
            let mut rng = Pcg64::seed_from_u64(PATTERN_SEED);
            let mut pattern = [(0, 0, 0, 0); DESCRIPTOR_BITS];
            for pair in pattern.iter_mut() {
                *pair = (
                    rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS),
                    rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS),
                    rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS),
                    rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS),
                );
            }
            pattern
        })
    }

    /// Angle of the vector from the patch center to its intensity centroid, in degrees.
    fn orientation(image: &GrayImage, cx: u32, cy: u32) -> f32 {
        let mut m01 = 0.0f64;
        let mut m10 = 0.0f64;
        let r2 = ORIENTATION_RADIUS * ORIENTATION_RADIUS;
        for dy in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
            for dx in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
                if dx * dx + dy * dy > r2 {
                    continue;
                }
                let x = (cx as i32 + dx) as u32;
                let y = (cy as i32 + dy) as u32;
                let intensity = image.get_pixel(x, y).0[0] as f64;
                m10 += dx as f64 * intensity;
                m01 += dy as f64 * intensity;
            }
        }
        m01.atan2(m10).to_degrees() as f32
    }

    fn describe(smoothed: &GrayImage, keypoint: &Keypoint) -> Descriptor {
        let (sin, cos) = keypoint.angle_degrees.to_radians().sin_cos();
        let cx = keypoint.x;
        let cy = keypoint.y;
        let sample = |dx: i32, dy: i32| -> u8 {
            let rx = (dx as f32 * cos - dy as f32 * sin).round();
            let ry = (dx as f32 * sin + dy as f32 * cos).round();
            let x = (cx + rx) as u32;
            let y = (cy + ry) as u32;
            smoothed.get_pixel(x, y).0[0]
        };

        let mut bytes = [0u8; DESCRIPTOR_BYTES];
        for (bit, &(ax, ay, bx, by)) in Self::sampling_pattern().iter().enumerate() {
            if sample(ax, ay) < sample(bx, by) {
                bytes[bit / 8] |= 1 << (bit % 8);
            }
        }
        BitArray::new(bytes)
    }
}

impl Default for OrientedBriefExtractor {
    fn default() -> Self {
        Self::new(500, 20)
    }
}

impl FeatureExtractor for OrientedBriefExtractor {
    fn extract(&mut self, frame: &Frame) -> Result<FeatureSet> {
        let image = frame.image();
        let (width, height) = image.dimensions();
        if width <= 2 * BORDER || height <= 2 * BORDER {
            return Ok(FeatureSet::default());
        }

        // --- 1. Detection & Selection ---
        let detected = corners_fast9(image, self.fast_threshold);
        let mut corners: Vec<_> = local_maxima(&detected, SUPPRESSION_RADIUS)
            .into_iter()
            .filter(|c| {
                c.x >= BORDER && c.y >= BORDER && c.x < width - BORDER && c.y < height - BORDER
            })
            .collect();
        corners.sort_by(|a, b| b.score.total_cmp(&a.score));
        corners.truncate(self.max_features);

        // --- 2. Orientation & Description ---
        let smoothed = gaussian_blur_f32(image, BLUR_SIGMA);
        let features: FeatureSet = corners
            .into_iter()
            .map(|corner| {
                let keypoint = Keypoint {
                    x: corner.x as f32,
                    y: corner.y as f32,
                    angle_degrees: Self::orientation(image, corner.x, corner.y),
                    response: corner.score,
                };
                let descriptor = Self::describe(&smoothed, &keypoint);
                Feature {
                    keypoint,
                    descriptor,
                }
            })
            .collect();

        log::trace!(
            "frame {}: extracted {} features",
            frame.sequence,
            features.len()
        );
        Ok(features)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::Luma;

    /// A seeded block texture: plenty of corners, no repeated structure.
    pub(crate) fn textured_image(width: u32, height: u32, seed: u64) -> GrayImage {
        const BLOCK: u32 = 6;
        let mut rng = Pcg64::seed_from_u64(seed);
        let blocks_x = width / BLOCK + 1;
        let blocks_y = height / BLOCK + 1;
        let levels: Vec<u8> = (0..blocks_x * blocks_y).map(|_| rng.r#gen()).collect();
        GrayImage::from_fn(width, height, |x, y| {
            Luma([levels[((y / BLOCK) * blocks_x + x / BLOCK) as usize]])
        })
    }

    /// Shifts a texture so that content moves by (+dx, +dy).
    pub(crate) fn shifted(image: &GrayImage, dx: u32, dy: u32) -> GrayImage {
        GrayImage::from_fn(image.width(), image.height(), |x, y| {
            if x >= dx && y >= dy {
                *image.get_pixel(x - dx, y - dy)
            } else {
                Luma([0])
            }
        })
    }

    #[test]
    fn flat_frame_has_no_features() {
        let frame = Frame::from_image(GrayImage::from_pixel(120, 90, Luma([128])));
        let features = OrientedBriefExtractor::default().extract(&frame).unwrap();
        assert!(features.is_empty());
    }

    #[test]
    fn tiny_frame_has_no_features() {
        let frame = Frame::from_image(textured_image(30, 30, 1));
        let features = OrientedBriefExtractor::default().extract(&frame).unwrap();
        assert!(features.is_empty());
    }

    #[test]
    fn respects_feature_cap_and_border() {
        let frame = Frame::from_image(textured_image(200, 150, 2));
        let mut extractor = OrientedBriefExtractor::new(40, 20);
        let features = extractor.extract(&frame).unwrap();
        assert!(!features.is_empty());
        assert!(features.len() <= 40);
        for f in features.features() {
            assert!(f.keypoint.x >= BORDER as f32 && f.keypoint.x < (200 - BORDER) as f32);
            assert!(f.keypoint.y >= BORDER as f32 && f.keypoint.y < (150 - BORDER) as f32);
            assert!(f.keypoint.angle_degrees >= -180.0 && f.keypoint.angle_degrees <= 180.0);
        }
    }

    #[test]
    fn extraction_is_deterministic() {
        let image = textured_image(160, 120, 3);
        let mut extractor = OrientedBriefExtractor::default();
        let a = extractor.extract(&Frame::from_image(image.clone())).unwrap();
        let b = extractor.extract(&Frame::from_image(image)).unwrap();
        assert_eq!(a.len(), b.len());
        for (fa, fb) in a.features().iter().zip(b.features()) {
            assert_eq!(fa.keypoint, fb.keypoint);
            assert_eq!(fa.descriptor.distance(&fb.descriptor), 0);
        }
    }
}
