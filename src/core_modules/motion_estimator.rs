// THEORY:
// The `MotionEstimator` answers one question per frame pair: how far, and in which
// direction, did the image content move between the previous frame and this one?
//
// Key architectural principles:
// 1.  **Evidence first**: No motion is ever asserted without enough matches. Too few
//     raw matches, or too few matches that survive the Hamming cutoff, yield the zero
//     estimate with zero confidence. Callers can always tell "no evidence" apart from
//     "measured stillness" by looking at `confidence`.
// 2.  **Translation by consensus**: The displacement is the mean of the positional
//     deltas of all surviving matches. There is no outlier model beyond the distance
//     cutoff.
// 3.  **Rotation by geometry**: Rotation is measured from how the direction between
//     consecutive matched points turned, over a short bounded window of matches.
// 4.  **Never raises**: A failing matcher is logged and degraded to the zero estimate.
//     One bad frame pair must not end a session.

use crate::config::AnalyzerConfig;
use crate::core_modules::frame::{Descriptor, FeatureSet, Keypoint};
use crate::core_modules::matcher::{DescriptorMatch, DescriptorMatcher};

/// Apparent camera displacement between the previous and the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MotionEstimate {
    /// Horizontal displacement of image content, in pixels.
    pub delta_x: f64,
    /// Vertical displacement of image content, in pixels.
    pub delta_y: f64,
    /// Signed rotation in degrees, within [-180, 180].
    pub rotation_degrees: f64,
    /// Share of raw matches that survived filtering, within [0, 1].
    pub confidence: f64,
}

impl MotionEstimate {
    pub const ZERO: MotionEstimate = MotionEstimate {
        delta_x: 0.0,
        delta_y: 0.0,
        rotation_degrees: 0.0,
        confidence: 0.0,
    };

    pub fn magnitude(&self) -> f64 {
        self.delta_x.hypot(self.delta_y)
    }
}

/// Wraps an angle in degrees into (-180, 180].
pub fn wrap_degrees(angle: f64) -> f64 {
    let wrapped = (angle + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped <= -180.0 { 180.0 } else { wrapped }
}

pub struct MotionEstimator {
    matcher: Box<dyn DescriptorMatcher>,
    min_raw_matches: usize,
    min_filtered_matches: usize,
    max_match_distance: u32,
    rotation_window: usize,
}

impl MotionEstimator {
    pub fn new(config: &AnalyzerConfig, matcher: Box<dyn DescriptorMatcher>) -> Self {
        Self {
            matcher,
            min_raw_matches: config.min_raw_matches,
            min_filtered_matches: config.min_filtered_matches,
            max_match_distance: config.max_match_distance,
            rotation_window: config.rotation_window,
        }
    }

    pub fn estimate(&self, previous: &FeatureSet, current: &FeatureSet) -> MotionEstimate {
        if previous.is_empty() || current.is_empty() {
            return MotionEstimate::ZERO;
        }

        let query: Vec<Descriptor> = previous.descriptors().copied().collect();
        let train: Vec<Descriptor> = current.descriptors().copied().collect();
        let raw = match self.matcher.match_descriptors(&query, &train) {
            Ok(matches) => matches,
            Err(err) => {
                log::warn!("descriptor matching failed, asserting no motion: {err}");
                return MotionEstimate::ZERO;
            }
        };
        if raw.len() < self.min_raw_matches {
            log::debug!("only {} raw matches, asserting no motion", raw.len());
            return MotionEstimate::ZERO;
        }

        let filtered = filter_matches(&raw, self.max_match_distance);
        let pairs: Option<Vec<(&Keypoint, &Keypoint)>> = filtered
            .iter()
            .map(|m| Some((previous.keypoint(m.query_index)?, current.keypoint(m.train_index)?)))
            .collect();
        let Some(pairs) = pairs else {
            log::warn!("matcher returned out-of-range indices, asserting no motion");
            return MotionEstimate::ZERO;
        };
        if pairs.len() < self.min_filtered_matches {
            log::debug!(
                "only {} of {} matches under distance {}, asserting no motion",
                pairs.len(),
                raw.len(),
                self.max_match_distance
            );
            return MotionEstimate::ZERO;
        }

        let count = pairs.len() as f64;
        let (sum_x, sum_y) = pairs.iter().fold((0.0, 0.0), |(sx, sy), (p, c)| {
            (sx + (c.x - p.x) as f64, sy + (c.y - p.y) as f64)
        });

        let estimate = MotionEstimate {
            delta_x: sum_x / count,
            delta_y: sum_y / count,
            rotation_degrees: Self::rotation(&pairs[..pairs.len().min(self.rotation_window)]),
            confidence: (count / raw.len() as f64).clamp(0.0, 1.0),
        };
        log::trace!("{} filtered of {} raw matches -> {:?}", pairs.len(), raw.len(), estimate);
        estimate
    }

    /// Mean turn of the segment joining consecutive matched points.
    fn rotation(window: &[(&Keypoint, &Keypoint)]) -> f64 {
        let turns: Vec<f64> = window
            .windows(2)
            .map(|w| {
                let (p0, c0) = w[0];
                let (p1, c1) = w[1];
                let before = ((p1.y - p0.y) as f64).atan2((p1.x - p0.x) as f64);
                let after = ((c1.y - c0.y) as f64).atan2((c1.x - c0.x) as f64);
                wrap_degrees((after - before).to_degrees())
            })
            .collect();
        if turns.is_empty() {
            return 0.0;
        }
        wrap_degrees(turns.iter().sum::<f64>() / turns.len() as f64)
    }
}

/// Keeps matches whose Hamming distance is strictly below `max_distance`.
pub fn filter_matches(raw: &[DescriptorMatch], max_distance: u32) -> Vec<DescriptorMatch> {
    raw.iter().copied().filter(|m| m.distance < max_distance).collect()
}
