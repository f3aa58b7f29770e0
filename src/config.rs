// THEORY:
// `AnalyzerConfig` is the one place where every tunable constant of the coverage
// engine lives. The values mirror the behavior operators have calibrated against;
// changing a default changes when sessions complete, so defaults are conservative
// and alternatives are opt-in.

use crate::error::{Result, VisionError};

/// How the stability classifier turns a motion estimate into a stable / unstable verdict.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StabilityMode {
    /// One threshold compared against both the translation magnitude (pixels) and the
    /// absolute rotation (degrees). Compatibility mode: the units do not agree.
    SharedThreshold(f64),
    /// Separately calibrated thresholds for translation and rotation.
    PerAxis {
        max_translation_px: f64,
        max_rotation_deg: f64,
    },
}

impl Default for StabilityMode {
    fn default() -> Self {
        StabilityMode::SharedThreshold(0.5)
    }
}

/// Configuration for the `CoverageAnalyzer`, allowing for tunable behavior.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AnalyzerConfig {
    /// Upper bound on keypoints kept per frame (strongest first).
    pub max_features: usize,
    /// FAST-9 intensity threshold used by the default extractor.
    pub fast_threshold: u8,
    /// Below this many raw matches no motion is asserted.
    pub min_raw_matches: usize,
    /// Below this many distance-filtered matches no motion is asserted.
    pub min_filtered_matches: usize,
    /// Matches must have a Hamming distance strictly below this value to survive filtering.
    pub max_match_distance: u32,
    /// At most this many filtered matches feed the rotation estimate.
    pub rotation_window: usize,
    /// Gap rectangles must have an area strictly greater than this (px²).
    pub min_gap_area: u32,
    /// Coverage ratio at which a session is considered complete.
    pub completion_threshold: f64,
    pub stability: StabilityMode,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            max_features: 500,
            fast_threshold: 20,
            min_raw_matches: 10,
            min_filtered_matches: 5,
            max_match_distance: 50,
            rotation_window: 10,
            min_gap_area: 100,
            completion_threshold: 0.85,
            stability: StabilityMode::default(),
        }
    }
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_features == 0 {
            return Err(VisionError::InvalidConfig("max_features must be positive".into()));
        }
        if self.min_raw_matches == 0 || self.min_filtered_matches == 0 {
            return Err(VisionError::InvalidConfig(
                "match evidence gates must be positive".into(),
            ));
        }
        if self.min_filtered_matches > self.min_raw_matches {
            return Err(VisionError::InvalidConfig(format!(
                "min_filtered_matches ({}) exceeds min_raw_matches ({})",
                self.min_filtered_matches, self.min_raw_matches
            )));
        }
        if self.rotation_window < 2 {
            return Err(VisionError::InvalidConfig(
                "rotation_window needs at least two matches".into(),
            ));
        }
        if !(self.completion_threshold > 0.0 && self.completion_threshold <= 1.0) {
            return Err(VisionError::InvalidConfig(format!(
                "completion_threshold {} is outside (0, 1]",
                self.completion_threshold
            )));
        }
        match self.stability {
            StabilityMode::SharedThreshold(t) if !(t >= 0.0) => Err(VisionError::InvalidConfig(
                format!("stability threshold {t} must be non-negative"),
            )),
            StabilityMode::PerAxis {
                max_translation_px,
                max_rotation_deg,
            } if !(max_translation_px >= 0.0 && max_rotation_deg >= 0.0) => {
                Err(VisionError::InvalidConfig(
                    "per-axis stability thresholds must be non-negative".into(),
                ))
            }
            _ => Ok(()),
        }
    }
}
