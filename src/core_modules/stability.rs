use crate::config::StabilityMode;
use crate::core_modules::motion_estimator::MotionEstimate;

/// Decides whether a motion estimate means the device is effectively stationary.
///
/// `confidence` is not consulted: a zero-confidence estimate (matching failed) reads as
/// zero motion and is reported stable, exactly like a well-matched still frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilityClassifier {
    mode: StabilityMode,
}

impl StabilityClassifier {
    pub fn new(mode: StabilityMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> StabilityMode {
        self.mode
    }

    pub fn is_stable(&self, motion: &MotionEstimate) -> bool {
        let magnitude = motion.magnitude();
        let rotation = motion.rotation_degrees.abs();
        match self.mode {
            StabilityMode::SharedThreshold(threshold) => {
                magnitude < threshold && rotation < threshold
            }
            StabilityMode::PerAxis {
                max_translation_px,
                max_rotation_deg,
            } => magnitude < max_translation_px && rotation < max_rotation_deg,
        }
    }
}

impl Default for StabilityClassifier {
    fn default() -> Self {
        Self::new(StabilityMode::default())
    }
}
