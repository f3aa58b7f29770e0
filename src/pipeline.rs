// THEORY:
// The `pipeline` module is the top-level API of the coverage engine. It wires the
// per-frame stages together and owns the session lifecycle.
//
// Key architectural principles:
// 1.  **Explicit state threading**: Everything a session remembers (previous features,
//     coverage map, capture state) lives in `SessionState`. `PipelineStages::analyze_frame`
//     takes the state by value and hands back the next state together with the result,
//     so the whole pipeline can be driven and tested without a live analyzer.
// 2.  **Single-frame history**: Only the previous frame's features are kept. There is
//     no sliding window.
// 3.  **Degrade, never fail**: A frame whose features cannot be extracted is skipped
//     with a warning and a neutral result. No per-frame error ends a session.
// 4.  **Owned buffers**: The coverage rasters and feature buffers belong to the session
//     state. Resetting or shutting down drops them immediately.

use crate::config::AnalyzerConfig;
use crate::core_modules::capture_decision::{self, CaptureState};
use crate::core_modules::coverage_map::CoverageMap;
use crate::core_modules::feature_extractor::{FeatureExtractor, OrientedBriefExtractor};
use crate::core_modules::frame::{FeatureSet, Frame};
use crate::core_modules::gap_detector::gap_detector;
use crate::core_modules::matcher::{BruteForceHamming, DescriptorMatcher};
use crate::core_modules::motion_estimator::MotionEstimator;
use crate::core_modules::stability::StabilityClassifier;
use crate::error::{Result, VisionError};
use image::RgbImage;
use std::time::Instant;

// Re-export key data structures for the public API.
pub use crate::core_modules::capture_decision::Transition;
pub use crate::core_modules::gap_detector::GapRegion;
pub use crate::core_modules::motion_estimator::MotionEstimate;

/// What the guidance renderer needs to steer the operator.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Guidance {
    /// Horizontal motion as a fraction of frame width.
    pub normalized_dx: f64,
    /// Vertical motion as a fraction of frame height.
    pub normalized_dy: f64,
    /// `1 - coverage_ratio`: how much of the surface is still missing.
    pub distance_to_target: f64,
    pub is_stable: bool,
}

/// Forwarded to the external capture collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureSignal {
    pub session_id: u64,
    pub frame_sequence: u64,
    pub timestamp: Instant,
}

/// The per-frame output of the coverage engine. Produced fresh for every frame.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    /// Session the frame was analyzed in. Results from an older session are stale.
    pub session_id: u64,
    pub frame_sequence: u64,
    pub timestamp: Instant,
    pub frame_width: u32,
    pub frame_height: u32,
    pub motion: MotionEstimate,
    pub coverage_ratio: f64,
    pub is_stable: bool,
    pub should_capture: bool,
    /// The session has reached the completion threshold (sticky until reset).
    pub is_complete: bool,
    pub gaps: Vec<GapRegion>,
}

impl AnalysisResult {
    pub fn coverage_percent(&self) -> f64 {
        self.coverage_ratio * 100.0
    }

    pub fn guidance(&self) -> Guidance {
        let normalize = |delta: f64, extent: u32| {
            if extent == 0 { 0.0 } else { delta / extent as f64 }
        };
        Guidance {
            normalized_dx: normalize(self.motion.delta_x, self.frame_width),
            normalized_dy: normalize(self.motion.delta_y, self.frame_height),
            distance_to_target: 1.0 - self.coverage_ratio,
            is_stable: self.is_stable,
        }
    }

    pub fn capture_signal(&self) -> Option<CaptureSignal> {
        self.should_capture.then_some(CaptureSignal {
            session_id: self.session_id,
            frame_sequence: self.frame_sequence,
            timestamp: self.timestamp,
        })
    }
}

/// Everything one session remembers between frames.
pub struct SessionState {
    session_id: u64,
    previous_features: Option<FeatureSet>,
    coverage: Option<CoverageMap>,
    capture: CaptureState,
    frames_analyzed: u64,
}

impl SessionState {
    pub fn new(session_id: u64) -> Self {
        Self {
            session_id,
            previous_features: None,
            coverage: None,
            capture: CaptureState::Seeking,
            frames_analyzed: 0,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn coverage(&self) -> Option<&CoverageMap> {
        self.coverage.as_ref()
    }

    pub fn coverage_ratio(&self) -> f64 {
        self.coverage.as_ref().map_or(0.0, CoverageMap::ratio)
    }

    pub fn capture_state(&self) -> CaptureState {
        self.capture
    }

    pub fn is_complete(&self) -> bool {
        self.capture == CaptureState::Complete
    }

    pub fn frames_analyzed(&self) -> u64 {
        self.frames_analyzed
    }

    /// Frames must keep the resolution the session started with.
    fn check_dimensions(&self, frame: &Frame) -> Result<()> {
        match &self.coverage {
            Some(map) if map.dimensions() != frame.dimensions() => {
                Err(VisionError::FrameDimensions {
                    expected: map.dimensions(),
                    actual: frame.dimensions(),
                })
            }
            _ => Ok(()),
        }
    }

    fn neutral_result(&self, frame: &Frame, gaps: Vec<GapRegion>) -> AnalysisResult {
        AnalysisResult {
            session_id: self.session_id,
            frame_sequence: frame.sequence,
            timestamp: frame.timestamp,
            frame_width: frame.width(),
            frame_height: frame.height(),
            motion: MotionEstimate::ZERO,
            coverage_ratio: self.coverage_ratio(),
            is_stable: false,
            should_capture: false,
            is_complete: self.is_complete(),
            gaps,
        }
    }
}

/// The stateless half of the engine: collaborators and tuning, no session memory.
pub struct PipelineStages {
    config: AnalyzerConfig,
    extractor: Box<dyn FeatureExtractor>,
    motion_estimator: MotionEstimator,
    stability: StabilityClassifier,
}

impl PipelineStages {
    pub fn new(
        config: AnalyzerConfig,
        extractor: Box<dyn FeatureExtractor>,
        matcher: Box<dyn DescriptorMatcher>,
    ) -> Self {
        Self {
            motion_estimator: MotionEstimator::new(&config, matcher),
            stability: StabilityClassifier::new(config.stability),
            extractor,
            config,
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Runs one frame through the pipeline and returns the next session state.
    pub fn analyze_frame(
        &mut self,
        mut state: SessionState,
        frame: &Frame,
    ) -> (SessionState, AnalysisResult) {
        // Stage 0: Guard the session's fixed resolution.
        if let Err(err) = state.check_dimensions(frame) {
            log::warn!("frame {} skipped: {err}", frame.sequence);
            let result = state.neutral_result(frame, Vec::new());
            return (state, result);
        }

        // Stage 1: Feature Extraction
        let current = match self.extractor.extract(frame) {
            Ok(features) => features,
            Err(err) => {
                log::warn!("frame {} skipped: {err}", frame.sequence);
                let gaps = self.gaps(&state);
                let result = state.neutral_result(frame, gaps);
                return (state, result);
            }
        };
        state.frames_analyzed += 1;

        // The first frame of a session only seeds the history.
        let Some(previous) = state.previous_features.take() else {
            let (width, height) = frame.dimensions();
            state.previous_features = Some(current);
            state.coverage = Some(CoverageMap::new(width, height));
            log::info!(
                "session {} started at {}x{} (frame {})",
                state.session_id,
                width,
                height,
                frame.sequence
            );
            let result = state.neutral_result(frame, Vec::new());
            return (state, result);
        };

        // Stage 2: Motion Estimation
        let motion = self.motion_estimator.estimate(&previous, &current);
        state.previous_features = Some(current);

        // Stage 3: Coverage Accumulation
        let coverage = state.coverage.get_or_insert_with(|| {
            let (width, height) = frame.dimensions();
            CoverageMap::new(width, height)
        });
        coverage.update(&motion);
        let coverage_ratio = coverage.ratio();

        // Stage 4: Gap Detection
        let gaps = gap_detector::find_gaps(Some(coverage.mask()), self.config.min_gap_area);

        // Stage 5: Stability
        let is_stable = self.stability.is_stable(&motion);

        // Stage 6: Capture / Completion Decision
        let was_complete = state.is_complete();
        let step = capture_decision::transition(
            state.capture,
            is_stable,
            coverage_ratio,
            self.config.completion_threshold,
        );
        state.capture = step.next;
        if step.should_capture() {
            log::info!(
                "session {}: capture at frame {} ({:.1}% covered)",
                state.session_id,
                frame.sequence,
                coverage_ratio * 100.0
            );
        }
        if step.is_complete() && !was_complete {
            log::info!(
                "session {} complete at frame {} ({:.1}% covered)",
                state.session_id,
                frame.sequence,
                coverage_ratio * 100.0
            );
        }
        log::debug!(
            "frame {}: motion ({:.2}, {:.2}, {:.2}°) conf {:.2}, ratio {:.4}, {} gaps, stable {}",
            frame.sequence,
            motion.delta_x,
            motion.delta_y,
            motion.rotation_degrees,
            motion.confidence,
            coverage_ratio,
            gaps.len(),
            is_stable
        );

        let result = AnalysisResult {
            session_id: state.session_id,
            frame_sequence: frame.sequence,
            timestamp: frame.timestamp,
            frame_width: frame.width(),
            frame_height: frame.height(),
            motion,
            coverage_ratio,
            is_stable,
            should_capture: step.should_capture(),
            is_complete: step.is_complete(),
            gaps,
        };
        (state, result)
    }

    fn gaps(&self, state: &SessionState) -> Vec<GapRegion> {
        gap_detector::find_gaps(
            state.coverage().map(CoverageMap::mask),
            self.config.min_gap_area,
        )
    }
}

/// The main, top-level struct for the coverage engine. Owns one session at a time.
pub struct CoverageAnalyzer {
    stages: PipelineStages,
    state: SessionState,
}

impl CoverageAnalyzer {
    /// An analyzer with the bundled ORB-style extractor and brute-force Hamming matcher.
    pub fn new(config: AnalyzerConfig) -> Result<Self> {
        let extractor = OrientedBriefExtractor::new(config.max_features, config.fast_threshold);
        Self::with_collaborators(config, Box::new(extractor), Box::new(BruteForceHamming))
    }

    pub fn with_collaborators(
        config: AnalyzerConfig,
        extractor: Box<dyn FeatureExtractor>,
        matcher: Box<dyn DescriptorMatcher>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            stages: PipelineStages::new(config, extractor, matcher),
            state: SessionState::new(0),
        })
    }

    pub fn config(&self) -> &AnalyzerConfig {
        self.stages.config()
    }

    pub fn analyze(&mut self, frame: &Frame) -> AnalysisResult {
        let session_id = self.state.session_id;
        let state = std::mem::replace(&mut self.state, SessionState::new(session_id));
        let (state, result) = self.stages.analyze_frame(state, frame);
        self.state = state;
        result
    }

    /// Drops all session memory and starts a fresh session with the next id.
    pub fn reset(&mut self) {
        let next = self.state.session_id.wrapping_add(1);
        self.begin_session(next);
    }

    /// Starts a fresh session with an explicit id, releasing the old session's buffers.
    pub fn begin_session(&mut self, session_id: u64) {
        let old = std::mem::replace(&mut self.state, SessionState::new(session_id));
        log::info!(
            "session {} reset after {} frames ({:.1}% covered), now session {}",
            old.session_id,
            old.frames_analyzed,
            old.coverage_ratio() * 100.0,
            session_id
        );
        drop(old);
    }

    pub fn session_id(&self) -> u64 {
        self.state.session_id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn coverage_ratio(&self) -> f64 {
        self.state.coverage_ratio()
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    pub fn gaps(&self) -> Vec<GapRegion> {
        self.stages.gaps(&self.state)
    }

    /// Pull-based heatmap of the current coverage. `None` before the first frame.
    pub fn heatmap(&self) -> Option<RgbImage> {
        self.state.coverage().map(CoverageMap::heatmap)
    }

    /// Ends the session and releases every buffer it owned.
    pub fn shutdown(self) {
        log::info!(
            "session {} shut down after {} frames",
            self.state.session_id,
            self.state.frames_analyzed
        );
    }
}
