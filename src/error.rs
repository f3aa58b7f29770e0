// THEORY:
// A single error enum for the whole engine. Per-frame errors are never fatal to a
// session: the pipeline converts them into a neutral result and keeps going. They
// exist as a type so collaborators (extractors, matchers) can report *what* went
// wrong and the orchestrator can log it before degrading.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VisionError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum VisionError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("frame buffer has {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },

    #[error("frame is {}x{}, session expects {}x{}", actual.0, actual.1, expected.0, expected.1)]
    FrameDimensions {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("feature extraction failed: {0}")]
    FeatureExtraction(String),

    #[error("descriptor matching failed: {0}")]
    Matching(String),

    #[error("analysis pipeline is closed")]
    PipelineClosed,
}
