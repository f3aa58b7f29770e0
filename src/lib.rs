// THEORY:
// This file is the main entry point for the `coverage_vision` library crate.
//
// The public face of the engine is the `CoverageAnalyzer` (synchronous, one frame at a
// time) and the `ParallelPipeline` (the same analyzer on a tokio worker with latest-only
// frame delivery). Both produce an `AnalysisResult` per frame: motion, coverage ratio,
// stability, capture / completion decision and the remaining gaps.
//
// The per-frame building blocks (`core_modules`) stay public so integrators can swap
// in their own feature extractor or matcher, or drive a single stage on its own.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use config::{AnalyzerConfig, StabilityMode};
pub use core_modules::frame::Frame;
pub use error::{Result, VisionError};
pub use parallel_pipeline::ParallelPipeline;
pub use pipeline::{AnalysisResult, CaptureSignal, CoverageAnalyzer, GapRegion, Guidance, MotionEstimate};
