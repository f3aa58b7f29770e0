pub mod capture_decision;
pub mod coverage_map;
pub mod feature_extractor;
pub mod frame;
pub mod gap_detector;
pub mod matcher;
pub mod motion_estimator;
pub mod stability;
