//! Page layout analysis: region detection, labelling, and the formula pre-filter.

pub mod classifier;
pub mod heuristic;
pub mod types;

pub use classifier::{DEFAULT_CONFIDENCE_THRESHOLD, RegionClassifier};
pub use heuristic::{FormulaHeuristic, FormulaVerdict, count_math_indicators, has_math_signal};
pub use types::{
    BoundingBox, DetectionError, LayoutDetector, OcrEngine, OcrError, Page, RawDetection, Region,
    RegionLabel,
};
