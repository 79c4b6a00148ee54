//! Source image handling: format detection and analysis.

mod analysis;
mod types;

pub use analysis::{ImageAnalysis, ImageAnalyzer, ImageAnalyzerBuilder, ANALYSIS_MODEL};
pub use types::ImageFormat;
