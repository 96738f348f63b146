//! Scene analysis: batched detector orchestration producing plans.

pub mod batch;
pub mod engine;

pub use batch::{BatchAnalyzerFn, BatchProcessor, BatchProgressFn};
pub use engine::{AnalysisEngine, AnalysisOptions};
