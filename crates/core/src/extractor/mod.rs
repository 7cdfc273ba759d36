//! Capability interface to the feature extraction backend.
//!
//! The planner hands a backend one [`PassPlan`] at a time; the backend decodes
//! the source once for that pass, runs the listed computations, honours the
//! routes (draining discarded ports) and returns the series routed to the
//! pool. Tests substitute fakes; [`NativeExtractor`] is the built-in backend.

mod native;
mod segment;

pub use native::NativeExtractor;
pub use segment::NoveltySegmenter;

use std::path::Path;

use crate::planner::PassPlan;
use crate::{Result, Series};

/// Series produced by one pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassOutput {
    /// `(pool key, series)` pairs for routes that end in the pool.
    pub series: Vec<(String, Series)>,
    /// Number of samples decoded at the analysis rate, when the pass decodes.
    pub samples_decoded: Option<u64>,
}

impl PassOutput {
    pub fn push(&mut self, key: impl Into<String>, series: Series) {
        self.series.push((key.into(), series));
    }
}

/// Black-box feature extraction backend.
pub trait FeatureExtractor {
    fn run_pass(&mut self, source: &Path, plan: &PassPlan) -> Result<PassOutput>;

    /// Get the name of this extractor (for logging)
    fn name(&self) -> &'static str;
}

/// Statistical segmentation over a feature matrix (one vector per frame).
pub trait Segmenter {
    /// Returns boundary frame indices, including the first and the last
    /// frame as implicit boundaries.
    fn segment(&self, features: &[Vec<f32>]) -> Vec<usize>;
}
