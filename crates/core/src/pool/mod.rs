//! Write-once store of the named series produced by one analysis run.

use std::collections::HashMap;

use crate::{Result, TracksError};

/// A per-frame feature series.
#[derive(Debug, Clone, PartialEq)]
pub enum Series {
    /// One value per frame (or per detected instant, for time lists).
    Scalar(Vec<f32>),
    /// One vector per frame; vectors may differ in length.
    Vector(Vec<Vec<f32>>),
    /// One string label per frame.
    Label(Vec<String>),
}

impl Series {
    pub fn len(&self) -> usize {
        match self {
            Series::Scalar(values) => values.len(),
            Series::Vector(frames) => frames.len(),
            Series::Label(labels) => labels.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Series::Scalar(_) => "scalar",
            Series::Vector(_) => "vector",
            Series::Label(_) => "label",
        }
    }
}

/// Keyed feature store; the only handoff between planning and synthesis.
///
/// Keys are written at most once per run. All writes happen before the
/// synthesizer reads, so there is no interior mutability here.
#[derive(Debug, Default, Clone)]
pub struct FeaturePool {
    series: HashMap<String, Series>,
}

impl FeaturePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, series: Series) -> Result<()> {
        let key = key.into();
        if self.series.contains_key(&key) {
            return Err(TracksError::DuplicateFeature(key));
        }
        self.series.insert(key, series);
        Ok(())
    }

    pub fn has(&self, key: &str) -> bool {
        self.series.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Result<&Series> {
        self.series
            .get(key)
            .ok_or_else(|| TracksError::MissingFeature(key.to_string()))
    }

    /// Scalar series under `key`, if present with that shape.
    pub fn scalars(&self, key: &str) -> Option<&[f32]> {
        match self.series.get(key)? {
            Series::Scalar(values) => Some(values),
            _ => None,
        }
    }

    pub fn vectors(&self, key: &str) -> Option<&[Vec<f32>]> {
        match self.series.get(key)? {
            Series::Vector(frames) => Some(frames),
            _ => None,
        }
    }

    pub fn labels(&self, key: &str) -> Option<&[String]> {
        match self.series.get(key)? {
            Series::Label(labels) => Some(labels),
            _ => None,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_write_once() {
        let mut pool = FeaturePool::new();
        pool.put("loudness.values", Series::Scalar(vec![1.0])).unwrap();

        let err = pool
            .put("loudness.values", Series::Scalar(vec![2.0]))
            .unwrap_err();
        assert!(matches!(err, TracksError::DuplicateFeature(key) if key == "loudness.values"));
        assert_eq!(pool.scalars("loudness.values"), Some(&[1.0][..]));
    }

    #[test]
    fn typed_accessors_check_shape() {
        let mut pool = FeaturePool::new();
        pool.put("tonal.chords", Series::Label(vec!["C".into()])).unwrap();

        assert!(pool.has("tonal.chords"));
        assert!(pool.labels("tonal.chords").is_some());
        assert!(pool.scalars("tonal.chords").is_none());
        assert!(matches!(pool.get("absent"), Err(TracksError::MissingFeature(_))));
    }
}
