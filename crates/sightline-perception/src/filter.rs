//! Confidence filtering and label extraction for raw detector output.

use std::collections::BTreeSet;

use sightline_types::{Detection, SightError};

/// Drops detections whose confidence is strictly below a threshold.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceFilter {
    threshold: f32,
}

impl ConfidenceFilter {
    /// # Errors
    ///
    /// Returns [`SightError::Config`] unless `threshold` lies in `[0.0, 1.0]`.
    pub fn new(threshold: f32) -> Result<Self, SightError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(SightError::Config(format!(
                "confidence threshold must be within [0, 1], got {threshold}"
            )));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Keep only detections with `confidence >= threshold`, preserving order.
    pub fn apply(&self, detections: Vec<Detection>) -> Vec<Detection> {
        detections
            .into_iter()
            .filter(|d| d.confidence >= self.threshold)
            .collect()
    }
}

/// The distinct labels present in `detections`.
///
/// Callers must treat the result as an unordered set; the sorted order is
/// an artefact of the container.
pub fn distinct_labels(detections: &[Detection]) -> BTreeSet<String> {
    detections.iter().map(|d| d.label.clone()).collect()
}
