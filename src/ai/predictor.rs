//! The inference boundary. The trained stage and locations models are
//! opaque oracles behind this trait: one image in, one (stage scalar,
//! location-probability vector) pair out.

use crate::error::Result;

/// Per-query features produced by the predictors. `stage` is the raw model
/// output; `locations` has one sigmoid-squashed probability per anatomical
/// location class.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFeatures {
    pub stage: f32,
    pub locations: Vec<f32>,
}

pub trait EmbryoPredictor: Send + Sync {
    /// Number of anatomical location classes the locations model emits.
    /// Must match the feature store's dimensionality.
    fn num_locations(&self) -> usize;

    /// Predict on decodable image bytes. Undecodable input is an
    /// `InvalidImage` error, never a silent zero prediction.
    fn predict(&self, image_bytes: &[u8]) -> Result<QueryFeatures>;
}

/// Test double returning fixed predictions, so engine and service tests do
/// not depend on real model artifacts.
#[derive(Debug, Clone)]
pub struct CannedPredictor {
    pub features: QueryFeatures,
}

impl CannedPredictor {
    pub fn new(stage: f32, locations: Vec<f32>) -> Self {
        Self {
            features: QueryFeatures { stage, locations },
        }
    }
}

impl EmbryoPredictor for CannedPredictor {
    fn num_locations(&self) -> usize {
        self.features.locations.len()
    }

    fn predict(&self, image_bytes: &[u8]) -> Result<QueryFeatures> {
        // Still reject garbage input: the contract is the same as the real
        // predictor's.
        image::load_from_memory(image_bytes)
            .map_err(|e| crate::error::SearchError::InvalidImage(e.to_string()))?;
        Ok(self.features.clone())
    }
}
