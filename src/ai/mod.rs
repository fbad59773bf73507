pub mod predictor;
pub mod resnet;
pub mod similarity;

pub use predictor::{CannedPredictor, EmbryoPredictor, QueryFeatures};
pub use resnet::ResnetPredictor;
pub use similarity::{LocationMetric, SimilaritySpec, StageMetric};

use std::sync::RwLock;

use crate::database::{FeatureRecord, FeatureStore};
use crate::error::{Result, SearchError};

/// Explicitly owned search context: the loaded predictors, the feature
/// store and the similarity configuration. Constructed once at startup and
/// passed to the service; there is no process-wide singleton.
///
/// `rank` itself is pure, so any number of in-flight queries may read the
/// store concurrently; appends from the refresh path take the write lock
/// and no reader can observe a partially extended table.
pub struct SearchEngine {
    predictor: Box<dyn EmbryoPredictor>,
    store: RwLock<FeatureStore>,
    similarity: SimilaritySpec,
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine")
            .field("similarity", &self.similarity)
            .finish_non_exhaustive()
    }
}

impl SearchEngine {
    pub fn new(
        predictor: Box<dyn EmbryoPredictor>,
        store: FeatureStore,
        similarity: SimilaritySpec,
    ) -> Result<Self> {
        if predictor.num_locations() != store.num_locations() {
            return Err(SearchError::Config(format!(
                "locations model emits {} classes, snapshot was built with {}",
                predictor.num_locations(),
                store.num_locations()
            )));
        }
        Ok(Self {
            predictor,
            store: RwLock::new(store),
            similarity,
        })
    }

    pub fn store_len(&self) -> usize {
        self.store.read().expect("store lock poisoned").len()
    }

    /// Predict on the query image and rank the whole database against it.
    /// Returns every stored filename, most similar first.
    pub fn search_bytes(&self, image_bytes: &[u8]) -> Result<Vec<String>> {
        let features = self.predictor.predict(image_bytes)?;
        log::info!(
            "[search] query predicted: stage {:.2}, {} location probabilities",
            features.stage,
            features.locations.len()
        );
        let store = self.store.read().expect("store lock poisoned");
        self.similarity.rank(&features, &store)
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.store.read().expect("store lock poisoned").contains(filename)
    }

    /// Exclusive-access append; in-flight queries finish against the old
    /// table before the new records become visible.
    pub fn append_records(&self, batch: Vec<FeatureRecord>) -> Result<usize> {
        let appended = batch.len();
        let mut store = self.store.write().expect("store lock poisoned");
        store.append_batch(batch)?;
        Ok(appended)
    }
}
