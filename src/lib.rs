pub mod ai;
pub mod database;
pub mod error;
pub mod server;
pub mod utilities;

pub use ai::{
    CannedPredictor, EmbryoPredictor, QueryFeatures, ResnetPredictor, SearchEngine,
    SimilaritySpec,
};
pub use database::{snapshot, FeatureRecord, FeatureStore};
pub use error::{Result, SearchError};
