//! In-memory table of precomputed predictions for every indexed database
//! image, stored as parallel columns. Index i refers to the same image in
//! every column; every mutation has to keep that alignment.

pub mod snapshot;

pub use snapshot::Snapshot;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};

/// One image's precomputed features, as produced by the refresh job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub filename: String,
    pub stage: f32,
    pub locations: Vec<f32>,
}

/// Parallel-array feature table: filenames, stage scalars, and a flat
/// row-major locations matrix with `num_locations` stride.
#[derive(Debug, Clone)]
pub struct FeatureStore {
    filenames: Vec<String>,
    stages: Vec<f32>,
    locations: Vec<f32>,
    num_locations: usize,
}

impl FeatureStore {
    pub fn new(num_locations: usize) -> Self {
        Self {
            filenames: Vec::new(),
            stages: Vec::new(),
            locations: Vec::new(),
            num_locations,
        }
    }

    pub fn from_columns(
        filenames: Vec<String>,
        stages: Vec<f32>,
        locations: Vec<f32>,
        num_locations: usize,
    ) -> Result<Self> {
        let store = Self {
            filenames,
            stages,
            locations,
            num_locations,
        };
        store.validate()?;
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.filenames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filenames.is_empty()
    }

    pub fn num_locations(&self) -> usize {
        self.num_locations
    }

    pub fn filenames(&self) -> &[String] {
        &self.filenames
    }

    pub fn stages(&self) -> &[f32] {
        &self.stages
    }

    /// Row i of the locations matrix.
    pub fn location_row(&self, i: usize) -> &[f32] {
        let start = i * self.num_locations;
        &self.locations[start..start + self.num_locations]
    }

    pub(crate) fn locations_flat(&self) -> &[f32] {
        &self.locations
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.filenames.iter().any(|f| f == filename)
    }

    /// Append a batch of records. The whole batch is validated before any
    /// column is touched, so a bad record leaves the store unchanged and
    /// no reader can observe a partially extended table.
    pub fn append_batch(&mut self, batch: Vec<FeatureRecord>) -> Result<()> {
        for rec in &batch {
            if rec.locations.len() != self.num_locations {
                return Err(SearchError::Config(format!(
                    "record '{}' has {} location values, store expects {}",
                    rec.filename,
                    rec.locations.len(),
                    self.num_locations
                )));
            }
        }
        for rec in batch {
            self.filenames.push(rec.filename);
            self.stages.push(rec.stage);
            self.locations.extend_from_slice(&rec.locations);
        }
        debug_assert!(self.validate().is_ok());
        Ok(())
    }

    /// Check positional alignment across all three columns.
    pub fn validate(&self) -> Result<()> {
        if self.stages.len() != self.filenames.len() {
            return Err(SearchError::Snapshot(format!(
                "{} filenames but {} stage predictions",
                self.filenames.len(),
                self.stages.len()
            )));
        }
        if self.locations.len() != self.filenames.len() * self.num_locations {
            return Err(SearchError::Snapshot(format!(
                "locations matrix has {} values, expected {} rows x {} columns",
                self.locations.len(),
                self.filenames.len(),
                self.num_locations
            )));
        }
        Ok(())
    }
}
