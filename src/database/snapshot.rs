//! Persisted snapshot of the feature store. One bincode file holding the
//! three parallel columns, loaded wholesale at startup and rewritten
//! atomically by the refresh job.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};

use super::FeatureStore;

/// On-disk layout. `version`/`created_at` are informational; alignment is
/// re-validated on every load.
#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: String,
    pub created_at: String,
    pub num_locations: usize,
    pub filenames: Vec<String>,
    pub stages: Vec<f32>,
    pub locations: Vec<f32>,
}

impl Snapshot {
    pub fn from_store(store: &FeatureStore) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            num_locations: store.num_locations(),
            filenames: store.filenames().to_vec(),
            stages: store.stages().to_vec(),
            locations: store.locations_flat().to_vec(),
        }
    }

    pub fn into_store(self) -> Result<FeatureStore> {
        FeatureStore::from_columns(
            self.filenames,
            self.stages,
            self.locations,
            self.num_locations,
        )
    }
}

/// Load the snapshot file and validate positional alignment.
pub fn load(path: &Path) -> Result<FeatureStore> {
    let bytes = std::fs::read(path).map_err(|e| {
        SearchError::Snapshot(format!("failed to read {}: {e}", path.display()))
    })?;
    let snapshot: Snapshot = bincode::deserialize(&bytes)?;
    let store = snapshot.into_store()?;
    log::info!(
        "[store] loaded snapshot from {} ({} images, {} location classes)",
        path.display(),
        store.len(),
        store.num_locations()
    );
    Ok(store)
}

/// Write the snapshot next to its destination and rename into place, so an
/// interrupted refresh leaves the previous snapshot intact.
pub fn save(path: &Path, store: &FeatureStore) -> Result<()> {
    store.validate()?;
    let tmp = path.with_extension("tmp");
    {
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, &Snapshot::from_store(store))?;
    }
    std::fs::rename(&tmp, path)?;
    log::info!(
        "[store] saved snapshot to {} ({} images)",
        path.display(),
        store.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::FeatureRecord;

    fn sample_store() -> FeatureStore {
        let mut store = FeatureStore::new(2);
        store
            .append_batch(vec![
                FeatureRecord {
                    filename: "a.jpg".into(),
                    stage: 10.0,
                    locations: vec![0.1, 0.9],
                },
                FeatureRecord {
                    filename: "b.jpg".into(),
                    stage: 12.5,
                    locations: vec![0.7, 0.3],
                },
            ])
            .unwrap();
        store
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predictions.bin");
        let store = sample_store();
        save(&path, &store).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.filenames(), store.filenames());
        assert_eq!(loaded.stages(), store.stages());
        assert_eq!(loaded.location_row(0), store.location_row(0));
        assert_eq!(loaded.num_locations(), 2);
        // No temp file left behind after the rename.
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn save_replaces_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predictions.bin");
        let mut store = sample_store();
        save(&path, &store).unwrap();
        store
            .append_batch(vec![FeatureRecord {
                filename: "c.jpg".into(),
                stage: 9.0,
                locations: vec![0.0, 0.0],
            }])
            .unwrap();
        save(&path, &store).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.len(), 3);
    }

    #[test]
    fn missing_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("nope.bin")).unwrap_err();
        assert!(matches!(err, SearchError::Snapshot(_)));
    }
}
