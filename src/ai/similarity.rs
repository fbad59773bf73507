//! Similarity ranking over the feature store.
//!
//! A query embryo is compared with every database embryo on two axes:
//! developmental stage and anatomical staining locations. Each axis yields
//! a score vector over the whole store (higher = more similar). The two
//! vectors live on unrelated scales, so each is normalized into z-scores
//! before an alpha-weighted linear combination decides the final ranking.

use crate::ai::predictor::QueryFeatures;
use crate::database::FeatureStore;
use crate::error::{Result, SearchError};

/// Stage similarity algorithms. Scores must increase with similarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageMetric {
    /// Negative absolute stage difference: an exact stage match scores 0,
    /// everything else below it. Raw stage units, no normalization here.
    NegAbsDiff,
}

impl StageMetric {
    pub fn scores(&self, query_stage: f32, stages: &[f32]) -> Vec<f32> {
        match self {
            StageMetric::NegAbsDiff => {
                stages.iter().map(|s| -(query_stage - s).abs()).collect()
            }
        }
    }
}

/// Locations similarity algorithms. Scores must increase with similarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationMetric {
    /// Euclidean similarity `1 / (1 + distance)` over the raw probability
    /// vectors, mapping distance 0 to 1 and staying in (0, 1]. The vectors
    /// are deliberately not re-normalized to unit length.
    Euclidean,
}

impl LocationMetric {
    pub fn scores(&self, query_locations: &[f32], store: &FeatureStore) -> Vec<f32> {
        match self {
            LocationMetric::Euclidean => (0..store.len())
                .map(|i| {
                    let dist = euclidean_distance(query_locations, store.location_row(i));
                    1.0 / (1.0 + dist)
                })
                .collect(),
        }
    }
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Normalize a score vector to mean 0 and population standard deviation 1,
/// in place. A zero-variance vector (every database image equally similar
/// on this axis, e.g. a store of size 1) is left as all zeros after
/// centering instead of dividing by zero; ranking then falls back to the
/// other axis or to store order.
pub fn zscore(scores: &mut [f32]) {
    if scores.is_empty() {
        return;
    }
    let n = scores.len() as f32;
    let mean = scores.iter().sum::<f32>() / n;
    let variance = scores.iter().map(|s| (s - mean) * (s - mean)).sum::<f32>() / n;
    let std = variance.sqrt();
    if std > 0.0 {
        for s in scores.iter_mut() {
            *s = (*s - mean) / std;
        }
    } else {
        for s in scores.iter_mut() {
            *s = 0.0;
        }
    }
}

/// The similarity algorithm as an explicit configuration: which score to
/// use per axis, and how much weight the stage axis carries.
#[derive(Debug, Clone, Copy)]
pub struct SimilaritySpec {
    pub stage: StageMetric,
    pub locations: LocationMetric,
    /// Weight of stage similarity in [0, 1]; locations get `1 - alpha`.
    pub alpha: f32,
}

impl Default for SimilaritySpec {
    fn default() -> Self {
        Self {
            stage: StageMetric::NegAbsDiff,
            locations: LocationMetric::Euclidean,
            alpha: 0.5,
        }
    }
}

impl SimilaritySpec {
    pub fn with_alpha(alpha: f32) -> Self {
        Self {
            alpha,
            ..Self::default()
        }
    }

    fn validate(&self, query: &QueryFeatures, store: &FeatureStore) -> Result<()> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(SearchError::Config(format!(
                "alpha must be within [0, 1], got {}",
                self.alpha
            )));
        }
        if query.locations.len() != store.num_locations() {
            return Err(SearchError::Config(format!(
                "query has {} location values, store expects {}",
                query.locations.len(),
                store.num_locations()
            )));
        }
        Ok(())
    }

    /// Combined z-scored similarity of the query against every record, in
    /// store order.
    pub fn combined_scores(
        &self,
        query: &QueryFeatures,
        store: &FeatureStore,
    ) -> Result<Vec<f32>> {
        self.validate(query, store)?;
        let mut stage_sims = self.stage.scores(query.stage, store.stages());
        let mut location_sims = self.locations.scores(&query.locations, store);
        debug_assert_eq!(stage_sims.len(), location_sims.len());
        zscore(&mut stage_sims);
        zscore(&mut location_sims);
        Ok(stage_sims
            .iter()
            .zip(&location_sims)
            .map(|(s, l)| self.alpha * s + (1.0 - self.alpha) * l)
            .collect())
    }

    /// Rank every stored filename by similarity to the query, most similar
    /// first. Returns the full permutation; truncation to top-n belongs to
    /// the caller. Exact ties keep store order for reproducible results.
    pub fn rank(&self, query: &QueryFeatures, store: &FeatureStore) -> Result<Vec<String>> {
        let combined = self.combined_scores(query, store)?;
        let mut order: Vec<usize> = (0..store.len()).collect();
        // Stable sort: equal scores stay in ascending index order.
        order.sort_by(|&a, &b| combined[b].total_cmp(&combined[a]));
        Ok(order
            .into_iter()
            .map(|i| store.filenames()[i].clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::FeatureRecord;

    fn store_of(records: &[(&str, f32, &[f32])]) -> FeatureStore {
        let mut store = FeatureStore::new(records[0].2.len());
        store
            .append_batch(
                records
                    .iter()
                    .map(|(name, stage, locations)| FeatureRecord {
                        filename: name.to_string(),
                        stage: *stage,
                        locations: locations.to_vec(),
                    })
                    .collect(),
            )
            .unwrap();
        store
    }

    fn query(stage: f32, locations: &[f32]) -> QueryFeatures {
        QueryFeatures {
            stage,
            locations: locations.to_vec(),
        }
    }

    #[test]
    fn zscore_normalizes_mean_and_std() {
        let mut v = vec![3.0, -1.0, 4.0, 1.0, -5.0, 9.0];
        zscore(&mut v);
        let n = v.len() as f32;
        let mean = v.iter().sum::<f32>() / n;
        let var = v.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / n;
        assert!(mean.abs() < 1e-6);
        assert!((var.sqrt() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn zscore_zero_variance_becomes_zeros() {
        let mut v = vec![2.5, 2.5, 2.5];
        zscore(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
        let mut single = vec![7.0];
        zscore(&mut single);
        assert_eq!(single, vec![0.0]);
    }

    #[test]
    fn rank_returns_full_permutation() {
        let store = store_of(&[
            ("a.jpg", 10.0, &[0.2, 0.8, 0.1]),
            ("b.jpg", 14.0, &[0.9, 0.1, 0.0]),
            ("c.jpg", 8.0, &[0.4, 0.4, 0.4]),
            ("d.jpg", 11.0, &[0.0, 0.0, 1.0]),
        ]);
        let q = query(10.5, &[0.3, 0.3, 0.3]);
        for alpha in [0.0, 0.25, 0.5, 0.75, 1.0] {
            let ranked = SimilaritySpec::with_alpha(alpha).rank(&q, &store).unwrap();
            let mut sorted = ranked.clone();
            sorted.sort();
            let mut expected: Vec<String> = store.filenames().to_vec();
            expected.sort();
            assert_eq!(sorted, expected, "alpha={alpha}");
        }
    }

    #[test]
    fn exact_match_ranks_first() {
        let store = store_of(&[
            ("far.jpg", 20.0, &[0.9, 0.9]),
            ("match.jpg", 12.0, &[0.1, 0.7]),
            ("near.jpg", 13.0, &[0.2, 0.6]),
        ]);
        let ranked = SimilaritySpec::default()
            .rank(&query(12.0, &[0.1, 0.7]), &store)
            .unwrap();
        assert_eq!(ranked[0], "match.jpg");
    }

    // The concrete scenario pinned in the design: query (stage 10,
    // loc [1,1]) against A(10,[0,0]) B(12,[1,1]) C(10,[1,1]) at alpha 0.5.
    // C matches on both axes and scores exactly 1/sqrt(2); A and B land in
    // an analytic tie at -1/(2*sqrt(2)), one winning on stage and the
    // other on locations.
    #[test]
    fn regression_scenario_abc() {
        let store = store_of(&[
            ("A", 10.0, &[0.0, 0.0]),
            ("B", 12.0, &[1.0, 1.0]),
            ("C", 10.0, &[1.0, 1.0]),
        ]);
        let q = query(10.0, &[1.0, 1.0]);
        let spec = SimilaritySpec::with_alpha(0.5);
        let scores = spec.combined_scores(&q, &store).unwrap();
        assert!((scores[2] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-5);
        assert!((scores[0] + 0.5 * std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-5);
        assert!((scores[0] - scores[1]).abs() < 1e-5);
        let ranked = spec.rank(&q, &store).unwrap();
        assert_eq!(ranked[0], "C");
        let mut tail: Vec<&str> = ranked[1..].iter().map(|s| s.as_str()).collect();
        tail.sort();
        assert_eq!(tail, ["A", "B"]);
    }

    // Two records with swapped advantages: one wins on stage, the other on
    // locations. alpha must decide which axis matters.
    #[test]
    fn alpha_extremes_select_the_axis() {
        let store = store_of(&[
            ("stage_win.jpg", 10.0, &[0.9, 0.9]),
            ("loc_win.jpg", 16.0, &[0.1, 0.1]),
        ]);
        let q = query(10.0, &[0.1, 0.1]);
        let by_stage = SimilaritySpec::with_alpha(1.0).rank(&q, &store).unwrap();
        assert_eq!(by_stage[0], "stage_win.jpg");
        let by_locations = SimilaritySpec::with_alpha(0.0).rank(&q, &store).unwrap();
        assert_eq!(by_locations[0], "loc_win.jpg");
    }

    #[test]
    fn stage_distance_is_monotone_at_alpha_one() {
        let store = store_of(&[
            ("d3.jpg", 13.0, &[0.5]),
            ("d0.jpg", 10.0, &[0.5]),
            ("d7.jpg", 17.0, &[0.5]),
            ("d1.jpg", 11.0, &[0.5]),
        ]);
        let ranked = SimilaritySpec::with_alpha(1.0)
            .rank(&query(10.0, &[0.5]), &store)
            .unwrap();
        assert_eq!(ranked, ["d0.jpg", "d1.jpg", "d3.jpg", "d7.jpg"]);
    }

    #[test]
    fn exact_ties_keep_store_order() {
        let store = store_of(&[
            ("twin1.jpg", 11.0, &[0.3, 0.3]),
            ("other.jpg", 15.0, &[0.9, 0.0]),
            ("twin2.jpg", 11.0, &[0.3, 0.3]),
        ]);
        let ranked = SimilaritySpec::default()
            .rank(&query(11.0, &[0.3, 0.3]), &store)
            .unwrap();
        assert_eq!(ranked, ["twin1.jpg", "twin2.jpg", "other.jpg"]);
    }

    #[test]
    fn rank_is_idempotent() {
        let store = store_of(&[
            ("a.jpg", 10.0, &[0.2, 0.8]),
            ("b.jpg", 14.0, &[0.9, 0.1]),
            ("c.jpg", 8.0, &[0.4, 0.4]),
        ]);
        let spec = SimilaritySpec::default();
        let q = query(11.0, &[0.5, 0.5]);
        let first = spec.rank(&q, &store).unwrap();
        let second = spec.rank(&q, &store).unwrap();
        assert_eq!(first, second);
    }

    // A single-record store has zero variance on both axes; both z-score
    // vectors collapse to zero and the one filename still comes back.
    #[test]
    fn single_record_store_ranks_without_nan() {
        let store = store_of(&[("only.jpg", 10.0, &[0.5, 0.5])]);
        let ranked = SimilaritySpec::default()
            .rank(&query(12.0, &[0.1, 0.9]), &store)
            .unwrap();
        assert_eq!(ranked, ["only.jpg"]);
    }

    #[test]
    fn out_of_range_alpha_is_a_config_error() {
        let store = store_of(&[("a.jpg", 10.0, &[0.5])]);
        for alpha in [-0.1, 1.1, f32::NAN] {
            let err = SimilaritySpec::with_alpha(alpha)
                .rank(&query(10.0, &[0.5]), &store)
                .unwrap_err();
            assert!(matches!(err, SearchError::Config(_)), "alpha={alpha}");
        }
    }

    #[test]
    fn dimension_mismatch_is_a_config_error() {
        let store = store_of(&[("a.jpg", 10.0, &[0.5, 0.5])]);
        let err = SimilaritySpec::default()
            .rank(&query(10.0, &[0.5]), &store)
            .unwrap_err();
        assert!(matches!(err, SearchError::Config(_)));
    }

    // Z-scoring is a positive affine transform per axis, so at alpha 0 and
    // 1 (single-axis ranking) appending records never reorders the
    // pre-existing ones. At interior alpha the two axes rescale
    // independently and old pairs may legitimately reorder.
    #[test]
    fn append_preserves_order_at_alpha_extremes() {
        let records: &[(&str, f32, &[f32])] = &[
            ("a.jpg", 10.0, &[0.2, 0.8]),
            ("b.jpg", 14.0, &[0.9, 0.1]),
            ("c.jpg", 8.0, &[0.4, 0.4]),
        ];
        let q = query(11.0, &[0.5, 0.5]);
        for alpha in [0.0, 1.0] {
            let spec = SimilaritySpec::with_alpha(alpha);
            let before = spec.rank(&q, &store_of(records)).unwrap();
            let mut grown = store_of(records);
            grown
                .append_batch(vec![FeatureRecord {
                    filename: "new.jpg".into(),
                    stage: 11.5,
                    locations: vec![0.6, 0.6],
                }])
                .unwrap();
            let after = spec.rank(&q, &grown).unwrap();
            let relative: Vec<&String> =
                after.iter().filter(|f| *f != "new.jpg").collect();
            let expected: Vec<&String> = before.iter().collect();
            assert_eq!(relative, expected, "alpha={alpha}");
        }
    }
}
