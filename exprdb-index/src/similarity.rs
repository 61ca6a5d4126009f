// SPDX-License-Identifier: AGPL-3.0-or-later
// ExprDB - Sparse Expression Similarity Engine
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Correlation similarity between sparse count vectors
//!
//! The similarity of two observations is the Pearson correlation of their
//! count vectors over all `n` registered features, zeros included:
//!
//! ```text
//!            n·Σab − Σa·Σb
//! r = ─────────────────────────────────
//!     √((n·Σa² − (Σa)²)·(n·Σb² − (Σb)²))
//! ```
//!
//! Σa and Σa² come from the [`ObservationRecord`]; only Σab needs a merge
//! walk over the two sorted vectors. A vector with zero variance has
//! similarity 0 with everything.
//!
//! ## Truncated mode
//!
//! Σab is taken over the truncated vectors only. The part of the dot product
//! that was dropped is bounded by Cauchy-Schwarz:
//!
//! ```text
//! |Σab − Σab_truncated| ≤ √ca·ma·‖b‖ + √cb·mb·‖a‖
//! ```
//!
//! with `c` the number and `m` the maximum magnitude of the discarded
//! entries. Scaled by `n / √(Da·Db)` this gives the error bound returned with
//! every approximate similarity. It shrinks as the truncation budget grows
//! and is 0 when nothing was discarded.
//!
//! [`ObservationRecord`]: exprdb_storage::ObservationRecord

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

use exprdb_core::{ObservationId, Result, SimilarPairsParams};
use exprdb_storage::{ExpressionStore, FeatureCount, ObservationSet, ObservationView};

use crate::control::SearchControl;
use crate::similar_pairs::SimilarPairs;
use crate::topk::{BoundedTopK, Neighbor};

/// How pair similarities are computed by [`SimilarityEngine::find_similar_pairs`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimilarityMode {
    /// Full vectors
    Exact,
    /// Truncated vectors, with an error bound
    Truncated,
}

impl SimilarityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimilarityMode::Exact => "exact",
            SimilarityMode::Truncated => "truncated",
        }
    }
}

/// Approximate similarity with a bound on its distance to the exact value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApproximateSimilarity {
    pub value: f64,
    pub error_bound: f64,
}

/// Merge walk over two vectors sorted by feature id
#[inline]
pub fn sparse_dot(a: &[FeatureCount], b: &[FeatureCount]) -> f64 {
    let (mut i, mut j) = (0, 0);
    let mut sum = 0.0f64;
    while i < a.len() && j < b.len() {
        let (fa, fb) = (a[i].feature, b[j].feature);
        if fa < fb {
            i += 1;
        } else if fa > fb {
            j += 1;
        } else {
            sum += a[i].count as f64 * b[j].count as f64;
            i += 1;
            j += 1;
        }
    }
    sum
}

/// Read-only similarity computations over one store
#[derive(Debug, Clone, Copy)]
pub struct SimilarityEngine<'a> {
    store: &'a ExpressionStore,
    /// Dimension of the count vectors
    n: f64,
}

impl<'a> SimilarityEngine<'a> {
    pub fn new(store: &'a ExpressionStore) -> Self {
        Self {
            store,
            n: store.feature_count() as f64,
        }
    }

    pub fn store(&self) -> &'a ExpressionStore {
        self.store
    }

    /// `n·Σx² − (Σx)²`, i.e. n² times the variance
    #[inline]
    fn scaled_variance(&self, view: &ObservationView<'_>) -> f64 {
        self.n * view.record.sum2 - view.record.sum1 * view.record.sum1
    }

    #[inline]
    fn correlation(&self, a: &ObservationView<'_>, b: &ObservationView<'_>, dot: f64) -> f64 {
        let da = self.scaled_variance(a);
        let db = self.scaled_variance(b);
        if da <= 0.0 || db <= 0.0 {
            return 0.0;
        }
        let r = (self.n * dot - a.record.sum1 * b.record.sum1) / (da * db).sqrt();
        r.clamp(-1.0, 1.0)
    }

    #[inline]
    pub fn exact_views(&self, a: &ObservationView<'_>, b: &ObservationView<'_>) -> f64 {
        self.correlation(a, b, sparse_dot(a.counts, b.counts))
    }

    #[inline]
    pub fn truncated_views(
        &self,
        a: &ObservationView<'_>,
        b: &ObservationView<'_>,
    ) -> ApproximateSimilarity {
        let value = self.correlation(a, b, sparse_dot(a.truncated, b.truncated));
        let da = self.scaled_variance(a);
        let db = self.scaled_variance(b);
        if da <= 0.0 || db <= 0.0 {
            return ApproximateSimilarity {
                value,
                error_bound: 0.0,
            };
        }
        let dropped_a = (a.record.discarded_count as f64).sqrt()
            * a.record.discarded_max as f64
            * b.record.norm();
        let dropped_b = (b.record.discarded_count as f64).sqrt()
            * b.record.discarded_max as f64
            * a.record.norm();
        ApproximateSimilarity {
            value,
            error_bound: self.n * (dropped_a + dropped_b) / (da * db).sqrt(),
        }
    }

    #[inline]
    fn views_similarity(
        &self,
        mode: SimilarityMode,
        a: &ObservationView<'_>,
        b: &ObservationView<'_>,
    ) -> f64 {
        match mode {
            SimilarityMode::Exact => self.exact_views(a, b),
            SimilarityMode::Truncated => self.truncated_views(a, b).value,
        }
    }

    pub fn exact_similarity(&self, a: ObservationId, b: ObservationId) -> Result<f64> {
        Ok(self.exact_views(&self.store.view(a)?, &self.store.view(b)?))
    }

    pub fn truncated_similarity(
        &self,
        a: ObservationId,
        b: ObservationId,
    ) -> Result<ApproximateSimilarity> {
        Ok(self.truncated_views(&self.store.view(a)?, &self.store.view(b)?))
    }

    pub fn similarity(
        &self,
        a: ObservationId,
        b: ObservationId,
        mode: SimilarityMode,
    ) -> Result<f64> {
        Ok(self.views_similarity(mode, &self.store.view(a)?, &self.store.view(b)?))
    }

    /// Views of every member of a set, in set order
    pub fn views(&self, observations: &ObservationSet) -> Result<Vec<ObservationView<'a>>> {
        observations.iter().map(|id| self.store.view(id)).collect()
    }

    /// For every observation of the set, its `k` most similar other members
    /// with similarity at least `threshold`. O(n²) pair evaluations, run in
    /// parallel over observations on the current rayon pool.
    pub fn find_similar_pairs(
        &self,
        observations: &ObservationSet,
        params: SimilarPairsParams,
        mode: SimilarityMode,
        control: &SearchControl,
    ) -> Result<SimilarPairs> {
        params.validate()?;
        let views = self.views(observations)?;
        let started = Instant::now();
        info!(
            mode = mode.as_str(),
            observations = views.len(),
            k = params.k,
            threshold = params.threshold,
            "finding similar pairs"
        );

        control.begin(mode.as_str(), views.len());
        let lists = (0..views.len())
            .into_par_iter()
            .map(|i| {
                control.checkpoint()?;
                let mut top =
                    BoundedTopK::with_candidate_count(params.k, views.len().saturating_sub(1));
                let a = &views[i];
                for (j, b) in views.iter().enumerate() {
                    if i == j {
                        continue;
                    }
                    let similarity = self.views_similarity(mode, a, b);
                    if similarity >= params.threshold {
                        top.push(Neighbor::new(b.id, similarity as f32));
                    }
                }
                Ok(top.into_sorted_vec())
            })
            .collect::<Result<Vec<_>>>()?;

        let pairs = SimilarPairs::from_lists(params, mode.as_str(), observations.clone(), lists)?;
        info!(
            mode = mode.as_str(),
            pairs = pairs.pair_count(),
            elapsed_s = started.elapsed().as_secs_f64(),
            "found similar pairs"
        );
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exprdb_core::StoreConfig;

    /// g0..g3 registered, observations as (name, counts)
    fn store(observations: &[(&str, &[(u32, f32)])], budget: usize) -> ExpressionStore {
        let mut store = ExpressionStore::new(StoreConfig::small()).unwrap();
        for g in 0..4 {
            store.add_feature(&format!("g{}", g)).unwrap();
        }
        for (name, counts) in observations {
            store.add_observation(name, counts, budget).unwrap();
        }
        store
    }

    #[test]
    fn test_identical_and_disjoint_support() {
        // A = {(g1,4),(g2,3)}, B identical, C = {(g1,4),(g3,3)}
        let store = store(
            &[
                ("A", &[(1, 4.0), (2, 3.0)]),
                ("B", &[(1, 4.0), (2, 3.0)]),
                ("C", &[(1, 4.0), (3, 3.0)]),
            ],
            10,
        );
        let engine = SimilarityEngine::new(&store);
        let ab = engine.exact_similarity(0, 1).unwrap();
        let ac = engine.exact_similarity(0, 2).unwrap();
        assert!((ab - 1.0).abs() < 1e-12);
        assert!(ac < ab);
    }

    #[test]
    fn test_symmetric_and_in_range() {
        let store = store(
            &[
                ("A", &[(0, 1.0), (1, 5.0), (3, 2.0)]),
                ("B", &[(1, 2.0), (2, 7.0)]),
                ("C", &[(0, 9.0), (2, 1.0), (3, 4.0)]),
            ],
            10,
        );
        let engine = SimilarityEngine::new(&store);
        for a in 0..3 {
            for b in 0..3 {
                let ab = engine.exact_similarity(a, b).unwrap();
                let ba = engine.exact_similarity(b, a).unwrap();
                assert_eq!(ab, ba);
                assert!((-1.0..=1.0).contains(&ab));
            }
        }
    }

    #[test]
    fn test_matches_dense_pearson() {
        let a = [1.0, 5.0, 0.0, 2.0];
        let b = [0.0, 2.0, 7.0, 0.0];
        let store = store(
            &[
                ("A", &[(0, 1.0), (1, 5.0), (3, 2.0)]),
                ("B", &[(1, 2.0), (2, 7.0)]),
            ],
            10,
        );
        let mean_a = a.iter().sum::<f64>() / 4.0;
        let mean_b = b.iter().sum::<f64>() / 4.0;
        let cov: f64 = a.iter().zip(&b).map(|(x, y)| (x - mean_a) * (y - mean_b)).sum();
        let var_a: f64 = a.iter().map(|x| (x - mean_a).powi(2)).sum();
        let var_b: f64 = b.iter().map(|y| (y - mean_b).powi(2)).sum();
        let expected = cov / (var_a * var_b).sqrt();

        let engine = SimilarityEngine::new(&store);
        assert!((engine.exact_similarity(0, 1).unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_zero_variance_is_zero_not_nan() {
        let store = store(
            &[
                ("empty", &[]),
                ("flat", &[(0, 2.0), (1, 2.0), (2, 2.0), (3, 2.0)]),
                ("A", &[(0, 1.0)]),
            ],
            10,
        );
        let engine = SimilarityEngine::new(&store);
        assert_eq!(engine.exact_similarity(0, 2).unwrap(), 0.0);
        assert_eq!(engine.exact_similarity(1, 2).unwrap(), 0.0);
        assert_eq!(engine.exact_similarity(0, 0).unwrap(), 0.0);
        let approx = engine.truncated_similarity(1, 2).unwrap();
        assert_eq!(approx.value, 0.0);
        assert_eq!(approx.error_bound, 0.0);
    }

    #[test]
    fn test_truncated_error_within_bound() {
        let observations: &[(&str, &[(u32, f32)])] = &[
            ("A", &[(0, 9.0), (1, 1.0), (2, 2.0), (3, 0.5)]),
            ("B", &[(0, 3.0), (1, 8.0), (2, 1.0), (3, 2.0)]),
        ];
        let mut previous_bound = f64::INFINITY;
        for budget in 0..=4 {
            let store = store(observations, budget);
            let engine = SimilarityEngine::new(&store);
            let exact = engine.exact_similarity(0, 1).unwrap();
            let approx = engine.truncated_similarity(0, 1).unwrap();
            assert!((approx.value - exact).abs() <= approx.error_bound + 1e-12);
            assert!(approx.error_bound <= previous_bound);
            previous_bound = approx.error_bound;
        }
        // Nothing discarded at the full length
        assert_eq!(previous_bound, 0.0);
    }

    #[test]
    fn test_find_similar_pairs() {
        let store = store(
            &[
                ("A", &[(1, 4.0), (2, 3.0)]),
                ("B", &[(1, 4.0), (2, 3.0)]),
                ("C", &[(1, 4.0), (3, 3.0)]),
                ("D", &[(0, 5.0)]),
            ],
            10,
        );
        let engine = SimilarityEngine::new(&store);
        let set = ObservationSet::all(4);
        let control = SearchControl::default();

        let pairs = engine
            .find_similar_pairs(
                &set,
                SimilarPairsParams::new(2, -1.0),
                SimilarityMode::Exact,
                &control,
            )
            .unwrap();
        let a = pairs.neighbors_of(0).unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].id, 1);
        assert!(a.iter().all(|n| n.id != 0));
        assert!(a[0].similarity >= a[1].similarity);

        // A high threshold keeps only the identical pair
        let strict = engine
            .find_similar_pairs(
                &set,
                SimilarPairsParams::new(5, 0.99),
                SimilarityMode::Exact,
                &control,
            )
            .unwrap();
        assert_eq!(strict.neighbors_of(0).unwrap().len(), 1);
        assert_eq!(strict.neighbors_of(1).unwrap()[0].id, 0);
        assert!(strict.neighbors_of(3).unwrap().is_empty());
    }

    #[test]
    fn test_find_similar_pairs_validates_and_cancels() {
        let store = store(&[("A", &[(0, 1.0)]), ("B", &[(1, 1.0)])], 10);
        let engine = SimilarityEngine::new(&store);
        let set = ObservationSet::all(2);
        let control = SearchControl::default();
        let exact = SimilarityMode::Exact;
        let zero_k = SimilarPairsParams::new(0, 0.0);
        assert!(engine.find_similar_pairs(&set, zero_k, exact, &control).is_err());
        let too_large = ObservationSet::all(3);
        let one = SimilarPairsParams::new(1, 0.0);
        assert!(engine.find_similar_pairs(&too_large, one, exact, &control).is_err());

        control.cancel();
        let err = engine
            .find_similar_pairs(
                &set,
                SimilarPairsParams::new(1, 0.0),
                SimilarityMode::Truncated,
                &control,
            )
            .unwrap_err();
        assert!(matches!(err, exprdb_core::ExprError::Cancelled));
    }

    #[test]
    fn test_unbounded_k_keeps_every_neighbor() {
        let store = store(
            &[
                ("A", &[(0, 1.0), (1, 2.0)]),
                ("B", &[(0, 2.0), (2, 1.0)]),
                ("C", &[(1, 3.0), (2, 1.0)]),
            ],
            10,
        );
        let engine = SimilarityEngine::new(&store);
        let set = ObservationSet::all(3);
        let control = SearchControl::default();
        let params = SimilarPairsParams::new(usize::MAX, -1.0);
        for mode in [SimilarityMode::Exact, SimilarityMode::Truncated] {
            let pairs = engine.find_similar_pairs(&set, params, mode, &control).unwrap();
            for i in 0..3 {
                assert_eq!(pairs.neighbors_of(i).unwrap().len(), 2);
            }
        }
    }
}
