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

//! All-pairs accuracy diagnostics for the approximate similarities

use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use exprdb_core::{ExprError, LshParams, Result};
use exprdb_storage::ObservationSet;

use crate::control::SearchControl;
use crate::lsh::LshIndex;
use crate::similarity::SimilarityEngine;

/// Slack allowed when checking the truncation bound, for rounding
const BOUND_TOLERANCE: f64 = 1e-9;

/// Truncated-vs-exact statistics over all pairs of a set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairAnalysis {
    pub pair_count: u64,
    /// Counts of `truncated − exact` over `bin_count` equal bins of
    /// [-1, 1]; values outside land in the end bins
    pub error_histogram: Vec<u64>,
    pub max_abs_error: f64,
    /// Largest observed error divided by its bound, over pairs with a
    /// non-zero bound
    pub max_error_to_bound_ratio: f64,
    pub bound_violations: u64,
}

impl PairAnalysis {
    fn empty(bin_count: usize) -> Self {
        Self {
            pair_count: 0,
            error_histogram: vec![0; bin_count],
            max_abs_error: 0.0,
            max_error_to_bound_ratio: 0.0,
            bound_violations: 0,
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.pair_count += other.pair_count;
        for (mine, theirs) in self.error_histogram.iter_mut().zip(&other.error_histogram) {
            *mine += theirs;
        }
        self.max_abs_error = self.max_abs_error.max(other.max_abs_error);
        self.max_error_to_bound_ratio = self
            .max_error_to_bound_ratio
            .max(other.max_error_to_bound_ratio);
        self.bound_violations += other.bound_violations;
        self
    }

    /// Lower edge of bin `i`
    pub fn bin_start(&self, i: usize) -> f64 {
        -1.0 + 2.0 * i as f64 / self.error_histogram.len() as f64
    }
}

/// Compare truncated and exact similarity for every unordered pair of the set
pub fn analyze_all_pairs(
    engine: &SimilarityEngine<'_>,
    observations: &ObservationSet,
    bin_count: usize,
    control: &SearchControl,
) -> Result<PairAnalysis> {
    if bin_count == 0 {
        return Err(ExprError::invalid("histogram needs at least one bin"));
    }
    let views = engine.views(observations)?;
    control.begin("pair analysis", views.len());

    let analysis = (0..views.len())
        .into_par_iter()
        .map(|i| -> Result<PairAnalysis> {
            control.checkpoint()?;
            let mut partial = PairAnalysis::empty(bin_count);
            for b in &views[i + 1..] {
                let a = &views[i];
                let exact = engine.exact_views(a, b);
                let approximate = engine.truncated_views(a, b);
                let error = approximate.value - exact;

                let bin = ((error + 1.0) / 2.0 * bin_count as f64).floor();
                let bin = (bin.max(0.0) as usize).min(bin_count - 1);
                partial.error_histogram[bin] += 1;
                partial.pair_count += 1;
                partial.max_abs_error = partial.max_abs_error.max(error.abs());
                if approximate.error_bound > 0.0 {
                    partial.max_error_to_bound_ratio = partial
                        .max_error_to_bound_ratio
                        .max(error.abs() / approximate.error_bound);
                }
                if error.abs() > approximate.error_bound + BOUND_TOLERANCE {
                    partial.bound_violations += 1;
                }
            }
            Ok(partial)
        })
        .try_reduce(|| PairAnalysis::empty(bin_count), |a, b| Ok(a.merge(b)))?;

    info!(
        pairs = analysis.pair_count,
        max_abs_error = analysis.max_abs_error,
        max_error_to_bound_ratio = analysis.max_error_to_bound_ratio,
        bound_violations = analysis.bound_violations,
        "analyzed all pairs"
    );
    Ok(analysis)
}

/// LSH-estimated vs exact similarity over all pairs of a set
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LshComparison {
    pub pair_count: u64,
    pub mean_abs_difference: f64,
    pub max_abs_difference: f64,
}

pub fn compare_lsh_similarity(
    engine: &SimilarityEngine<'_>,
    observations: &ObservationSet,
    params: LshParams,
    control: &SearchControl,
) -> Result<LshComparison> {
    let index = LshIndex::build(engine.store(), observations, params, control)?;
    let views = engine.views(observations)?;
    control.begin("LSH comparison", views.len());

    let (pair_count, total, max) = (0..views.len())
        .into_par_iter()
        .map(|i| -> Result<(u64, f64, f64)> {
            control.checkpoint()?;
            let mut partial = (0u64, 0.0f64, 0.0f64);
            for j in i + 1..views.len() {
                let exact = engine.exact_views(&views[i], &views[j]);
                let difference = (index.similarity(i, j) - exact).abs();
                partial.0 += 1;
                partial.1 += difference;
                partial.2 = partial.2.max(difference);
            }
            Ok(partial)
        })
        .try_reduce(
            || (0, 0.0, 0.0),
            |a, b| Ok((a.0 + b.0, a.1 + b.1, a.2.max(b.2))),
        )?;

    let comparison = LshComparison {
        pair_count,
        mean_abs_difference: if pair_count == 0 {
            0.0
        } else {
            total / pair_count as f64
        },
        max_abs_difference: max,
    };
    info!(
        bands = params.band_count,
        rows = params.row_count,
        pairs = comparison.pair_count,
        mean_abs_difference = comparison.mean_abs_difference,
        max_abs_difference = comparison.max_abs_difference,
        "compared LSH similarity"
    );
    Ok(comparison)
}

#[cfg(test)]
mod tests {
    use super::*;
    use exprdb_core::StoreConfig;
    use exprdb_storage::ExpressionStore;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn random_store(observations: usize, features: u32, budget: usize) -> ExpressionStore {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut store = ExpressionStore::new(StoreConfig::small()).unwrap();
        for f in 0..features {
            store.add_feature(&format!("g{}", f)).unwrap();
        }
        for o in 0..observations {
            let counts: Vec<(u32, f32)> = (0..features)
                .filter_map(|f| {
                    if rng.gen_bool(0.4) {
                        Some((f, rng.gen_range(1..20) as f32))
                    } else {
                        None
                    }
                })
                .collect();
            store.add_observation(&format!("c{}", o), &counts, budget).unwrap();
        }
        store
    }

    #[test]
    fn test_truncation_never_exceeds_bound() {
        let store = random_store(30, 25, 4);
        let engine = SimilarityEngine::new(&store);
        let analysis = analyze_all_pairs(
            &engine,
            &ObservationSet::all(30),
            20,
            &SearchControl::default(),
        )
        .unwrap();

        assert_eq!(analysis.pair_count, 30 * 29 / 2);
        assert_eq!(analysis.error_histogram.iter().sum::<u64>(), analysis.pair_count);
        assert_eq!(analysis.bound_violations, 0);
        assert!(analysis.max_error_to_bound_ratio <= 1.0 + 1e-9);
        assert!(analysis.max_abs_error > 0.0);
        assert_eq!(analysis.bin_start(0), -1.0);
    }

    #[test]
    fn test_no_truncation_means_no_error() {
        let store = random_store(10, 12, 100);
        let engine = SimilarityEngine::new(&store);
        let analysis =
            analyze_all_pairs(&engine, &ObservationSet::all(10), 4, &SearchControl::default())
                .unwrap();
        assert_eq!(analysis.max_abs_error, 0.0);
        // Zero error falls in the bin starting at 0
        assert_eq!(analysis.error_histogram[2], analysis.pair_count);
        let control = SearchControl::default();
        assert!(analyze_all_pairs(&engine, &ObservationSet::all(10), 0, &control).is_err());
    }

    #[test]
    fn test_lsh_comparison_improves_with_bits() {
        let store = random_store(25, 30, 100);
        let engine = SimilarityEngine::new(&store);
        let set = ObservationSet::all(25);
        let control = SearchControl::default();

        let coarse =
            compare_lsh_similarity(&engine, &set, LshParams::flat(16, 3), &control).unwrap();
        let fine =
            compare_lsh_similarity(&engine, &set, LshParams::flat(2048, 3), &control).unwrap();
        assert_eq!(fine.pair_count, 25 * 24 / 2);
        assert!(fine.mean_abs_difference < coarse.mean_abs_difference);
        assert!(fine.mean_abs_difference < 0.1);
    }
}
