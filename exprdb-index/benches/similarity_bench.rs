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

//! Similar-pairs search benchmarks
//!
//! Exact vs truncated vs LSH over the same synthetic cell population.
//!
//! Run with: cargo bench -p exprdb-index --bench similarity_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use exprdb_core::{LshParams, SimilarPairsParams, StoreConfig};
use exprdb_index::{LshIndex, SearchControl, SimilarityEngine, SimilarityMode};
use exprdb_storage::{ExpressionStore, ObservationSet};

const FEATURES: u32 = 2_000;

/// Cells with ~5% of genes expressed, counts skewed towards small values
fn synthetic_store(cells: usize) -> ExpressionStore {
    let mut rng = ChaCha8Rng::seed_from_u64(1234);
    let mut store = ExpressionStore::new(StoreConfig::default()).unwrap();
    for f in 0..FEATURES {
        store.add_feature(&format!("gene_{}", f)).unwrap();
    }
    for c in 0..cells {
        let counts: Vec<(u32, f32)> = (0..FEATURES)
            .filter(|_| rng.gen_bool(0.05))
            .map(|f| (f, (1.0 / rng.gen_range(0.01f32..1.0)).floor()))
            .collect();
        store.add_observation(&format!("cell_{}", c), &counts, 20).unwrap();
    }
    store
}

fn bench_pair_scoring(c: &mut Criterion) {
    let store = synthetic_store(200);
    let engine = SimilarityEngine::new(&store);
    let views = engine.views(&ObservationSet::all(200)).unwrap();

    let mut group = c.benchmark_group("pair_scoring");
    group.bench_function("exact", |b| {
        b.iter(|| {
            let mut total = 0.0;
            for j in 1..views.len() {
                total += engine.exact_views(&views[0], &views[j]);
            }
            black_box(total)
        })
    });
    group.bench_function("truncated", |b| {
        b.iter(|| {
            let mut total = 0.0;
            for j in 1..views.len() {
                total += engine.truncated_views(&views[0], &views[j]).value;
            }
            black_box(total)
        })
    });
    group.finish();
}

fn bench_find_similar_pairs(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_similar_pairs");
    group.sample_size(10);
    let params = SimilarPairsParams::new(10, 0.2);
    let control = SearchControl::default();

    for cells in [500, 2_000] {
        let store = synthetic_store(cells);
        let set = ObservationSet::all(cells);
        let engine = SimilarityEngine::new(&store);

        group.bench_with_input(BenchmarkId::new("exact", cells), &cells, |b, _| {
            b.iter(|| {
                black_box(
                    engine
                        .find_similar_pairs(&set, params, SimilarityMode::Exact, &control)
                        .unwrap(),
                )
            })
        });
        group.bench_with_input(BenchmarkId::new("truncated", cells), &cells, |b, _| {
            b.iter(|| {
                black_box(
                    engine
                        .find_similar_pairs(&set, params, SimilarityMode::Truncated, &control)
                        .unwrap(),
                )
            })
        });

        let index = LshIndex::build(&store, &set, LshParams::new(16, 16, 7), &control).unwrap();
        group.bench_with_input(BenchmarkId::new("lsh_all_pairs", cells), &cells, |b, _| {
            b.iter(|| black_box(index.find_similar_pairs_all(params, &control).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("lsh_banded", cells), &cells, |b, _| {
            b.iter(|| {
                black_box(
                    index
                        .find_similar_pairs_subquadratic(params, 1.0, &control)
                        .unwrap(),
                )
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_pair_scoring, bench_find_similar_pairs);
criterion_main!(benches);
