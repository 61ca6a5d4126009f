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

//! Random hyperplane LSH
//!
//! ## Signatures
//!
//! `band_count × row_count` random unit vectors are drawn from a seeded
//! generator. Bit `band·row_count + row` of an observation's signature is set
//! when its mean-centred count vector has a positive projection on vector
//! `(band, row)`. With `c` the counts and `μ = Σc / n`:
//!
//! ```text
//! (c − μ)·v = Σ_f v_f·c_f − μ·Σ_f v_f
//! ```
//!
//! so only the non-zero counts are visited. Dividing by the standard deviation
//! would not change the sign and is skipped.
//!
//! Two signatures that differ in `h` of `B` bits estimate the angle between
//! the two vectors as `π·h/B`; the similarity estimate is its cosine. A
//! zero-variance observation has no direction: its signature is all zeros
//! and its estimated similarity with everything is 0.
//!
//! ## Bucketed search
//!
//! ```text
//! band 0:  sub-signature ──xxh3──► bucket ──► [local indices with that bucket]
//! band 1:  ...
//! ```
//!
//! Observations sharing a band sub-signature with `i` in at least one band
//! are its candidates. Candidates are deduplicated, then scored on the full
//! signature. A band's bits must fit one `u64`, so `row_count` is a power of
//! two not above 64 and a band never straddles two words.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use std::f64::consts::PI;
use std::time::Instant;
use tracing::{debug, info};
use twox_hash::xxh3;

use exprdb_core::config::validate_load_factor;
use exprdb_core::{ExprError, LshParams, Result, SimilarPairsParams};
use exprdb_storage::{ExpressionStore, ObservationSet, VariableLengthTable};

use crate::control::SearchControl;
use crate::similar_pairs::SimilarPairs;
use crate::topk::{BoundedTopK, Neighbor};

/// The random hyperplanes, flat `[band][row][feature]`
#[derive(Debug, Clone)]
pub struct LshVectors {
    params: LshParams,
    feature_count: usize,
    values: Vec<f32>,
    /// Sum of the components of each vector
    sums: Vec<f64>,
}

impl LshVectors {
    /// Same parameters and feature count always give the same vectors.
    pub fn generate(params: LshParams, feature_count: usize) -> Result<Self> {
        params.validate()?;
        if feature_count == 0 {
            return Err(ExprError::invalid(
                "LSH vectors need at least one registered feature",
            ));
        }

        let started = Instant::now();
        let bit_count = params.bit_count();
        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let mut values = Vec::with_capacity(bit_count * feature_count);
        let mut sums: Vec<f64> = Vec::with_capacity(bit_count);

        for _ in 0..bit_count {
            let start = values.len();
            values.extend((0..feature_count).map(|_| rng.sample::<f32, _>(StandardNormal)));
            let vector = &mut values[start..];
            let norm = vector
                .iter()
                .map(|&x| x as f64 * x as f64)
                .sum::<f64>()
                .sqrt();
            if norm > 0.0 {
                for x in vector.iter_mut() {
                    *x = (*x as f64 / norm) as f32;
                }
            }
            sums.push(vector.iter().map(|&x| x as f64).sum());
        }

        debug!(
            bands = params.band_count,
            rows = params.row_count,
            seed = params.seed,
            features = feature_count,
            elapsed_s = started.elapsed().as_secs_f64(),
            "generated LSH vectors"
        );
        Ok(Self {
            params,
            feature_count,
            values,
            sums,
        })
    }

    pub fn params(&self) -> &LshParams {
        &self.params
    }

    pub fn bit_count(&self) -> usize {
        self.sums.len()
    }

    pub fn feature_count(&self) -> usize {
        self.feature_count
    }

    /// Vector of hyperplane `(band, row)`
    pub fn vector(&self, band: usize, row: usize) -> &[f32] {
        let bit = band * self.params.row_count + row;
        &self.values[bit * self.feature_count..(bit + 1) * self.feature_count]
    }

    fn vector_at(&self, bit: usize) -> &[f32] {
        &self.values[bit * self.feature_count..(bit + 1) * self.feature_count]
    }
}

/// Bit signatures of a list of observations, stored flat
#[derive(Debug, Clone)]
pub struct SignatureTable {
    bit_count: usize,
    words_per_signature: usize,
    words: Vec<u64>,
    /// Observations whose centred vector is zero
    zero_variance: Vec<bool>,
}

impl SignatureTable {
    /// Signatures of every member of `observations`, in set order
    pub fn compute(
        vectors: &LshVectors,
        store: &ExpressionStore,
        observations: &ObservationSet,
        control: &SearchControl,
    ) -> Result<Self> {
        if vectors.feature_count() != store.feature_count() {
            return Err(ExprError::invalid(format!(
                "LSH vectors span {} features but the store has {}",
                vectors.feature_count(),
                store.feature_count()
            )));
        }
        let bit_count = vectors.bit_count();
        let words_per_signature = bit_count.div_ceil(64);
        let n = store.feature_count() as f64;

        control.begin("LSH signatures", observations.len());
        let signatures = observations
            .as_slice()
            .par_iter()
            .map(|&observation| {
                control.checkpoint()?;
                let view = store.view(observation)?;
                let mut signature = vec![0u64; words_per_signature];
                if n * view.record.sum2 - view.record.sum1 * view.record.sum1 <= 0.0 {
                    return Ok((signature, true));
                }
                let mean = view.record.sum1 / n;
                for bit in 0..bit_count {
                    let v = vectors.vector_at(bit);
                    let dot: f64 = view
                        .counts
                        .iter()
                        .map(|fc| v[fc.feature as usize] as f64 * fc.count as f64)
                        .sum();
                    if dot - mean * vectors.sums[bit] > 0.0 {
                        signature[bit / 64] |= 1u64 << (bit % 64);
                    }
                }
                Ok((signature, false))
            })
            .collect::<Result<Vec<_>>>()?;

        let (signatures, zero_variance): (Vec<Vec<u64>>, Vec<bool>) =
            signatures.into_iter().unzip();
        Ok(Self {
            bit_count,
            words_per_signature,
            words: signatures.concat(),
            zero_variance,
        })
    }

    pub fn len(&self) -> usize {
        if self.words_per_signature == 0 {
            0
        } else {
            self.words.len() / self.words_per_signature
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn bit_count(&self) -> usize {
        self.bit_count
    }

    /// Signature of the `i`-th observation
    #[inline]
    pub fn signature(&self, i: usize) -> &[u64] {
        &self.words[i * self.words_per_signature..(i + 1) * self.words_per_signature]
    }

    #[inline]
    pub fn hamming(&self, i: usize, j: usize) -> u32 {
        hamming(self.signature(i), self.signature(j))
    }

    /// Whether the `i`-th observation has zero variance
    #[inline]
    pub fn is_zero_variance(&self, i: usize) -> bool {
        self.zero_variance[i]
    }

    /// `row_count` bits of `band`; `row_count` must be a power of two <= 64
    #[inline]
    fn band_bits(&self, i: usize, band: usize, row_count: usize) -> u64 {
        let first = band * row_count;
        let word = self.signature(i)[first / 64] >> (first % 64);
        if row_count == 64 {
            word
        } else {
            word & ((1u64 << row_count) - 1)
        }
    }
}

#[inline]
pub fn hamming(a: &[u64], b: &[u64]) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Angle between two vectors estimated from their signatures
pub fn estimate_angle(a: &[u64], b: &[u64], bit_count: usize) -> f64 {
    angle_from_hamming(hamming(a, b), bit_count)
}

#[inline]
fn angle_from_hamming(hamming: u32, bit_count: usize) -> f64 {
    PI * hamming as f64 / bit_count as f64
}

/// Bucket statistics of a bucketed search
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BucketStatistics {
    pub bucket_count: usize,
    pub used_buckets: usize,
    pub average_bucket_size: f64,
    pub max_bucket_size: usize,
    pub candidate_count: u64,
}

/// LSH vectors plus the signatures of one observation set
#[derive(Debug, Clone)]
pub struct LshIndex {
    vectors: LshVectors,
    signatures: SignatureTable,
    observations: ObservationSet,
}

impl LshIndex {
    pub fn build(
        store: &ExpressionStore,
        observations: &ObservationSet,
        params: LshParams,
        control: &SearchControl,
    ) -> Result<Self> {
        let vectors = LshVectors::generate(params, store.feature_count())?;
        let signatures = SignatureTable::compute(&vectors, store, observations, control)?;
        info!(
            observations = observations.len(),
            bits = vectors.bit_count(),
            "computed LSH signatures"
        );
        Ok(Self {
            vectors,
            signatures,
            observations: observations.clone(),
        })
    }

    pub fn vectors(&self) -> &LshVectors {
        &self.vectors
    }

    pub fn signatures(&self) -> &SignatureTable {
        &self.signatures
    }

    pub fn observations(&self) -> &ObservationSet {
        &self.observations
    }

    /// LSH vectors and signatures for the bucketed search. The band shape
    /// and load factor are checked before any signature is computed.
    pub fn build_banded(
        store: &ExpressionStore,
        observations: &ObservationSet,
        params: LshParams,
        load_factor: f64,
        control: &SearchControl,
    ) -> Result<Self> {
        params.validate_banded()?;
        validate_load_factor(load_factor)?;
        Self::build(store, observations, params, control)
    }

    /// Estimated similarity of the `i`-th and `j`-th observations of the set
    #[inline]
    pub fn similarity(&self, i: usize, j: usize) -> f64 {
        if self.signatures.is_zero_variance(i) || self.signatures.is_zero_variance(j) {
            return 0.0;
        }
        angle_from_hamming(self.signatures.hamming(i, j), self.signatures.bit_count()).cos()
    }

    fn method(&self, kind: &str) -> String {
        let params = self.vectors.params();
        format!(
            "{}(bands={}, rows={}, seed={})",
            kind, params.band_count, params.row_count, params.seed
        )
    }

    /// Every pair of the set scored on signatures. O(n²) Hamming distances.
    pub fn find_similar_pairs_all(
        &self,
        params: SimilarPairsParams,
        control: &SearchControl,
    ) -> Result<SimilarPairs> {
        params.validate()?;
        let n = self.observations.len();
        let ids = self.observations.as_slice();
        let started = Instant::now();

        control.begin("LSH all pairs", n);
        let lists = (0..n)
            .into_par_iter()
            .map(|i| {
                control.checkpoint()?;
                let mut top = BoundedTopK::with_candidate_count(params.k, n.saturating_sub(1));
                for j in (0..n).filter(|&j| j != i) {
                    let similarity = self.similarity(i, j);
                    if similarity >= params.threshold {
                        top.push(Neighbor::new(ids[j], similarity as f32));
                    }
                }
                Ok(top.into_sorted_vec())
            })
            .collect::<Result<Vec<_>>>()?;

        let pairs =
            SimilarPairs::from_lists(params, self.method("lsh"), self.observations.clone(), lists)?;
        info!(
            pairs = pairs.pair_count(),
            elapsed_s = started.elapsed().as_secs_f64(),
            "found similar pairs with LSH"
        );
        Ok(pairs)
    }

    /// Candidates from shared band buckets only, scored on full signatures
    pub fn find_similar_pairs_subquadratic(
        &self,
        params: SimilarPairsParams,
        load_factor: f64,
        control: &SearchControl,
    ) -> Result<SimilarPairs> {
        Ok(self
            .find_similar_pairs_subquadratic_with_statistics(params, load_factor, control)?
            .0)
    }

    pub fn find_similar_pairs_subquadratic_with_statistics(
        &self,
        params: SimilarPairsParams,
        load_factor: f64,
        control: &SearchControl,
    ) -> Result<(SimilarPairs, BucketStatistics)> {
        params.validate()?;
        let lsh = *self.vectors.params();
        lsh.validate_banded()?;
        validate_load_factor(load_factor)?;

        let started = Instant::now();
        let n = self.observations.len();
        let ids = self.observations.as_slice();
        let bucket_count = ((n as f64 / load_factor).ceil() as usize)
            .max(1)
            .next_power_of_two();
        let mask = (bucket_count - 1) as u64;
        let bucket_of = |i: usize, band: usize| -> usize {
            let bits = self.signatures.band_bits(i, band, lsh.row_count);
            (xxh3::hash64(&bits.to_le_bytes()) & mask) as usize
        };

        // One writer per band; the tables are read-only afterwards.
        let tables = (0..lsh.band_count)
            .into_par_iter()
            .map(|band| {
                let mut table: VariableLengthTable<u32> =
                    VariableLengthTable::new(format!("LSH band {} buckets", band));
                table.begin_counting(bucket_count)?;
                for i in 0..n {
                    table.increment_count(bucket_of(i, band))?;
                }
                table.begin_filling()?;
                for i in 0..n {
                    table.store(bucket_of(i, band), i as u32)?;
                }
                table.end_filling()?;
                Ok(table)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut statistics = bucket_statistics(&tables, bucket_count);

        control.begin("LSH bucketed pairs", n);
        let results = (0..n)
            .into_par_iter()
            .map(|i| {
                control.checkpoint()?;
                let mut candidates: Vec<u32> = Vec::new();
                for (band, table) in tables.iter().enumerate() {
                    let own = self.signatures.band_bits(i, band, lsh.row_count);
                    let bucket = table.get(bucket_of(i, band)).unwrap_or(&[]);
                    candidates.extend(bucket.iter().copied().filter(|&j| {
                        j as usize != i
                            && self.signatures.band_bits(j as usize, band, lsh.row_count) == own
                    }));
                }
                candidates.sort_unstable();
                candidates.dedup();

                let mut top = BoundedTopK::with_candidate_count(params.k, candidates.len());
                for &j in &candidates {
                    let similarity = self.similarity(i, j as usize);
                    if similarity >= params.threshold {
                        top.push(Neighbor::new(ids[j as usize], similarity as f32));
                    }
                }
                Ok((top.into_sorted_vec(), candidates.len() as u64))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut lists = Vec::with_capacity(n);
        for (list, candidate_count) in results {
            statistics.candidate_count += candidate_count;
            lists.push(list);
        }

        let pairs = SimilarPairs::from_lists(
            params,
            self.method("lsh-banded"),
            self.observations.clone(),
            lists,
        )?;
        info!(
            buckets = statistics.bucket_count,
            used_buckets = statistics.used_buckets,
            average_bucket_size = statistics.average_bucket_size,
            max_bucket_size = statistics.max_bucket_size,
            candidates = statistics.candidate_count,
            pairs = pairs.pair_count(),
            elapsed_s = started.elapsed().as_secs_f64(),
            "found similar pairs with banded LSH"
        );
        Ok((pairs, statistics))
    }
}

fn bucket_statistics(tables: &[VariableLengthTable<u32>], bucket_count: usize) -> BucketStatistics {
    let mut used = 0usize;
    let mut filled = 0usize;
    let mut max = 0usize;
    for table in tables {
        for bucket in table.iter() {
            if !bucket.is_empty() {
                used += 1;
                filled += bucket.len();
                max = max.max(bucket.len());
            }
        }
    }
    BucketStatistics {
        bucket_count,
        used_buckets: used,
        average_bucket_size: if used == 0 {
            0.0
        } else {
            filled as f64 / used as f64
        },
        max_bucket_size: max,
        candidate_count: 0,
    }
}
