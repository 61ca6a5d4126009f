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

//! Neighbor lists produced by a similar-pairs search
//!
//! One bucket of [`Neighbor`]s per observation of the searched set, best
//! first. Lists are computed independently per observation, so `b` may be in
//! `a`'s list while `a` is not in `b`'s.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::info;

use exprdb_core::{ExprError, ObservationId, Result, SimilarPairsParams};
use exprdb_storage::{read_snapshot, write_snapshot, ObservationSet, VariableLengthTable};

use crate::topk::Neighbor;

const SNAPSHOT_KIND: &str = "SimilarPairs";
const FILE_PREFIX: &str = "SimilarPairs-";
const FILE_SUFFIX: &str = ".bin";

/// File name of a persisted neighbor list inside a store directory
pub fn similar_pairs_file_name(name: &str) -> String {
    format!("{}{}{}", FILE_PREFIX, name, FILE_SUFFIX)
}

/// Inverse of [`similar_pairs_file_name`]
pub fn similar_pairs_name(file_name: &str) -> Option<&str> {
    file_name
        .strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_SUFFIX)
        .filter(|name| !name.is_empty())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarPairs {
    k: usize,
    threshold: f64,
    /// How the similarities were computed, e.g. `exact`
    method: String,
    observations: ObservationSet,
    /// Bucket `i` holds the neighbors of the `i`-th observation of the set
    neighbors: VariableLengthTable<Neighbor>,
}

impl SimilarPairs {
    /// Assemble from one best-first list per observation of `observations`
    pub fn from_lists(
        params: SimilarPairsParams,
        method: impl Into<String>,
        observations: ObservationSet,
        lists: Vec<Vec<Neighbor>>,
    ) -> Result<Self> {
        if lists.len() != observations.len() {
            return Err(ExprError::Internal(format!(
                "{} neighbor lists for {} observations",
                lists.len(),
                observations.len()
            )));
        }
        let mut neighbors = VariableLengthTable::new("similar pairs");
        for list in &lists {
            neighbors.append_bucket(list)?;
        }
        Ok(Self {
            k: params.k,
            threshold: params.threshold,
            method: method.into(),
            observations,
            neighbors,
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn observations(&self) -> &ObservationSet {
        &self.observations
    }

    /// Neighbors of `observation`, best first
    pub fn neighbors_of(&self, observation: ObservationId) -> Result<&[Neighbor]> {
        self.observations
            .position(observation)
            .and_then(|i| self.neighbors.get(i))
            .ok_or_else(|| {
                ExprError::not_found(format!(
                    "observation {} is not part of these similar pairs",
                    observation
                ))
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObservationId, &[Neighbor])> + '_ {
        self.observations.iter().zip(self.neighbors.iter())
    }

    /// Total number of (observation, neighbor) entries
    pub fn pair_count(&self) -> usize {
        self.neighbors.total_len()
    }

    /// One `id0,id1,similarity` row per entry
    pub fn write_csv<W: Write>(&self, mut writer: W) -> Result<()> {
        writeln!(writer, "id0,id1,similarity")?;
        for (observation, neighbors) in self.iter() {
            for neighbor in neighbors {
                writeln!(
                    writer,
                    "{},{},{}",
                    observation, neighbor.id, neighbor.similarity
                )?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_snapshot(path, SNAPSHOT_KIND, self)?;
        info!(path = %path.display(), pairs = self.pair_count(), "saved similar pairs");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let pairs: Self = read_snapshot(path, SNAPSHOT_KIND)?;
        if pairs.neighbors.len() != pairs.observations.len() {
            return Err(ExprError::Corruption(format!(
                "{:?}: {} neighbor lists for {} observations",
                path,
                pairs.neighbors.len(),
                pairs.observations.len()
            )));
        }
        Ok(pairs)
    }
}
