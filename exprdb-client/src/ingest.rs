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


//! Sparse triplet ingest
//!
//! Counts come as `observation<TAB>feature<TAB>count` lines, meta data as
//! `observation<TAB>name<TAB>value` lines. Blank lines and lines starting
//! with `#` are skipped. Observations are added in order of first
//! appearance; features are registered as they are first seen.

use serde::Serialize;
use std::collections::HashMap;
use std::io::BufRead;
use std::time::Instant;
use tracing::{info, warn};

use exprdb_core::{ExprError, FeatureId, Result};

use crate::matrix::ExpressionMatrix;

/// Counts of one observation, as read
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationCounts {
    pub name: String,
    pub counts: Vec<(String, f32)>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub observations: usize,
    pub new_features: usize,
    pub entries: usize,
}

/// Split a data line into its three tab separated fields
fn fields(line: &str, line_number: usize) -> Result<Option<[&str; 3]>> {
    if line.trim().is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut parts = line.split('\t');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(a), Some(b), Some(c), None) if !a.is_empty() && !b.is_empty() => {
            Ok(Some([a, b, c]))
        }
        _ => Err(ExprError::invalid(format!(
            "line {}: expected three tab separated fields",
            line_number
        ))),
    }
}

/// Read count triplets, grouped by observation in order of first appearance
pub fn read_triplets<R: BufRead>(reader: R) -> Result<Vec<ObservationCounts>> {
    let mut observations: Vec<ObservationCounts> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let Some([observation, feature, count]) = fields(&line, i + 1)? else {
            continue;
        };
        let count: f32 = count.trim().parse().map_err(|_| {
            ExprError::invalid(format!("line {}: invalid count {:?}", i + 1, count))
        })?;

        let slot = match index.get(observation) {
            Some(&slot) => slot,
            None => {
                index.insert(observation.to_string(), observations.len());
                observations.push(ObservationCounts {
                    name: observation.to_string(),
                    counts: Vec::new(),
                });
                observations.len() - 1
            }
        };
        observations[slot].counts.push((feature.to_string(), count));
    }
    Ok(observations)
}

/// Read meta data triplets, keyed by observation name
pub fn read_meta_data<R: BufRead>(reader: R) -> Result<HashMap<String, Vec<(String, String)>>> {
    let mut meta_data: HashMap<String, Vec<(String, String)>> = HashMap::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let Some([observation, name, value]) = fields(&line, i + 1)? else {
            continue;
        };
        meta_data
            .entry(observation.to_string())
            .or_default()
            .push((name.to_string(), value.to_string()));
    }
    Ok(meta_data)
}

impl ExpressionMatrix {
    /// Add every observation of a triplet file, with optional meta data.
    ///
    /// Stops at the first observation the store rejects; observations added
    /// before it stay. Call [`ExpressionMatrix::save`] afterwards to persist.
    pub fn ingest<R: BufRead, M: BufRead>(
        &mut self,
        counts: R,
        meta_data: Option<M>,
    ) -> Result<IngestSummary> {
        let started = Instant::now();
        let observations = read_triplets(counts)?;
        let mut meta_data = match meta_data {
            Some(reader) => read_meta_data(reader)?,
            None => HashMap::new(),
        };

        let features_before = self.store().feature_count();
        let mut summary = IngestSummary::default();
        for observation in observations {
            let counts = observation
                .counts
                .iter()
                .map(|(feature, count)| Ok((self.add_feature(feature)?, *count)))
                .collect::<Result<Vec<(FeatureId, f32)>>>()?;
            let meta = meta_data.remove(&observation.name).unwrap_or_default();
            self.add_observation(&observation.name, &meta, &counts)?;
            summary.observations += 1;
            summary.entries += counts.len();
        }
        summary.new_features = self.store().feature_count() - features_before;

        if !meta_data.is_empty() {
            warn!(
                observations = meta_data.len(),
                "meta data given for observations without counts was ignored"
            );
        }
        info!(
            observations = summary.observations,
            new_features = summary.new_features,
            entries = summary.entries,
            elapsed_s = started.elapsed().as_secs_f64(),
            "ingested triplets"
        );
        Ok(summary)
    }
}
