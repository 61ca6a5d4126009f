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

//! Sparse expression store
//!
//! Holds, for every observation (cell), its full sparse count vector and a
//! truncated copy with the largest-magnitude counts, plus a fixed-size
//! [`ObservationRecord`] with the aggregates the similarity engine needs.
//!
//! ```text
//! records:    [ ObservationRecord ]*          indexed by ObservationId
//!                 │ counts    │ truncated
//!                 ▼           ▼
//! counts:     VariableLengthTable<FeatureCount>   sorted by FeatureId
//! truncated:  VariableLengthTable<FeatureCount>   sorted by FeatureId, at most budget long
//! meta_data:  VariableLengthTable<(name id, value id)>
//! ```
//!
//! The store is written during bulk ingest only. After that it is read-only
//! and can be shared between search threads without synchronization.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

use exprdb_core::{
    ExprError, FeatureId, ObservationId, Result, StoreConfig, StringId,
};

use crate::growable_array::GrowableArray;
use crate::snapshot::{read_snapshot, write_snapshot};
use crate::string_table::{ProbeStatistics, StringInternTable};
use crate::variable_table::{Extent, VariableLengthTable};

/// File name of the store snapshot inside a store directory
pub const EXPRESSION_STORE_FILE_NAME: &str = "ExpressionStore.bin";

/// Meta data name under which every observation's name is recorded
pub const OBSERVATION_NAME_META_DATA: &str = "CellName";

const SNAPSHOT_KIND: &str = "ExpressionStore";

/// One non-zero entry of a sparse vector
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureCount {
    pub feature: FeatureId,
    pub count: f32,
}

impl FeatureCount {
    pub fn new(feature: FeatureId, count: f32) -> Self {
        Self { feature, count }
    }
}

/// Fixed-size per-observation aggregates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    /// Sum of all counts
    pub sum1: f64,
    /// Sum of squares of all counts
    pub sum2: f64,
    /// Number of entries left out of the truncated vector
    pub discarded_count: u32,
    /// Largest magnitude among the entries left out of the truncated vector
    pub discarded_max: f32,
    counts: Extent,
    truncated: Extent,
}

impl ObservationRecord {
    /// Number of non-zero entries of the full vector
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// L2 norm of the full vector
    pub fn norm(&self) -> f64 {
        self.sum2.sqrt()
    }
}

/// Borrowed view of everything stored for one observation
#[derive(Debug, Clone, Copy)]
pub struct ObservationView<'a> {
    pub id: ObservationId,
    pub record: &'a ObservationRecord,
    pub counts: &'a [FeatureCount],
    pub truncated: &'a [FeatureCount],
}

/// Per-observation scaling applied by [`ExpressionStore::average_expression`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Normalization {
    /// Raw counts
    #[default]
    None,
    /// Counts divided by the sum of their magnitudes
    L1,
    /// Counts divided by their L2 norm
    L2,
}

/// Usage of one meta data name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetaDataNameUsage {
    pub name: String,
    pub observation_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpressionStore {
    config: StoreConfig,
    feature_names: StringInternTable,
    observation_names: StringInternTable,
    meta_data_names: StringInternTable,
    meta_data_values: StringInternTable,
    /// Number of observations using each meta data name
    meta_data_name_usage: GrowableArray<u64>,
    records: GrowableArray<ObservationRecord>,
    counts: VariableLengthTable<FeatureCount>,
    truncated: VariableLengthTable<FeatureCount>,
    meta_data: VariableLengthTable<(StringId, StringId)>,
}

impl ExpressionStore {
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            feature_names: StringInternTable::new("feature names", config.feature_capacity)?,
            observation_names: StringInternTable::new(
                "observation names",
                config.observation_capacity,
            )?,
            meta_data_names: StringInternTable::new(
                "meta data names",
                config.meta_data_name_capacity,
            )?,
            meta_data_values: StringInternTable::new(
                "meta data values",
                config.meta_data_value_capacity,
            )?,
            meta_data_name_usage: GrowableArray::new("meta data name usage"),
            records: GrowableArray::with_capacity_limit(
                "observation records",
                config.observation_capacity as usize,
            ),
            counts: VariableLengthTable::new("observation counts"),
            truncated: VariableLengthTable::new("truncated observation counts"),
            meta_data: VariableLengthTable::new("observation meta data"),
            config,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Features
    // ------------------------------------------------------------------

    /// Register a feature. Returns its id and whether it was new.
    pub fn add_feature(&mut self, name: &str) -> Result<(FeatureId, bool)> {
        self.feature_names.insert(name)
    }

    pub fn feature_id(&self, name: &str) -> Option<FeatureId> {
        self.feature_names.id_of(name)
    }

    pub fn feature_name(&self, feature: FeatureId) -> Result<&str> {
        self.feature_names
            .resolve(feature)
            .ok_or_else(|| ExprError::not_found(format!("feature {}", feature)))
    }

    /// Number of registered features, the dimension of every count vector
    pub fn feature_count(&self) -> usize {
        self.feature_names.len()
    }

    pub fn feature_names(&self) -> impl Iterator<Item = (FeatureId, &str)> + '_ {
        self.feature_names.iter()
    }

    // ------------------------------------------------------------------
    // Observations
    // ------------------------------------------------------------------

    /// Add an observation without meta data other than its name.
    pub fn add_observation(
        &mut self,
        name: &str,
        counts: &[(FeatureId, f32)],
        truncation_budget: usize,
    ) -> Result<ObservationId> {
        self.add_observation_with_meta_data(name, &[], counts, truncation_budget)
    }

    /// Add an observation.
    ///
    /// `counts` need not be sorted. Zero counts are dropped, but still count
    /// towards duplicates. A feature that appears twice fails with
    /// `DuplicateFeature`, an unregistered feature with `NotFound`. All
    /// checks, including capacity checks, run before anything is written, so
    /// a failed call leaves the store unchanged.
    pub fn add_observation_with_meta_data(
        &mut self,
        name: &str,
        meta_data: &[(String, String)],
        counts: &[(FeatureId, f32)],
        truncation_budget: usize,
    ) -> Result<ObservationId> {
        if self.observation_names.id_of(name).is_some() {
            return Err(ExprError::DuplicateName(format!("observation {}", name)));
        }

        let mut sorted: Vec<FeatureCount> = Vec::with_capacity(counts.len());
        for &(feature, count) in counts {
            if !count.is_finite() {
                return Err(ExprError::invalid(format!(
                    "observation {}: count {} for feature {} is not finite",
                    name, count, feature
                )));
            }
            if feature as usize >= self.feature_names.len() {
                return Err(ExprError::not_found(format!(
                    "feature {} in observation {}",
                    feature, name
                )));
            }
            sorted.push(FeatureCount::new(feature, count));
        }
        // Zero counts still take part in the duplicate check.
        sorted.sort_unstable_by_key(|fc| fc.feature);
        if let Some(pair) = sorted.windows(2).find(|w| w[0].feature == w[1].feature) {
            return Err(ExprError::DuplicateFeature {
                observation: name.to_string(),
                feature: pair[0].feature,
            });
        }
        sorted.retain(|fc| fc.count != 0.0);

        let mut pairs: Vec<(&str, &str)> = Vec::with_capacity(meta_data.len() + 1);
        pairs.push((OBSERVATION_NAME_META_DATA, name));
        let mut seen_names = HashSet::new();
        seen_names.insert(OBSERVATION_NAME_META_DATA);
        for (meta_name, value) in meta_data {
            if !seen_names.insert(meta_name.as_str()) {
                return Err(ExprError::DuplicateName(format!(
                    "meta data {} of observation {}",
                    meta_name, name
                )));
            }
            pairs.push((meta_name.as_str(), value.as_str()));
        }

        self.check_room(&pairs)?;

        let (truncated, discarded_count, discarded_max) = truncate(&sorted, truncation_budget);
        let (sum1, sum2) = sorted.iter().fold((0.0f64, 0.0f64), |(s1, s2), fc| {
            let c = fc.count as f64;
            (s1 + c, s2 + c * c)
        });

        let (name_id, _) = self.observation_names.insert(name)?;
        let counts_extent = self.counts.append_bucket(&sorted)?;
        let truncated_extent = self.truncated.append_bucket(&truncated)?;

        let mut meta_ids = Vec::with_capacity(pairs.len());
        for (meta_name, value) in &pairs {
            let (meta_name_id, inserted) = self.meta_data_names.insert(meta_name)?;
            if inserted {
                self.meta_data_name_usage.push(0)?;
            }
            if let Some(usage) = self.meta_data_name_usage.get_mut(meta_name_id as usize) {
                *usage += 1;
            }
            let (value_id, _) = self.meta_data_values.insert(value)?;
            meta_ids.push((meta_name_id, value_id));
        }
        self.meta_data.append_bucket(&meta_ids)?;

        let id = self.records.push(ObservationRecord {
            sum1,
            sum2,
            discarded_count,
            discarded_max,
            counts: counts_extent,
            truncated: truncated_extent,
        })? as ObservationId;
        debug_assert_eq!(id, name_id);

        debug!(
            observation = name,
            id,
            entries = sorted.len(),
            discarded = discarded_count,
            "added observation"
        );
        Ok(id)
    }

    /// Fail with `CapacityExceeded` if the observation or its meta data
    /// strings would not fit.
    fn check_room(&self, pairs: &[(&str, &str)]) -> Result<()> {
        if self.observation_names.len() >= self.observation_names.capacity() {
            return Err(ExprError::capacity_exceeded(
                self.observation_names.name(),
                self.observation_names.capacity() as u64,
            ));
        }
        check_new_strings(&self.meta_data_names, pairs.iter().map(|(n, _)| *n))?;
        check_new_strings(&self.meta_data_values, pairs.iter().map(|(_, v)| *v))
    }

    pub fn observation_count(&self) -> usize {
        self.records.len()
    }

    pub fn observation_id(&self, name: &str) -> Option<ObservationId> {
        self.observation_names.id_of(name)
    }

    pub fn observation_name(&self, observation: ObservationId) -> Result<&str> {
        self.observation_names
            .resolve(observation)
            .ok_or_else(|| observation_not_found(observation))
    }

    pub fn record(&self, observation: ObservationId) -> Result<&ObservationRecord> {
        self.records
            .get(observation as usize)
            .ok_or_else(|| observation_not_found(observation))
    }

    /// Full sparse vector, sorted by feature id
    pub fn counts(&self, observation: ObservationId) -> Result<&[FeatureCount]> {
        let record = self.record(observation)?;
        self.counts
            .resolve(record.counts)
            .ok_or_else(|| dangling_extent(observation))
    }

    /// Truncated sparse vector, sorted by feature id
    pub fn truncated(&self, observation: ObservationId) -> Result<&[FeatureCount]> {
        let record = self.record(observation)?;
        self.truncated
            .resolve(record.truncated)
            .ok_or_else(|| dangling_extent(observation))
    }

    pub fn view(&self, observation: ObservationId) -> Result<ObservationView<'_>> {
        let record = self.record(observation)?;
        let counts = self
            .counts
            .resolve(record.counts)
            .ok_or_else(|| dangling_extent(observation))?;
        let truncated = self
            .truncated
            .resolve(record.truncated)
            .ok_or_else(|| dangling_extent(observation))?;
        Ok(ObservationView {
            id: observation,
            record,
            counts,
            truncated,
        })
    }

    /// Count of one feature in one observation, 0 when absent
    pub fn get_count(&self, observation: ObservationId, feature: FeatureId) -> Result<f32> {
        let counts = self.counts(observation)?;
        Ok(counts
            .binary_search_by_key(&feature, |fc| fc.feature)
            .map(|i| counts[i].count)
            .unwrap_or(0.0))
    }

    // ------------------------------------------------------------------
    // Meta data
    // ------------------------------------------------------------------

    /// Value of a meta data field, `None` when the observation does not have it
    pub fn meta_data(&self, observation: ObservationId, name: &str) -> Result<Option<&str>> {
        let pairs = self
            .meta_data
            .get(observation as usize)
            .ok_or_else(|| observation_not_found(observation))?;
        let Some(name_id) = self.meta_data_names.id_of(name) else {
            return Ok(None);
        };
        Ok(pairs
            .iter()
            .find(|(n, _)| *n == name_id)
            .and_then(|(_, v)| self.meta_data_values.resolve(*v)))
    }

    /// All meta data of an observation, in insertion order
    pub fn meta_data_pairs(&self, observation: ObservationId) -> Result<Vec<(&str, &str)>> {
        let pairs = self
            .meta_data
            .get(observation as usize)
            .ok_or_else(|| observation_not_found(observation))?;
        pairs
            .iter()
            .map(|&(n, v)| {
                match (self.meta_data_names.resolve(n), self.meta_data_values.resolve(v)) {
                    (Some(n), Some(v)) => Ok((n, v)),
                    _ => Err(ExprError::Corruption(format!(
                        "meta data of observation {} refers to unknown strings",
                        observation
                    ))),
                }
            })
            .collect()
    }

    /// Every meta data name with the number of observations using it
    pub fn meta_data_names(&self) -> Vec<MetaDataNameUsage> {
        self.meta_data_names
            .iter()
            .map(|(id, name)| MetaDataNameUsage {
                name: name.to_string(),
                observation_count: self
                    .meta_data_name_usage
                    .get(id as usize)
                    .copied()
                    .unwrap_or(0),
            })
            .collect()
    }

    /// Frequency of each value of a meta data field over a group of
    /// observations, most frequent first, ties by value.
    pub fn histogram_meta_data(
        &self,
        observations: &[ObservationId],
        name: &str,
    ) -> Result<Vec<(String, u64)>> {
        let name_id = self
            .meta_data_names
            .id_of(name)
            .ok_or_else(|| ExprError::not_found(format!("meta data name {}", name)))?;

        let mut frequency: HashMap<StringId, u64> = HashMap::new();
        for &observation in observations {
            let pairs = self
                .meta_data
                .get(observation as usize)
                .ok_or_else(|| observation_not_found(observation))?;
            if let Some(&(_, value)) = pairs.iter().find(|(n, _)| *n == name_id) {
                *frequency.entry(value).or_default() += 1;
            }
        }

        let mut histogram: Vec<(String, u64)> = frequency
            .into_iter()
            .filter_map(|(value, count)| {
                self.meta_data_values
                    .resolve(value)
                    .map(|v| (v.to_string(), count))
            })
            .collect();
        histogram.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(histogram)
    }

    // ------------------------------------------------------------------
    // Aggregates
    // ------------------------------------------------------------------

    /// Average of the (optionally normalized) count vectors of a group of
    /// observations, evaluated at `features`.
    pub fn average_expression(
        &self,
        observations: &[ObservationId],
        features: &[FeatureId],
        normalization: Normalization,
    ) -> Result<Vec<f64>> {
        if observations.is_empty() {
            return Err(ExprError::invalid(
                "cannot average the expression of an empty observation group",
            ));
        }
        if let Some(&feature) = features
            .iter()
            .find(|&&f| f as usize >= self.feature_count())
        {
            return Err(ExprError::not_found(format!("feature {}", feature)));
        }

        let mut total = vec![0.0f64; self.feature_count()];
        for &observation in observations {
            let view = self.view(observation)?;
            let norm = match normalization {
                Normalization::None => 1.0,
                Normalization::L1 => view.counts.iter().map(|fc| fc.count.abs() as f64).sum(),
                Normalization::L2 => view.record.norm(),
            };
            if norm == 0.0 {
                continue;
            }
            for fc in view.counts {
                total[fc.feature as usize] += fc.count as f64 / norm;
            }
        }

        let n = observations.len() as f64;
        Ok(features.iter().map(|&f| total[f as usize] / n).collect())
    }

    /// Probe statistics of every string table, for the hash table summary
    pub fn string_table_statistics(&self) -> Vec<(&str, ProbeStatistics)> {
        [
            &self.feature_names,
            &self.observation_names,
            &self.meta_data_names,
            &self.meta_data_values,
        ]
        .into_iter()
        .map(|table| (table.name(), table.probe_statistics()))
        .collect()
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Write `config.json` and the store snapshot into `dir`
    pub fn save(&self, dir: &Path) -> Result<()> {
        self.config.save(dir)?;
        write_snapshot(&dir.join(EXPRESSION_STORE_FILE_NAME), SNAPSHOT_KIND, self)?;
        info!(
            dir = %dir.display(),
            features = self.feature_count(),
            observations = self.observation_count(),
            "saved expression store"
        );
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let store: Self = read_snapshot(&dir.join(EXPRESSION_STORE_FILE_NAME), SNAPSHOT_KIND)?;
        store.check_consistency()?;
        info!(
            dir = %dir.display(),
            features = store.feature_count(),
            observations = store.observation_count(),
            "loaded expression store"
        );
        Ok(store)
    }

    fn check_consistency(&self) -> Result<()> {
        let n = self.records.len();
        if self.observation_names.len() != n
            || self.counts.len() != n
            || self.truncated.len() != n
            || self.meta_data.len() != n
            || self.meta_data_name_usage.len() != self.meta_data_names.len()
        {
            return Err(ExprError::Corruption(
                "expression store tables have inconsistent lengths".to_string(),
            ));
        }
        Ok(())
    }
}

/// Split a sorted vector into its `budget` largest-magnitude entries (ties
/// to the lower feature id), still sorted by feature id, plus the number and
/// maximum magnitude of the discarded entries.
fn truncate(sorted: &[FeatureCount], budget: usize) -> (Vec<FeatureCount>, u32, f32) {
    if sorted.len() <= budget {
        return (sorted.to_vec(), 0, 0.0);
    }

    let mut by_magnitude = sorted.to_vec();
    by_magnitude.sort_unstable_by(|a, b| {
        b.count
            .abs()
            .partial_cmp(&a.count.abs())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.feature.cmp(&b.feature))
    });
    let discarded = &by_magnitude[budget..];
    let discarded_count = discarded.len() as u32;
    let discarded_max = discarded
        .iter()
        .map(|fc| fc.count.abs())
        .fold(0.0f32, f32::max);

    let mut kept = by_magnitude[..budget].to_vec();
    kept.sort_unstable_by_key(|fc| fc.feature);
    (kept, discarded_count, discarded_max)
}

fn check_new_strings<'a>(
    table: &StringInternTable,
    strings: impl Iterator<Item = &'a str>,
) -> Result<()> {
    let new: HashSet<&str> = strings.filter(|s| table.id_of(s).is_none()).collect();
    if table.len() + new.len() > table.capacity() {
        return Err(ExprError::capacity_exceeded(
            table.name(),
            table.capacity() as u64,
        ));
    }
    Ok(())
}

fn observation_not_found(observation: ObservationId) -> ExprError {
    ExprError::not_found(format!("observation {}", observation))
}

fn dangling_extent(observation: ObservationId) -> ExprError {
    ExprError::Corruption(format!(
        "observation {} refers to data outside its table",
        observation
    ))
}
