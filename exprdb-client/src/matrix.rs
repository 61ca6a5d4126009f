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

//! The expression matrix context
//!
//! [`ExpressionMatrix`] owns one store directory: the expression store, the
//! named observation and feature sets, the named neighbor lists and the
//! in-memory similarity graphs. There is no global registry; every named
//! object is reached through this value.
//!
//! Persistence:
//!
//! - the store and the set registries are written by [`ExpressionMatrix::save`]
//! - a neighbor list is written when it is created, after saving the store
//!   if it has unsaved changes, so files on disk always agree
//! - graphs are never written

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use exprdb_core::config::validate_load_factor;
use exprdb_core::{
    ExprError, FeatureId, LshParams, ObservationId, Result, SearchConfig, SimilarPairsParams,
    StoreConfig,
};
use exprdb_index::{
    analyze_all_pairs, build_thread_pool, compare_lsh_similarity, similar_pairs_file_name,
    similar_pairs_name, GraphSummary, LshComparison, LshIndex, PairAnalysis, SearchControl,
    SimilarPairs, SimilarityEngine, SimilarityGraph, SimilarityMode,
};
use exprdb_storage::{
    ExpressionStore, FeatureSet, NamedIdSets, Normalization, ObservationSet, ProbeStatistics,
    EXPRESSION_STORE_FILE_NAME, FEATURE_SETS_FILE_NAME, OBSERVATION_SETS_FILE_NAME,
};

/// How a similar-pairs search scores pairs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PairsMethod {
    /// Full vectors, all pairs
    Exact,
    /// Truncated vectors, all pairs
    Truncated,
    /// LSH signatures, all pairs
    Lsh { lsh: LshParams },
    /// LSH signatures, candidates from band buckets only
    LshBanded { lsh: LshParams, load_factor: f64 },
}

impl PairsMethod {
    pub fn validate(&self) -> Result<()> {
        match self {
            PairsMethod::Exact | PairsMethod::Truncated => Ok(()),
            PairsMethod::Lsh { lsh } => lsh.validate(),
            PairsMethod::LshBanded { lsh, load_factor } => {
                lsh.validate_banded()?;
                validate_load_factor(*load_factor)
            }
        }
    }
}

/// Overview of a matrix, for reporting
#[derive(Debug, Clone, Serialize)]
pub struct MatrixInfo {
    pub directory: PathBuf,
    pub feature_count: usize,
    pub observation_count: usize,
    pub truncation_budget: usize,
    pub observation_sets: Vec<(String, usize)>,
    pub feature_sets: Vec<(String, usize)>,
    pub similar_pairs: Vec<(String, String, usize)>,
    pub graphs: Vec<GraphSummary>,
}

pub struct ExpressionMatrix {
    directory: PathBuf,
    store: ExpressionStore,
    observation_sets: NamedIdSets,
    feature_sets: NamedIdSets,
    similar_pairs: BTreeMap<String, SimilarPairs>,
    graphs: BTreeMap<String, SimilarityGraph>,
    search_config: SearchConfig,
    pool: rayon::ThreadPool,
    control: Arc<SearchControl>,
    /// Store or set registries changed since the last save
    dirty: bool,
}

/// Names become file names, so they are kept to a safe subset
fn validate_object_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !valid {
        return Err(ExprError::invalid(format!(
            "name {:?} must be non-empty and use only letters, digits, '_', '-' and '.'",
            name
        )));
    }
    Ok(())
}

impl ExpressionMatrix {
    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Create a new, empty matrix in `directory`
    pub fn create(
        directory: impl AsRef<Path>,
        config: StoreConfig,
        search_config: SearchConfig,
    ) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        if directory.join(EXPRESSION_STORE_FILE_NAME).exists() {
            return Err(ExprError::DuplicateName(format!(
                "a store already exists in {:?}",
                directory
            )));
        }
        fs::create_dir_all(&directory)?;

        let mut matrix = Self::assemble(
            directory,
            ExpressionStore::new(config)?,
            NamedIdSets::observations(),
            NamedIdSets::features(),
            BTreeMap::new(),
            search_config,
        )?;
        matrix.dirty = true;
        matrix.save()?;
        info!(directory = %matrix.directory.display(), "created expression matrix");
        Ok(matrix)
    }

    /// Open the matrix stored in `directory`, with its neighbor lists
    pub fn open(directory: impl AsRef<Path>, search_config: SearchConfig) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        let store = ExpressionStore::load(&directory)?;
        let observation_sets = NamedIdSets::load(&directory.join(OBSERVATION_SETS_FILE_NAME))?;
        let feature_sets = NamedIdSets::load(&directory.join(FEATURE_SETS_FILE_NAME))?;
        if observation_sets.all().len() != store.observation_count()
            || feature_sets.all().len() != store.feature_count()
        {
            return Err(ExprError::Corruption(format!(
                "{:?}: set registries do not match the expression store",
                directory
            )));
        }

        let mut similar_pairs = BTreeMap::new();
        for entry in fs::read_dir(&directory)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str().and_then(similar_pairs_name) else {
                continue;
            };
            let pairs = SimilarPairs::load(&entry.path())?;
            if let Some(&last) = pairs.observations().as_slice().last() {
                if last as usize >= store.observation_count() {
                    return Err(ExprError::Corruption(format!(
                        "similar pairs {} refer to observation {} which is not in the store",
                        name, last
                    )));
                }
            }
            debug!(name, pairs = pairs.pair_count(), "loaded similar pairs");
            similar_pairs.insert(name.to_string(), pairs);
        }

        let matrix = Self::assemble(
            directory,
            store,
            observation_sets,
            feature_sets,
            similar_pairs,
            search_config,
        )?;
        info!(
            directory = %matrix.directory.display(),
            observations = matrix.store.observation_count(),
            features = matrix.store.feature_count(),
            similar_pairs = matrix.similar_pairs.len(),
            "opened expression matrix"
        );
        Ok(matrix)
    }

    fn assemble(
        directory: PathBuf,
        store: ExpressionStore,
        observation_sets: NamedIdSets,
        feature_sets: NamedIdSets,
        similar_pairs: BTreeMap<String, SimilarPairs>,
        search_config: SearchConfig,
    ) -> Result<Self> {
        let pool = build_thread_pool(&search_config)?;
        let control = Arc::new(SearchControl::new(&search_config));
        Ok(Self {
            directory,
            store,
            observation_sets,
            feature_sets,
            similar_pairs,
            graphs: BTreeMap::new(),
            search_config,
            pool,
            control,
            dirty: false,
        })
    }

    /// Write the store and the set registries if they changed
    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        self.store.save(&self.directory)?;
        self.observation_sets
            .save(&self.directory.join(OBSERVATION_SETS_FILE_NAME))?;
        self.feature_sets
            .save(&self.directory.join(FEATURE_SETS_FILE_NAME))?;
        self.dirty = false;
        Ok(())
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.dirty
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn store(&self) -> &ExpressionStore {
        &self.store
    }

    pub fn search_config(&self) -> &SearchConfig {
        &self.search_config
    }

    /// Handle for cancelling a running search from another thread
    pub fn search_control(&self) -> Arc<SearchControl> {
        Arc::clone(&self.control)
    }

    pub fn info(&self) -> MatrixInfo {
        let sizes = |sets: &NamedIdSets| -> Vec<(String, usize)> {
            sets.iter()
                .map(|(name, set)| (name.to_string(), set.len()))
                .collect()
        };
        MatrixInfo {
            directory: self.directory.clone(),
            feature_count: self.store.feature_count(),
            observation_count: self.store.observation_count(),
            truncation_budget: self.store.config().truncation_budget,
            observation_sets: sizes(&self.observation_sets),
            feature_sets: sizes(&self.feature_sets),
            similar_pairs: self
                .similar_pairs
                .iter()
                .map(|(name, pairs)| (name.clone(), pairs.method().to_string(), pairs.pair_count()))
                .collect(),
            graphs: self.graphs.values().map(|g| g.summary().clone()).collect(),
        }
    }

    // ------------------------------------------------------------------
    // Ingest
    // ------------------------------------------------------------------

    /// Register a feature, returning the existing id for a known name
    pub fn add_feature(&mut self, name: &str) -> Result<FeatureId> {
        let (id, inserted) = self.store.add_feature(name)?;
        if inserted {
            self.feature_sets.register(id)?;
            self.dirty = true;
        }
        Ok(id)
    }

    /// Add an observation, truncated with the store's configured budget
    pub fn add_observation(
        &mut self,
        name: &str,
        meta_data: &[(String, String)],
        counts: &[(FeatureId, f32)],
    ) -> Result<ObservationId> {
        let budget = self.store.config().truncation_budget;
        let id = self
            .store
            .add_observation_with_meta_data(name, meta_data, counts, budget)?;
        self.observation_sets.register(id)?;
        self.dirty = true;
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Observation and feature sets
    // ------------------------------------------------------------------

    pub fn observation_sets(&self) -> &NamedIdSets {
        &self.observation_sets
    }

    pub fn observation_set(&self, name: &str) -> Result<&ObservationSet> {
        self.observation_sets.get(name)
    }

    pub fn list_observation_sets(&self) -> Vec<String> {
        self.observation_sets.names().map(str::to_string).collect()
    }

    /// New set from observation names
    pub fn create_observation_set(
        &mut self,
        name: &str,
        observations: &[&str],
    ) -> Result<&ObservationSet> {
        let ids = observations
            .iter()
            .map(|o| {
                self.store
                    .observation_id(o)
                    .ok_or_else(|| ExprError::not_found(format!("observation {}", o)))
            })
            .collect::<Result<Vec<_>>>()?;
        let set = self.observation_sets.add(name, ids)?;
        self.dirty = true;
        Ok(set)
    }

    /// New set of the observations whose meta data field `meta_data_name`
    /// matches `pattern` in full
    pub fn create_observation_set_from_meta_data(
        &mut self,
        name: &str,
        meta_data_name: &str,
        pattern: &str,
    ) -> Result<&ObservationSet> {
        if self.observation_sets.contains(name) {
            return Err(ExprError::DuplicateName(format!("set {}", name)));
        }
        if !self
            .store
            .meta_data_names()
            .iter()
            .any(|usage| usage.name == meta_data_name)
        {
            return Err(ExprError::not_found(format!("meta data name {}", meta_data_name)));
        }
        let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
            ExprError::invalid(format!("regular expression {:?}: {}", pattern, e))
        })?;

        let set = self.observation_sets.all().filter(|id| {
            Ok(self
                .store
                .meta_data(id, meta_data_name)?
                .is_some_and(|value| regex.is_match(value)))
        })?;
        let set = self.observation_sets.insert(name, set)?;
        self.dirty = true;
        Ok(set)
    }

    pub fn create_observation_set_intersection(
        &mut self,
        name: &str,
        inputs: &[&str],
    ) -> Result<&ObservationSet> {
        let set = self.observation_sets.create_intersection(name, inputs)?;
        self.dirty = true;
        Ok(set)
    }

    pub fn create_observation_set_union(
        &mut self,
        name: &str,
        inputs: &[&str],
    ) -> Result<&ObservationSet> {
        let set = self.observation_sets.create_union(name, inputs)?;
        self.dirty = true;
        Ok(set)
    }

    /// Keep each observation of `input` with the given probability
    pub fn downsample_observation_set(
        &mut self,
        name: &str,
        input: &str,
        probability: f64,
        seed: u64,
    ) -> Result<&ObservationSet> {
        let set = self
            .observation_sets
            .create_downsampled(name, input, probability, seed)?;
        self.dirty = true;
        Ok(set)
    }

    pub fn remove_observation_set(&mut self, name: &str) -> Result<()> {
        self.observation_sets.remove(name)?;
        self.dirty = true;
        Ok(())
    }

    pub fn feature_sets(&self) -> &NamedIdSets {
        &self.feature_sets
    }

    pub fn list_feature_sets(&self) -> Vec<String> {
        self.feature_sets.names().map(str::to_string).collect()
    }

    /// New set from feature names
    pub fn create_feature_set(&mut self, name: &str, features: &[&str]) -> Result<&FeatureSet> {
        let ids = features
            .iter()
            .map(|f| {
                self.store
                    .feature_id(f)
                    .ok_or_else(|| ExprError::not_found(format!("feature {}", f)))
            })
            .collect::<Result<Vec<_>>>()?;
        let set = self.feature_sets.add(name, ids)?;
        self.dirty = true;
        Ok(set)
    }

    pub fn remove_feature_set(&mut self, name: &str) -> Result<()> {
        self.feature_sets.remove(name)?;
        self.dirty = true;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Meta data and aggregates
    // ------------------------------------------------------------------

    pub fn histogram_meta_data(
        &self,
        observation_set: &str,
        meta_data_name: &str,
    ) -> Result<Vec<(String, u64)>> {
        let set = self.observation_sets.get(observation_set)?;
        self.store.histogram_meta_data(set.as_slice(), meta_data_name)
    }

    /// Average expression of an observation set over a feature set
    pub fn average_expression(
        &self,
        observation_set: &str,
        feature_set: &str,
        normalization: Normalization,
    ) -> Result<Vec<(FeatureId, f64)>> {
        let observations = self.observation_sets.get(observation_set)?;
        let features = self.feature_sets.get(feature_set)?;
        let averages =
            self.store
                .average_expression(observations.as_slice(), features.as_slice(), normalization)?;
        Ok(features.iter().zip(averages).collect())
    }

    /// Probe statistics of every string table
    pub fn hash_table_summary(&self) -> Vec<(String, ProbeStatistics)> {
        self.store
            .string_table_statistics()
            .into_iter()
            .map(|(name, statistics)| (name.to_string(), statistics))
            .collect()
    }

    // ------------------------------------------------------------------
    // Similar pairs
    // ------------------------------------------------------------------

    /// Compute and persist a named neighbor list over an observation set.
    ///
    /// Names and parameters are checked before the search starts.
    pub fn find_similar_pairs(
        &mut self,
        name: &str,
        observation_set: &str,
        params: SimilarPairsParams,
        method: PairsMethod,
    ) -> Result<&SimilarPairs> {
        validate_object_name(name)?;
        if self.similar_pairs.contains_key(name) {
            return Err(ExprError::DuplicateName(format!("similar pairs {}", name)));
        }
        params.validate()?;
        method.validate()?;
        let set = self.observation_sets.get(observation_set)?;

        let started = Instant::now();
        let store = &self.store;
        let control = &*self.control;
        let pairs = self.pool.install(|| match method {
            PairsMethod::Exact => SimilarityEngine::new(store).find_similar_pairs(
                set,
                params,
                SimilarityMode::Exact,
                control,
            ),
            PairsMethod::Truncated => SimilarityEngine::new(store).find_similar_pairs(
                set,
                params,
                SimilarityMode::Truncated,
                control,
            ),
            PairsMethod::Lsh { lsh } => {
                LshIndex::build(store, set, lsh, control)?.find_similar_pairs_all(params, control)
            }
            PairsMethod::LshBanded { lsh, load_factor } => {
                LshIndex::build_banded(store, set, lsh, load_factor, control)?
                    .find_similar_pairs_subquadratic(params, load_factor, control)
            }
        })?;
        info!(
            name,
            observation_set,
            method = pairs.method(),
            pairs = pairs.pair_count(),
            elapsed_s = started.elapsed().as_secs_f64(),
            "created similar pairs"
        );

        self.save()?;
        pairs.save(&self.directory.join(similar_pairs_file_name(name)))?;
        Ok(self.similar_pairs.entry(name.to_string()).or_insert(pairs))
    }

    pub fn similar_pairs(&self, name: &str) -> Result<&SimilarPairs> {
        self.similar_pairs
            .get(name)
            .ok_or_else(|| ExprError::not_found(format!("similar pairs {}", name)))
    }

    pub fn list_similar_pairs(&self) -> Vec<String> {
        self.similar_pairs.keys().cloned().collect()
    }

    /// Forget a neighbor list and delete its file
    pub fn remove_similar_pairs(&mut self, name: &str) -> Result<()> {
        if self.similar_pairs.remove(name).is_none() {
            return Err(ExprError::not_found(format!("similar pairs {}", name)));
        }
        let path = self.directory.join(similar_pairs_file_name(name));
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "similar pairs file was already gone");
            }
            Err(e) => return Err(e.into()),
        }
        info!(name, "removed similar pairs");
        Ok(())
    }

    /// Write a neighbor list as `id0,id1,similarity` rows
    pub fn export_similar_pairs(&self, name: &str, path: &Path) -> Result<()> {
        let pairs = self.similar_pairs(name)?;
        let file = fs::File::create(path)?;
        pairs.write_csv(std::io::BufWriter::new(file))?;
        info!(name, path = %path.display(), "exported similar pairs");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Graphs
    // ------------------------------------------------------------------

    pub fn create_graph(
        &mut self,
        name: &str,
        observation_set: &str,
        similar_pairs: &str,
        similarity_threshold: f64,
        max_connectivity: usize,
        remove_isolated_vertices: bool,
    ) -> Result<&GraphSummary> {
        validate_object_name(name)?;
        if self.graphs.contains_key(name) {
            return Err(ExprError::DuplicateName(format!("graph {}", name)));
        }
        let set = self.observation_sets.get(observation_set)?;
        let pairs = self.similar_pairs(similar_pairs)?;

        let mut graph = SimilarityGraph::build(
            observation_set,
            set,
            similar_pairs,
            pairs,
            similarity_threshold,
            max_connectivity,
        )?;
        if remove_isolated_vertices {
            graph.remove_isolated_vertices();
        }
        Ok(self.graphs.entry(name.to_string()).or_insert(graph).summary())
    }

    pub fn graph(&self, name: &str) -> Result<&SimilarityGraph> {
        self.graphs
            .get(name)
            .ok_or_else(|| ExprError::not_found(format!("graph {}", name)))
    }

    pub fn list_graphs(&self) -> Vec<String> {
        self.graphs.keys().cloned().collect()
    }

    pub fn remove_graph(&mut self, name: &str) -> Result<()> {
        self.graphs
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ExprError::not_found(format!("graph {}", name)))
    }

    pub fn export_graph(&self, name: &str, path: &Path) -> Result<()> {
        let graph = self.graph(name)?;
        let file = fs::File::create(path)?;
        graph.write_csv(std::io::BufWriter::new(file))?;
        info!(name, path = %path.display(), "exported graph");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Truncated vs exact similarity over all pairs of a set
    pub fn analyze_all_pairs(
        &self,
        observation_set: &str,
        bin_count: usize,
    ) -> Result<PairAnalysis> {
        let set = self.observation_sets.get(observation_set)?;
        let engine = SimilarityEngine::new(&self.store);
        let control = &*self.control;
        self.pool
            .install(|| analyze_all_pairs(&engine, set, bin_count, control))
    }

    /// LSH estimate vs exact similarity over all pairs of a set
    pub fn compare_lsh(&self, observation_set: &str, lsh: LshParams) -> Result<LshComparison> {
        lsh.validate()?;
        let set = self.observation_sets.get(observation_set)?;
        let engine = SimilarityEngine::new(&self.store);
        let control = &*self.control;
        self.pool
            .install(|| compare_lsh_similarity(&engine, set, lsh, control))
    }
}
