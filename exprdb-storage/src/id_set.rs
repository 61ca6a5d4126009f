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

//! Ordered id sets and their named registries
//!
//! An [`IdSet`] is a sorted, duplicate-free sequence of ids. Searches run over
//! an observation set and address its members by *local index* (position in
//! the set), which is what the per-observation result tables are keyed by.
//!
//! [`NamedIdSets`] keeps the sets of one kind by name. It always contains a
//! set holding every id (`AllCells` for observations, `AllGenes` for
//! features) which cannot be removed.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use exprdb_core::{ExprError, Result};

use crate::snapshot::{read_snapshot, write_snapshot};

pub const ALL_OBSERVATIONS_SET_NAME: &str = "AllCells";
pub const ALL_FEATURES_SET_NAME: &str = "AllGenes";
pub const OBSERVATION_SETS_FILE_NAME: &str = "ObservationSets.bin";
pub const FEATURE_SETS_FILE_NAME: &str = "FeatureSets.bin";

/// Sorted, duplicate-free sequence of ids
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdSet {
    ids: Vec<u32>,
}

/// Set of `ObservationId`s
pub type ObservationSet = IdSet;

/// Set of `FeatureId`s
pub type FeatureSet = IdSet;

impl IdSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorts and deduplicates
    pub fn from_ids(mut ids: Vec<u32>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        Self { ids }
    }

    /// `0..n`
    pub fn all(n: usize) -> Self {
        Self {
            ids: (0..n as u32).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    /// Local index of `id` within the set
    pub fn position(&self, id: u32) -> Option<usize> {
        self.ids.binary_search(&id).ok()
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.ids
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.ids.iter().copied()
    }

    /// Append an id larger than every id in the set
    pub fn push_largest(&mut self, id: u32) -> Result<()> {
        if let Some(&last) = self.ids.last() {
            if id <= last {
                return Err(ExprError::invalid(format!(
                    "id {} is not larger than the last set member {}",
                    id, last
                )));
            }
        }
        self.ids.push(id);
        Ok(())
    }

    pub fn intersection(&self, other: &IdSet) -> IdSet {
        let (mut i, mut j) = (0, 0);
        let mut ids = Vec::new();
        while i < self.ids.len() && j < other.ids.len() {
            match self.ids[i].cmp(&other.ids[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    ids.push(self.ids[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        IdSet { ids }
    }

    pub fn union(&self, other: &IdSet) -> IdSet {
        let mut ids = Vec::with_capacity(self.ids.len() + other.ids.len());
        let (mut i, mut j) = (0, 0);
        while i < self.ids.len() || j < other.ids.len() {
            let next = match (self.ids.get(i), other.ids.get(j)) {
                (Some(&a), Some(&b)) if a == b => {
                    i += 1;
                    j += 1;
                    a
                }
                (Some(&a), Some(&b)) if a < b => {
                    i += 1;
                    a
                }
                (_, Some(&b)) => {
                    j += 1;
                    b
                }
                (Some(&a), None) => {
                    i += 1;
                    a
                }
                (None, None) => break,
            };
            ids.push(next);
        }
        IdSet { ids }
    }

    /// Members for which `keep` returns true
    pub fn filter(&self, mut keep: impl FnMut(u32) -> Result<bool>) -> Result<IdSet> {
        let mut ids = Vec::new();
        for &id in &self.ids {
            if keep(id)? {
                ids.push(id);
            }
        }
        Ok(IdSet { ids })
    }

    /// Keep each member independently with the given probability
    pub fn downsample(&self, probability: f64, seed: u64) -> Result<IdSet> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(ExprError::invalid(format!(
                "downsampling probability {} is outside [0, 1]",
                probability
            )));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let ids = self
            .ids
            .iter()
            .copied()
            .filter(|_| rng.gen_bool(probability))
            .collect();
        Ok(IdSet { ids })
    }
}

/// Named sets of one kind of id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedIdSets {
    /// Name of the set that always holds every id
    all_name: String,
    sets: BTreeMap<String, IdSet>,
}

impl NamedIdSets {
    pub fn new(all_name: &str) -> Self {
        let mut sets = BTreeMap::new();
        sets.insert(all_name.to_string(), IdSet::new());
        Self {
            all_name: all_name.to_string(),
            sets,
        }
    }

    /// Registry of observation sets, containing `AllCells`
    pub fn observations() -> Self {
        Self::new(ALL_OBSERVATIONS_SET_NAME)
    }

    /// Registry of feature sets, containing `AllGenes`
    pub fn features() -> Self {
        Self::new(ALL_FEATURES_SET_NAME)
    }

    pub fn all_name(&self) -> &str {
        &self.all_name
    }

    /// The set holding every id
    pub fn all(&self) -> &IdSet {
        // Present from construction and never removable.
        &self.sets[&self.all_name]
    }

    /// Record a newly created id in the all-ids set
    pub fn register(&mut self, id: u32) -> Result<()> {
        match self.sets.get_mut(&self.all_name) {
            Some(all) => all.push_largest(id),
            None => Err(ExprError::Corruption(format!(
                "set {} is missing",
                self.all_name
            ))),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sets.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<&IdSet> {
        self.sets
            .get(name)
            .ok_or_else(|| ExprError::not_found(format!("set {}", name)))
    }

    /// Names in lexicographic order
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.sets.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &IdSet)> + '_ {
        self.sets.iter().map(|(name, set)| (name.as_str(), set))
    }

    /// Add a set built from arbitrary ids (sorted and deduplicated here)
    pub fn add(&mut self, name: &str, ids: Vec<u32>) -> Result<&IdSet> {
        self.insert(name, IdSet::from_ids(ids))
    }

    pub fn insert(&mut self, name: &str, set: IdSet) -> Result<&IdSet> {
        if name.is_empty() {
            return Err(ExprError::invalid("set names must not be empty"));
        }
        if self.sets.contains_key(name) {
            return Err(ExprError::DuplicateName(format!("set {}", name)));
        }
        if let Some(&last) = set.ids.last() {
            if last as usize >= self.all().len() {
                return Err(ExprError::not_found(format!("id {} in set {}", last, name)));
            }
        }
        info!(set = name, size = set.len(), "created set");
        Ok(self.sets.entry(name.to_string()).or_insert(set))
    }

    pub fn remove(&mut self, name: &str) -> Result<IdSet> {
        if name == self.all_name {
            return Err(ExprError::invalid(format!("set {} cannot be removed", name)));
        }
        self.sets
            .remove(name)
            .ok_or_else(|| ExprError::not_found(format!("set {}", name)))
    }

    /// New set holding the ids present in every named input set
    pub fn create_intersection(&mut self, name: &str, inputs: &[&str]) -> Result<&IdSet> {
        let set = self.combine(inputs, IdSet::intersection)?;
        self.insert(name, set)
    }

    /// New set holding the ids present in any named input set
    pub fn create_union(&mut self, name: &str, inputs: &[&str]) -> Result<&IdSet> {
        let set = self.combine(inputs, IdSet::union)?;
        self.insert(name, set)
    }

    pub fn create_downsampled(
        &mut self,
        name: &str,
        input: &str,
        probability: f64,
        seed: u64,
    ) -> Result<&IdSet> {
        let set = self.get(input)?.downsample(probability, seed)?;
        self.insert(name, set)
    }

    fn combine(&self, inputs: &[&str], op: fn(&IdSet, &IdSet) -> IdSet) -> Result<IdSet> {
        let (first, rest) = inputs
            .split_first()
            .ok_or_else(|| ExprError::invalid("at least one input set is required"))?;
        let mut result = self.get(first)?.clone();
        for input in rest {
            result = op(&result, self.get(input)?);
        }
        Ok(result)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_snapshot(path, "NamedIdSets", self)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let sets: Self = read_snapshot(path, "NamedIdSets")?;
        if !sets.sets.contains_key(&sets.all_name) {
            return Err(ExprError::Corruption(format!(
                "{:?}: set {} is missing",
                path, sets.all_name
            )));
        }
        Ok(sets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(n: u32) -> NamedIdSets {
        let mut sets = NamedIdSets::observations();
        for id in 0..n {
            sets.register(id).unwrap();
        }
        sets
    }

    #[test]
    fn test_from_ids_sorts_and_dedups() {
        let set = IdSet::from_ids(vec![5, 1, 3, 1, 5]);
        assert_eq!(set.as_slice(), &[1, 3, 5]);
        assert!(set.contains(3));
        assert!(!set.contains(2));
        assert_eq!(set.position(5), Some(2));
        assert_eq!(set.position(4), None);
    }

    #[test]
    fn test_intersection_union() {
        let a = IdSet::from_ids(vec![1, 2, 3, 7]);
        let b = IdSet::from_ids(vec![2, 3, 4, 9]);
        assert_eq!(a.intersection(&b).as_slice(), &[2, 3]);
        assert_eq!(a.union(&b).as_slice(), &[1, 2, 3, 4, 7, 9]);
        assert!(a.intersection(&IdSet::new()).is_empty());
        assert_eq!(IdSet::new().union(&b), b);
    }

    #[test]
    fn test_downsample() {
        let all = IdSet::all(1000);
        let half = all.downsample(0.5, 42).unwrap();
        assert!(half.len() > 400 && half.len() < 600);
        assert_eq!(half, all.downsample(0.5, 42).unwrap());
        assert_eq!(all.downsample(0.0, 1).unwrap().len(), 0);
        assert_eq!(all.downsample(1.0, 1).unwrap().len(), 1000);
        assert!(all.downsample(1.5, 1).is_err());
    }

    #[test]
    fn test_all_set_tracks_registered_ids() {
        let mut sets = registry(3);
        assert_eq!(sets.all().as_slice(), &[0, 1, 2]);
        assert!(sets.register(1).is_err());
        assert!(sets.remove(ALL_OBSERVATIONS_SET_NAME).is_err());
    }

    #[test]
    fn test_lifecycle() {
        let mut sets = registry(10);
        sets.add("even", vec![0, 2, 4, 6, 8]).unwrap();
        assert!(matches!(
            sets.add("even", vec![0]).unwrap_err(),
            ExprError::DuplicateName(_)
        ));
        assert!(matches!(
            sets.add("bad", vec![10]).unwrap_err(),
            ExprError::NotFound(_)
        ));
        assert_eq!(sets.names().collect::<Vec<_>>(), vec!["AllCells", "even"]);

        sets.remove("even").unwrap();
        assert!(matches!(
            sets.remove("even").unwrap_err(),
            ExprError::NotFound(_)
        ));
        assert!(sets.get("even").is_err());
    }

    #[test]
    fn test_derived_sets() {
        let mut sets = registry(10);
        sets.add("low", vec![0, 1, 2, 3, 4]).unwrap();
        sets.add("even", vec![0, 2, 4, 6, 8]).unwrap();

        let both = sets.create_intersection("low_even", &["low", "even"]).unwrap();
        assert_eq!(both.as_slice(), &[0, 2, 4]);

        let any = sets.create_union("low_or_even", &["low", "even"]).unwrap();
        assert_eq!(any.as_slice(), &[0, 1, 2, 3, 4, 6, 8]);

        assert!(sets.create_union("none", &[]).is_err());
        assert!(sets.create_union("missing", &["low", "absent"]).is_err());
        assert!(!sets.contains("missing"));

        let sample = sets.create_downsampled("sample", "AllCells", 0.5, 7).unwrap();
        assert!(sample.len() <= 10);
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(OBSERVATION_SETS_FILE_NAME);
        let mut sets = registry(4);
        sets.add("pair", vec![3, 1]).unwrap();
        sets.save(&path).unwrap();

        let loaded = NamedIdSets::load(&path).unwrap();
        assert_eq!(loaded.get("pair").unwrap().as_slice(), &[1, 3]);
        assert_eq!(loaded.all().len(), 4);
        assert_eq!(loaded.all_name(), "AllCells");
    }

    #[test]
    fn test_load_rejects_snapshot_without_all_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(OBSERVATION_SETS_FILE_NAME);
        let mut sets = registry(2);
        sets.sets.clear();
        sets.save(&path).unwrap();

        let err = NamedIdSets::load(&path).unwrap_err();
        assert!(matches!(err, ExprError::Corruption(_)));
    }
}
