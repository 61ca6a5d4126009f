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

//! Property tests for the expression store and string table
//!
//! - `get_count` returns exactly what was ingested, and 0 elsewhere
//! - truncated vectors hold the largest magnitudes and the discard aggregates
//!   describe exactly what was left out
//! - the string table never fails below its declared capacity
//! - a saved store reloads identically

use proptest::prelude::*;
use std::collections::BTreeMap;
use tempfile::tempdir;

use exprdb_core::StoreConfig;
use exprdb_storage::{ExpressionStore, StringInternTable};

const FEATURES: u32 = 40;

fn store() -> ExpressionStore {
    let mut store = ExpressionStore::new(StoreConfig::small()).unwrap();
    for f in 0..FEATURES {
        store.add_feature(&format!("gene_{}", f)).unwrap();
    }
    store
}

/// One observation: distinct features with non-zero integer-valued counts
fn observation() -> impl Strategy<Value = BTreeMap<u32, f32>> {
    let count = (-50i32..50).prop_filter("non-zero", |c| *c != 0);
    prop::collection::btree_map(0..FEATURES, count, 0..30)
        .prop_map(|m| m.into_iter().map(|(f, c)| (f, c as f32)).collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_get_count_is_exact(
        observations in prop::collection::vec(observation(), 1..8),
        budget in 0usize..40,
    ) {
        let mut store = store();
        for (i, counts) in observations.iter().enumerate() {
            // Reverse order so the store has to sort.
            let input: Vec<(u32, f32)> = counts.iter().rev().map(|(&f, &c)| (f, c)).collect();
            let id = store.add_observation(&format!("cell_{}", i), &input, budget).unwrap();
            prop_assert_eq!(id as usize, i);
        }

        for (i, counts) in observations.iter().enumerate() {
            for f in 0..FEATURES {
                let expected = counts.get(&f).copied().unwrap_or(0.0);
                prop_assert_eq!(store.get_count(i as u32, f).unwrap(), expected);
            }
        }
    }

    #[test]
    fn test_truncation_aggregates(counts in observation(), budget in 0usize..40) {
        let mut store = store();
        let input: Vec<(u32, f32)> = counts.iter().map(|(&f, &c)| (f, c)).collect();
        let id = store.add_observation("cell", &input, budget).unwrap();
        let view = store.view(id).unwrap();

        prop_assert_eq!(view.truncated.len(), counts.len().min(budget));
        prop_assert_eq!(
            view.record.discarded_count as usize,
            counts.len() - view.truncated.len()
        );
        prop_assert!(view.truncated.windows(2).all(|w| w[0].feature < w[1].feature));

        let kept_min = view
            .truncated
            .iter()
            .map(|fc| fc.count.abs())
            .fold(f32::INFINITY, f32::min);
        let discarded: Vec<f32> = view
            .counts
            .iter()
            .filter(|fc| !view.truncated.iter().any(|t| t.feature == fc.feature))
            .map(|fc| fc.count.abs())
            .collect();
        let discarded_max = discarded.iter().copied().fold(0.0f32, f32::max);
        prop_assert_eq!(view.record.discarded_max, discarded_max);
        if !discarded.is_empty() {
            prop_assert!(kept_min >= discarded_max);
        }
    }

    #[test]
    fn test_string_table_fills_to_capacity(capacity in 1u64..200) {
        let mut table = StringInternTable::new("names", capacity).unwrap();
        for i in 0..capacity {
            let (id, inserted) = table.insert(&format!("s{}", i)).unwrap();
            prop_assert!(inserted);
            prop_assert_eq!(id as u64, i);
        }
        prop_assert!(table.insert("overflow").is_err());
        for i in 0..capacity {
            let name = format!("s{}", i);
            prop_assert_eq!(table.id_of(&name), Some(i as u32));
        }
    }
}

#[test]
fn test_store_reload_is_identical() {
    let dir = tempdir().unwrap();
    let mut original = store();
    original
        .add_observation_with_meta_data(
            "cell_a",
            &[("tissue".to_string(), "liver".to_string())],
            &[(3, 1.0), (1, 2.0), (7, -4.0)],
            2,
        )
        .unwrap();
    original.add_observation("cell_b", &[(0, 5.0)], 2).unwrap();
    original.save(dir.path()).unwrap();

    let loaded = ExpressionStore::load(dir.path()).unwrap();
    assert_eq!(loaded.observation_count(), 2);
    assert_eq!(loaded.feature_count(), FEATURES as usize);
    for id in 0..2 {
        assert_eq!(loaded.counts(id).unwrap(), original.counts(id).unwrap());
        assert_eq!(loaded.truncated(id).unwrap(), original.truncated(id).unwrap());
        assert_eq!(loaded.record(id).unwrap(), original.record(id).unwrap());
    }
    assert_eq!(loaded.meta_data(0, "tissue").unwrap(), Some("liver"));
    assert_eq!(loaded.observation_id("cell_b"), Some(1));

    // Appending after reload continues the id sequence.
    let mut loaded = loaded;
    assert_eq!(loaded.add_observation("cell_c", &[(2, 1.0)], 2).unwrap(), 2);
}
