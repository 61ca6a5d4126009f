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

//! Configuration structures.
//!
//! `StoreConfig` is fixed when a store is created and is persisted next to the
//! store snapshot as `config.json`. The search parameter structs are validated
//! before any expensive pass starts.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{ExprError, Result};

/// File name of the persisted store configuration
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Largest number of LSH hyperplanes accepted in one signature
pub const MAX_LSH_BIT_COUNT: usize = 1 << 16;

/// Smallest bucketed-search load factor; bounds the bucket table at 64
/// buckets per observation
pub const MIN_LSH_LOAD_FACTOR: f64 = 1.0 / 64.0;

/// Creation parameters of an expression store.
///
/// The capacities are hard limits on the number of distinct strings of each
/// kind. Inserting past a capacity fails with `CapacityExceeded`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum number of features (genes)
    pub feature_capacity: u64,
    /// Maximum number of observations (cells)
    pub observation_capacity: u64,
    /// Maximum number of distinct meta data names
    pub meta_data_name_capacity: u64,
    /// Maximum number of distinct meta data values
    pub meta_data_value_capacity: u64,
    /// Number of largest counts kept per observation for approximate similarity
    pub truncation_budget: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            feature_capacity: 1 << 18,
            observation_capacity: 1 << 22,
            meta_data_name_capacity: 1 << 12,
            meta_data_value_capacity: 1 << 22,
            truncation_budget: 100,
        }
    }
}

impl StoreConfig {
    /// Small capacities, for tests and toy data sets
    pub fn small() -> Self {
        Self {
            feature_capacity: 1 << 10,
            observation_capacity: 1 << 12,
            meta_data_name_capacity: 1 << 6,
            meta_data_value_capacity: 1 << 12,
            truncation_budget: 100,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let capacities = [
            ("feature_capacity", self.feature_capacity),
            ("observation_capacity", self.observation_capacity),
            ("meta_data_name_capacity", self.meta_data_name_capacity),
            ("meta_data_value_capacity", self.meta_data_value_capacity),
        ];
        for (name, capacity) in capacities {
            if capacity == 0 {
                return Err(ExprError::invalid(format!("{} must be positive", name)));
            }
            // Ids are u32 with u32::MAX reserved.
            if capacity >= u32::MAX as u64 {
                return Err(ExprError::invalid(format!(
                    "{} = {} does not fit a 32-bit id",
                    name, capacity
                )));
            }
        }
        Ok(())
    }

    /// Write as `config.json` into `dir`
    pub fn save(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(dir.join(CONFIG_FILE_NAME), json)?;
        Ok(())
    }

    /// Read `config.json` from `dir`
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        let json = fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExprError::not_found(format!("store configuration {:?}", path))
            } else {
                ExprError::Io(e)
            }
        })?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Worker pool and progress reporting settings for the search passes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Number of worker threads (0 = one per core)
    pub threads: usize,
    /// Minimum interval between two progress log lines
    pub progress_interval_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            progress_interval_ms: 5_000,
        }
    }
}

/// Parameters common to every similar-pairs computation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarPairsParams {
    /// Maximum number of neighbors kept per observation
    pub k: usize,
    /// Minimum similarity for a neighbor to be kept
    pub threshold: f64,
}

impl SimilarPairsParams {
    pub fn new(k: usize, threshold: f64) -> Self {
        Self { k, threshold }
    }

    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(ExprError::invalid("k must be at least 1"));
        }
        validate_threshold(self.threshold)
    }
}

/// Check that a similarity threshold lies in [-1, 1]
pub fn validate_threshold(threshold: f64) -> Result<()> {
    if !(-1.0..=1.0).contains(&threshold) {
        return Err(ExprError::invalid(format!(
            "similarity threshold {} is outside [-1, 1]",
            threshold
        )));
    }
    Ok(())
}

/// Shape and seed of a set of LSH hyperplanes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LshParams {
    pub band_count: usize,
    pub row_count: usize,
    pub seed: u64,
}

impl LshParams {
    pub fn new(band_count: usize, row_count: usize, seed: u64) -> Self {
        Self {
            band_count,
            row_count,
            seed,
        }
    }

    /// A single band holding `bit_count` hyperplanes, for all-pairs LSH
    pub fn flat(bit_count: usize, seed: u64) -> Self {
        Self::new(1, bit_count, seed)
    }

    pub fn bit_count(&self) -> usize {
        self.band_count.saturating_mul(self.row_count)
    }

    pub fn validate(&self) -> Result<()> {
        if self.band_count == 0 || self.row_count == 0 {
            return Err(ExprError::invalid(format!(
                "LSH band count ({}) and row count ({}) must be positive",
                self.band_count, self.row_count
            )));
        }
        if self.bit_count() > MAX_LSH_BIT_COUNT {
            return Err(ExprError::invalid(format!(
                "LSH signature of {} bits exceeds the maximum of {}",
                self.bit_count(),
                MAX_LSH_BIT_COUNT
            )));
        }
        Ok(())
    }

    /// Additional constraint of the bucketed search: each band's rows must
    /// fit in one machine word.
    pub fn validate_banded(&self) -> Result<()> {
        self.validate()?;
        if !self.row_count.is_power_of_two() || self.row_count > 64 {
            return Err(ExprError::invalid(format!(
                "LSH row count {} must be a power of two not greater than 64",
                self.row_count
            )));
        }
        Ok(())
    }
}

/// Check a bucketed-search load factor (observations per bucket)
pub fn validate_load_factor(load_factor: f64) -> Result<()> {
    if !load_factor.is_finite() || load_factor < MIN_LSH_LOAD_FACTOR {
        return Err(ExprError::invalid(format!(
            "load factor {} must be finite and at least {}",
            load_factor, MIN_LSH_LOAD_FACTOR
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            truncation_budget: 42,
            ..StoreConfig::small()
        };
        config.save(dir.path()).unwrap();
        let loaded = StoreConfig::load(dir.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_store_config_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = StoreConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, ExprError::NotFound(_)));
    }

    #[test]
    fn test_store_config_partial_json_uses_defaults() {
        let config: StoreConfig = serde_json::from_str(r#"{"truncation_budget": 7}"#).unwrap();
        assert_eq!(config.truncation_budget, 7);
        assert_eq!(config.feature_capacity, StoreConfig::default().feature_capacity);
    }

    #[test]
    fn test_store_config_validation() {
        assert!(StoreConfig::default().validate().is_ok());
        let zero = StoreConfig {
            feature_capacity: 0,
            ..StoreConfig::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_similar_pairs_params() {
        assert!(SimilarPairsParams::new(5, 0.2).validate().is_ok());
        assert!(SimilarPairsParams::new(5, -1.0).validate().is_ok());
        assert!(SimilarPairsParams::new(5, 1.0).validate().is_ok());
        assert!(SimilarPairsParams::new(0, 0.2).validate().is_err());
        assert!(SimilarPairsParams::new(5, 1.5).validate().is_err());
        assert!(SimilarPairsParams::new(5, f64::NAN).validate().is_err());
    }

    #[test]
    fn test_lsh_params() {
        assert!(LshParams::new(16, 32, 1).validate_banded().is_ok());
        assert!(LshParams::new(4, 64, 1).validate_banded().is_ok());
        assert!(LshParams::new(4, 48, 1).validate().is_ok());
        assert!(LshParams::new(4, 48, 1).validate_banded().is_err());
        assert!(LshParams::new(4, 128, 1).validate_banded().is_err());
        assert!(LshParams::new(0, 8, 1).validate().is_err());
        assert!(LshParams::flat(1024, 3).validate().is_ok());
        assert_eq!(LshParams::flat(1024, 3).bit_count(), 1024);
    }

    #[test]
    fn test_load_factor() {
        assert!(validate_load_factor(1.0).is_ok());
        assert!(validate_load_factor(MIN_LSH_LOAD_FACTOR).is_ok());
        assert!(validate_load_factor(1e6).is_ok());
        for bad in [0.0, -1.0, 1e-6, 1e-300, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                validate_load_factor(bad),
                Err(ExprError::InvalidArgument(_))
            ));
        }
    }
}
