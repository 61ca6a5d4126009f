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

//! ExprDB Core
//!
//! Fundamental types shared by every ExprDB crate.
//!
//! ExprDB stores large sparse count matrices (observations × features, typically
//! cells × genes) and finds, for every observation, the observations most similar
//! to it. The crates are layered leaves-first:
//!
//! - **exprdb-core**: ids, the error taxonomy and configuration (this crate)
//! - **exprdb-storage**: arena containers, string tables and the sparse expression store
//! - **exprdb-index**: similarity engine, LSH index, neighbor lists and graph assembly
//! - **exprdb-client**: the `ExpressionMatrix` context owning all named objects
//!
//! # Example
//!
//! ```rust
//! use exprdb_core::{StoreConfig, SimilarPairsParams};
//!
//! let config = StoreConfig::default();
//! assert!(config.feature_capacity >= 1024);
//!
//! let params = SimilarPairsParams::new(10, 0.5);
//! assert!(params.validate().is_ok());
//! ```

pub mod config;
pub mod error;
pub mod ids;

pub use config::{LshParams, SearchConfig, SimilarPairsParams, StoreConfig};
pub use error::{ExprError, Result};
pub use ids::{
    FeatureId, ObservationId, StringId, INVALID_FEATURE_ID, INVALID_OBSERVATION_ID,
    INVALID_STRING_ID,
};

/// Library version
pub const EXPRDB_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version tag written into every binary snapshot
pub const SNAPSHOT_VERSION: u32 = 1;
