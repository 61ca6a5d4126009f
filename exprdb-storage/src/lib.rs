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

//! ExprDB Storage
//!
//! Append-oriented containers and the sparse expression store built on them.
//! Nothing in here hands out raw offsets: variable-length data is addressed
//! through typed [`Extent`] handles into one arena per table.

pub mod expression_store; // Per-observation sparse vectors, records and meta data
pub mod growable_array;
pub mod id_set; // Ordered id sets and named set registries
pub mod snapshot; // Versioned bincode envelopes
pub mod string_table; // Fixed-capacity string interning
pub mod variable_table; // Offset-indexed arena table

pub use expression_store::{
    ExpressionStore, FeatureCount, MetaDataNameUsage, Normalization, ObservationRecord,
    ObservationView, EXPRESSION_STORE_FILE_NAME, OBSERVATION_NAME_META_DATA,
};
pub use growable_array::GrowableArray;
pub use id_set::{
    FeatureSet, IdSet, NamedIdSets, ObservationSet, ALL_FEATURES_SET_NAME,
    ALL_OBSERVATIONS_SET_NAME, FEATURE_SETS_FILE_NAME, OBSERVATION_SETS_FILE_NAME,
};
pub use snapshot::{read_snapshot, write_snapshot};
pub use string_table::{ProbeStatistics, StringInternTable};
pub use variable_table::{Extent, VariableLengthTable};
