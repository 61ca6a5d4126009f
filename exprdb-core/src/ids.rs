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

//! Dense integer identifiers.
//!
//! Observations, features and interned strings are all addressed by dense,
//! zero-based `u32` ids. The maximum value of each id type is reserved as the
//! "not found / invalid" sentinel.

/// Dense id of an observation (a cell).
pub type ObservationId = u32;

/// Dense id of a feature (a gene).
pub type FeatureId = u32;

/// Handle into a string interning table.
pub type StringId = u32;

pub const INVALID_OBSERVATION_ID: ObservationId = ObservationId::MAX;
pub const INVALID_FEATURE_ID: FeatureId = FeatureId::MAX;
pub const INVALID_STRING_ID: StringId = StringId::MAX;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_are_max() {
        assert_eq!(INVALID_OBSERVATION_ID, u32::MAX);
        assert_eq!(INVALID_FEATURE_ID, u32::MAX);
        assert_eq!(INVALID_STRING_ID, u32::MAX);
    }
}
