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

//! Error types for ExprDB

use std::io;
use thiserror::Error;

use crate::ids::FeatureId;

#[derive(Error, Debug)]
pub enum ExprError {
    /// A fixed-capacity container is full. Always raised before the
    /// container is modified.
    #[error("Capacity exceeded for {what}: capacity is {capacity}")]
    CapacityExceeded { what: String, capacity: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    #[error("Duplicate feature {feature} in input for observation {observation}")]
    DuplicateFeature {
        observation: String,
        feature: FeatureId,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExprError {
    pub fn capacity_exceeded(what: impl Into<String>, capacity: u64) -> Self {
        ExprError::CapacityExceeded {
            what: what.into(),
            capacity,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        ExprError::NotFound(what.into())
    }

    pub fn invalid(what: impl Into<String>) -> Self {
        ExprError::InvalidArgument(what.into())
    }
}

impl From<bincode::Error> for ExprError {
    fn from(e: bincode::Error) -> Self {
        ExprError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for ExprError {
    fn from(e: serde_json::Error) -> Self {
        ExprError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ExprError>;
