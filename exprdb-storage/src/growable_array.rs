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

//! Append-only flat typed array with an optional hard capacity.
//!
//! Appends past the capacity limit fail with `CapacityExceeded` and leave the
//! array untouched. Elements are never removed; `get_mut` exists for
//! per-element counters maintained during ingest.

use serde::{Deserialize, Serialize};

use exprdb_core::{ExprError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrowableArray<T> {
    data: Vec<T>,
    /// Maximum number of elements
    limit: usize,
    /// Container name used in error messages
    name: String,
}

impl<T> GrowableArray<T> {
    /// Unbounded array
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            data: Vec::new(),
            limit: usize::MAX,
            name: name.into(),
        }
    }

    /// Array holding at most `limit` elements
    pub fn with_capacity_limit(name: impl Into<String>, limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
            name: name.into(),
        }
    }

    /// Append an element, returning its index
    pub fn push(&mut self, value: T) -> Result<usize> {
        if self.data.len() >= self.limit {
            return Err(ExprError::capacity_exceeded(
                self.name.clone(),
                self.limit as u64,
            ));
        }
        self.data.push(value);
        Ok(self.data.len() - 1)
    }

    /// Fail early if `additional` more elements would not fit
    pub fn reserve_checked(&mut self, additional: usize) -> Result<()> {
        if self.data.len().saturating_add(additional) > self.limit {
            return Err(ExprError::capacity_exceeded(
                self.name.clone(),
                self.limit as u64,
            ));
        }
        self.data.reserve(additional);
        Ok(())
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.data.get(index)
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.data.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity_limit(&self) -> usize {
        self.limit
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.data.iter()
    }

    pub fn last(&self) -> Option<&T> {
        self.data.last()
    }
}

impl<T> std::ops::Index<usize> for GrowableArray<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.data[index]
    }
}

impl<'a, T> IntoIterator for &'a GrowableArray<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.iter()
    }
}
