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

//! Offset-indexed variable-length table (arena storage)
//!
//! All sub-sequences live in one contiguous backing `Vec<T>`. Bucket `i` is
//! described by an [`Extent`] in the index array; callers only ever hold
//! extents, never pointers, so bounds are checked on every access.
//!
//! ## Construction modes
//!
//! ```text
//! Two-pass (sizes known up front, buckets filled in any order):
//!
//!   begin_counting(n) ─► increment_count(i)* ─► begin_filling() ─► store(i, v)* ─► end_filling()
//!
//! Open bucket (append as discovered, one bucket at a time):
//!
//!   open_bucket() ─► push(v)* ─► open_bucket() ─► push(v)* ...
//! ```
//!
//! The two-pass mode allocates the backing array exactly once, which is what
//! LSH bucket tables need. The open-bucket mode is used for per-observation
//! vectors and meta data written during ingest.

use serde::{Deserialize, Serialize};

use exprdb_core::{ExprError, Result};

/// Typed handle of one bucket: the half-open range `[start, end)` of the
/// backing array.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent {
    start: u64,
    end: u64,
}

impl Extent {
    #[inline]
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    #[inline]
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[inline]
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start as usize..self.end as usize
    }
}

/// State of an in-progress two-pass build
#[derive(Debug, Clone, Default)]
enum BuildState {
    #[default]
    Open,
    Counting(Vec<u64>),
    Filling(Vec<u64>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableLengthTable<T> {
    index: Vec<Extent>,
    data: Vec<T>,
    /// Maximum number of elements in the backing array
    limit: usize,
    name: String,
    #[serde(skip)]
    state: BuildState,
}

impl<T> VariableLengthTable<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity_limit(name, usize::MAX)
    }

    pub fn with_capacity_limit(name: impl Into<String>, limit: usize) -> Self {
        Self {
            index: Vec::new(),
            data: Vec::new(),
            limit,
            name: name.into(),
            state: BuildState::Open,
        }
    }

    /// Number of buckets
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Total number of elements over all buckets
    pub fn total_len(&self) -> usize {
        self.data.len()
    }

    /// Contents of bucket `i`
    #[inline]
    pub fn get(&self, i: usize) -> Option<&[T]> {
        let extent = self.index.get(i)?;
        self.data.get(extent.range())
    }

    /// Handle of bucket `i`
    #[inline]
    pub fn extent(&self, i: usize) -> Option<Extent> {
        self.index.get(i).copied()
    }

    /// Contents addressed by a handle obtained from this table
    #[inline]
    pub fn resolve(&self, extent: Extent) -> Option<&[T]> {
        self.data.get(extent.range())
    }

    pub fn iter(&self) -> impl Iterator<Item = &[T]> + '_ {
        self.index.iter().map(move |e| &self.data[e.range()])
    }

    fn ensure_open(&self, operation: &str) -> Result<()> {
        match self.state {
            BuildState::Open => Ok(()),
            _ => Err(ExprError::invalid(format!(
                "{}: {} is not allowed while a two-pass build is in progress",
                self.name, operation
            ))),
        }
    }

    fn check_room(&self, additional: usize) -> Result<()> {
        if self.data.len().saturating_add(additional) > self.limit {
            return Err(ExprError::capacity_exceeded(
                self.name.clone(),
                self.limit as u64,
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Open-bucket mode
    // ------------------------------------------------------------------

    /// Start a new, empty bucket at the end of the table
    pub fn open_bucket(&mut self) -> Result<usize> {
        self.ensure_open("open_bucket")?;
        let at = self.data.len() as u64;
        self.index.push(Extent { start: at, end: at });
        Ok(self.index.len() - 1)
    }

    /// Append to the most recently opened bucket
    pub fn push(&mut self, value: T) -> Result<()> {
        self.ensure_open("push")?;
        self.check_room(1)?;
        let last = self
            .index
            .last_mut()
            .ok_or_else(|| ExprError::invalid("push called before open_bucket"))?;
        self.data.push(value);
        last.end += 1;
        Ok(())
    }

    /// Append a whole bucket
    pub fn append_bucket(&mut self, values: &[T]) -> Result<Extent>
    where
        T: Clone,
    {
        self.ensure_open("append_bucket")?;
        self.check_room(values.len())?;
        let start = self.data.len() as u64;
        self.data.extend_from_slice(values);
        let extent = Extent {
            start,
            end: self.data.len() as u64,
        };
        self.index.push(extent);
        Ok(extent)
    }

    // ------------------------------------------------------------------
    // Two-pass mode
    // ------------------------------------------------------------------

    /// Pass 1: declare `bucket_count` buckets, all with size zero.
    /// Only allowed on an empty table.
    pub fn begin_counting(&mut self, bucket_count: usize) -> Result<()> {
        self.ensure_open("begin_counting")?;
        if !self.index.is_empty() {
            return Err(ExprError::invalid(format!(
                "{}: two-pass build requires an empty table",
                self.name
            )));
        }
        self.state = BuildState::Counting(vec![0; bucket_count]);
        Ok(())
    }

    #[inline]
    pub fn increment_count(&mut self, i: usize) -> Result<()> {
        self.add_count(i, 1)
    }

    pub fn add_count(&mut self, i: usize, count: u64) -> Result<()> {
        match &mut self.state {
            BuildState::Counting(counts) => {
                let slot = counts.get_mut(i).ok_or_else(|| {
                    ExprError::invalid(format!("{}: bucket {} out of range", self.name, i))
                })?;
                *slot += count;
                Ok(())
            }
            _ => Err(ExprError::invalid(format!(
                "{}: add_count outside the counting pass",
                self.name
            ))),
        }
    }

    /// Pass 2: fill bucket `i`. Buckets may be filled in any order.
    pub fn store(&mut self, i: usize, value: T) -> Result<()> {
        let BuildState::Filling(cursors) = &mut self.state else {
            return Err(ExprError::invalid(format!(
                "{}: store outside the filling pass",
                self.name
            )));
        };
        let (cursor, extent) = match (cursors.get_mut(i), self.index.get(i)) {
            (Some(cursor), Some(extent)) => (cursor, extent),
            _ => {
                return Err(ExprError::invalid(format!(
                    "{}: bucket {} out of range",
                    self.name, i
                )))
            }
        };
        if *cursor >= extent.end {
            return Err(ExprError::invalid(format!(
                "{}: bucket {} received more values than counted",
                self.name, i
            )));
        }
        self.data[*cursor as usize] = value;
        *cursor += 1;
        Ok(())
    }

    /// Finish the build. Every bucket must have been filled exactly.
    pub fn end_filling(&mut self) -> Result<()> {
        let BuildState::Filling(cursors) = &self.state else {
            return Err(ExprError::invalid(format!(
                "{}: end_filling outside the filling pass",
                self.name
            )));
        };
        if let Some(i) = cursors
            .iter()
            .zip(&self.index)
            .position(|(cursor, extent)| *cursor != extent.end)
        {
            return Err(ExprError::invalid(format!(
                "{}: bucket {} was not completely filled",
                self.name, i
            )));
        }
        self.state = BuildState::Open;
        Ok(())
    }
}

impl<T: Default> VariableLengthTable<T> {
    /// Compute offsets from the counts and allocate the backing array once
    pub fn begin_filling(&mut self) -> Result<()> {
        let BuildState::Counting(counts) = &self.state else {
            return Err(ExprError::invalid(format!(
                "{}: begin_filling without a counting pass",
                self.name
            )));
        };
        let total: u64 = counts.iter().sum();
        self.check_room(total as usize)?;

        let mut index = Vec::with_capacity(counts.len());
        let mut cursors = Vec::with_capacity(counts.len());
        let mut offset = 0u64;
        for &count in counts {
            index.push(Extent {
                start: offset,
                end: offset + count,
            });
            cursors.push(offset);
            offset += count;
        }

        self.index = index;
        self.data.resize_with(total as usize, T::default);
        self.state = BuildState::Filling(cursors);
        Ok(())
    }
}
