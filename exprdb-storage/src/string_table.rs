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

//! Fixed-capacity string interning table
//!
//! Maps strings to dense [`StringId`]s and back. Used for feature names,
//! observation names and meta data names/values.
//!
//! ## Layout
//!
//! ```text
//! slots:   [ id | EMPTY | id | id | EMPTY | ... ]   open addressing, linear probing
//!                 │
//! extents: [ Extent(0..5) | Extent(5..9) | ... ]    indexed by StringId
//!                 │
//! buffer:  "GAPDHACTB..."                           all strings, contiguous
//! ```
//!
//! The slot array holds at least twice the declared capacity (rounded up to a
//! power of two), so at most half of the slots are ever occupied and every
//! probe sequence reaches an empty slot. Inserting a new string into a full
//! table fails with `CapacityExceeded` before any probing starts.
//!
//! ## Example
//!
//! ```rust
//! use exprdb_storage::StringInternTable;
//!
//! let mut genes = StringInternTable::new("gene names", 16).unwrap();
//! let (id, inserted) = genes.insert("GAPDH").unwrap();
//! assert!(inserted);
//! assert_eq!(genes.insert("GAPDH").unwrap(), (id, false));
//! assert_eq!(genes.resolve(id), Some("GAPDH"));
//! ```

use serde::{Deserialize, Serialize};
use twox_hash::xxh3;

use exprdb_core::{ExprError, Result, StringId, INVALID_STRING_ID};

use crate::growable_array::GrowableArray;
use crate::variable_table::Extent;

/// Probe length statistics of the open addressing index
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProbeStatistics {
    pub string_count: usize,
    pub capacity: usize,
    pub slot_count: usize,
    pub average_probe_length: f64,
    pub max_probe_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StringInternTable {
    name: String,
    /// Declared maximum number of distinct strings
    capacity: usize,
    /// Open addressing slots holding ids, `INVALID_STRING_ID` when empty
    slots: Vec<StringId>,
    /// Location of each string in `buffer`, indexed by id
    extents: GrowableArray<Extent>,
    buffer: String,
}

impl StringInternTable {
    pub fn new(name: impl Into<String>, capacity: u64) -> Result<Self> {
        let name = name.into();
        if capacity == 0 || capacity >= INVALID_STRING_ID as u64 {
            return Err(ExprError::invalid(format!(
                "{}: invalid string table capacity {}",
                name, capacity
            )));
        }
        let capacity = capacity as usize;
        let slot_count = (2 * capacity).next_power_of_two();
        Ok(Self {
            extents: GrowableArray::with_capacity_limit(name.clone(), capacity),
            name,
            capacity,
            slots: vec![INVALID_STRING_ID; slot_count],
            buffer: String::new(),
        })
    }

    #[inline]
    fn home_slot(&self, s: &str) -> usize {
        (xxh3::hash64(s.as_bytes()) as usize) & (self.slots.len() - 1)
    }

    #[inline]
    fn extent_str(&self, extent: &Extent) -> &str {
        &self.buffer[extent.range()]
    }

    /// Slot holding `s`, or the empty slot where it would go
    fn find_slot(&self, s: &str) -> (usize, Option<StringId>) {
        let mask = self.slots.len() - 1;
        let mut slot = self.home_slot(s);
        loop {
            let id = self.slots[slot];
            if id == INVALID_STRING_ID {
                return (slot, None);
            }
            if self.extent_str(&self.extents[id as usize]) == s {
                return (slot, Some(id));
            }
            slot = (slot + 1) & mask;
        }
    }

    /// Insert a string. Returns its id and whether it was newly inserted.
    /// Inserting an existing string returns the existing id.
    pub fn insert(&mut self, s: &str) -> Result<(StringId, bool)> {
        let (slot, existing) = self.find_slot(s);
        if let Some(id) = existing {
            return Ok((id, false));
        }
        if self.extents.len() >= self.capacity {
            return Err(ExprError::capacity_exceeded(
                self.name.clone(),
                self.capacity as u64,
            ));
        }

        let start = self.buffer.len();
        self.buffer.push_str(s);
        let id = self
            .extents
            .push(Extent::new(start as u64, self.buffer.len() as u64))? as StringId;
        self.slots[slot] = id;
        Ok((id, true))
    }

    /// Id of an already interned string
    pub fn id_of(&self, s: &str) -> Option<StringId> {
        self.find_slot(s).1
    }

    /// String of an id, O(1)
    pub fn resolve(&self, id: StringId) -> Option<&str> {
        self.extents
            .get(id as usize)
            .map(|extent| self.extent_str(extent))
    }

    pub fn len(&self) -> usize {
        self.extents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// All strings in id order
    pub fn iter(&self) -> impl Iterator<Item = (StringId, &str)> + '_ {
        self.extents
            .iter()
            .enumerate()
            .map(move |(id, extent)| (id as StringId, self.extent_str(extent)))
    }

    pub fn probe_statistics(&self) -> ProbeStatistics {
        let mask = self.slots.len() - 1;
        let mut total = 0usize;
        let mut max = 0usize;
        for (slot, &id) in self.slots.iter().enumerate() {
            if id == INVALID_STRING_ID {
                continue;
            }
            let home = self.home_slot(self.extent_str(&self.extents[id as usize]));
            let probe_length = (slot.wrapping_sub(home) & mask) + 1;
            total += probe_length;
            max = max.max(probe_length);
        }
        ProbeStatistics {
            string_count: self.len(),
            capacity: self.capacity,
            slot_count: self.slots.len(),
            average_probe_length: if self.is_empty() {
                0.0
            } else {
                total as f64 / self.len() as f64
            },
            max_probe_length: max,
        }
    }
}
