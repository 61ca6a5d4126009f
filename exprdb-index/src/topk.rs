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

//! Bounded best-of-k neighbor selection
//!
//! Each observation being searched owns one [`BoundedTopK`]. The heap keeps
//! its *worst* retained neighbor on top so a new candidate is compared against
//! it in O(1) and replaces it in O(log k).
//!
//! Ranking is similarity descending, then neighbor id ascending, so results
//! do not depend on the order in which candidates arrive.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use exprdb_core::ObservationId;

/// One entry of a neighbor list
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: ObservationId,
    pub similarity: f32,
}

impl Neighbor {
    pub fn new(id: ObservationId, similarity: f32) -> Self {
        Self { id, similarity }
    }

    /// Ordering in which neighbor lists are reported: `Less` means `self`
    /// ranks ahead of `other`.
    #[inline]
    pub fn rank_cmp(&self, other: &Neighbor) -> Ordering {
        other
            .similarity
            .total_cmp(&self.similarity)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Heap entry: greater means worse, so the max-heap top is the worst neighbor
#[derive(Debug, Clone, Copy)]
struct Ranked(Neighbor);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.rank_cmp(&other.0)
    }
}

/// The k best neighbors seen so far
#[derive(Debug, Clone)]
pub struct BoundedTopK {
    k: usize,
    heap: BinaryHeap<Ranked>,
}

impl BoundedTopK {
    /// Empty structure; the heap grows as candidates are kept
    pub fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::new(),
        }
    }

    /// Preallocated for at most `candidate_count` offers, so a large `k`
    /// costs no more than the candidates actually seen
    pub fn with_candidate_count(k: usize, candidate_count: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k.min(candidate_count)),
        }
    }

    /// Offer a candidate. It is kept if there is room, or if it ranks
    /// strictly ahead of the current worst entry, which is then evicted.
    /// Returns whether the candidate was kept.
    pub fn push(&mut self, candidate: Neighbor) -> bool {
        if self.k == 0 {
            return false;
        }
        if self.heap.len() < self.k {
            self.heap.push(Ranked(candidate));
            return true;
        }
        match self.heap.peek() {
            Some(worst) if candidate.rank_cmp(&worst.0) == Ordering::Less => {
                self.heap.pop();
                self.heap.push(Ranked(candidate));
                true
            }
            _ => false,
        }
    }

    /// Entry a candidate has to beat once the structure is full
    pub fn worst(&self) -> Option<&Neighbor> {
        self.heap.peek().map(|r| &r.0)
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.k
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Best first
    pub fn into_sorted_vec(self) -> Vec<Neighbor> {
        self.heap.into_sorted_vec().into_iter().map(|r| r.0).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_k_best() {
        let mut top = BoundedTopK::new(3);
        for (id, similarity) in [(1, 0.1), (2, 0.9), (3, 0.5), (4, 0.7), (5, 0.2)] {
            top.push(Neighbor::new(id, similarity));
        }
        let ids: Vec<_> = top.into_sorted_vec().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![2, 4, 3]);
    }

    #[test]
    fn test_ties_prefer_lower_id() {
        let mut top = BoundedTopK::new(2);
        top.push(Neighbor::new(9, 0.5));
        top.push(Neighbor::new(7, 0.5));
        top.push(Neighbor::new(8, 0.5));
        // Arrival order does not matter
        let ids: Vec<_> = top.into_sorted_vec().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![7, 8]);
    }

    #[test]
    fn test_equal_to_worst_is_not_admitted() {
        let mut top = BoundedTopK::new(1);
        assert!(top.push(Neighbor::new(1, 0.5)));
        assert!(!top.push(Neighbor::new(1, 0.5)));
        assert!(!top.push(Neighbor::new(2, 0.5)));
        assert!(top.push(Neighbor::new(0, 0.5)));
        assert_eq!(top.worst(), Some(&Neighbor::new(0, 0.5)));
    }

    #[test]
    fn test_zero_k() {
        let mut top = BoundedTopK::new(0);
        assert!(!top.push(Neighbor::new(1, 1.0)));
        assert!(top.is_empty());
        assert!(top.is_full());
    }

    #[test]
    fn test_unbounded_k_keeps_everything() {
        let mut top = BoundedTopK::with_candidate_count(usize::MAX, 3);
        for id in 0..3 {
            assert!(top.push(Neighbor::new(id, 0.5)));
        }
        assert!(!top.is_full());
        assert_eq!(top.into_sorted_vec().len(), 3);

        let mut lazy = BoundedTopK::new(usize::MAX);
        assert!(lazy.push(Neighbor::new(1, 0.1)));
        assert_eq!(lazy.len(), 1);
    }

    #[test]
    fn test_negative_similarities() {
        let mut top = BoundedTopK::new(2);
        top.push(Neighbor::new(1, -0.9));
        top.push(Neighbor::new(2, -0.1));
        top.push(Neighbor::new(3, -0.5));
        let sims: Vec<_> = top.into_sorted_vec().iter().map(|n| n.similarity).collect();
        assert_eq!(sims, vec![-0.1, -0.5]);
    }
}
