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

//! ExprDB Index
//!
//! Similarity search over an [`ExpressionStore`](exprdb_storage::ExpressionStore):
//!
//! | Search                                         | Cost            | Similarity          |
//! |------------------------------------------------|-----------------|---------------------|
//! | `SimilarityEngine::find_similar_pairs` exact     | O(n²·nnz)       | exact correlation   |
//! | `SimilarityEngine::find_similar_pairs` truncated | O(n²·budget)    | bounded error       |
//! | `LshIndex::find_similar_pairs_all`               | O(n²·bits/64)   | signature estimate  |
//! | `LshIndex::find_similar_pairs_subquadratic`      | O(n·bucket·bands) | signature estimate |
//!
//! Every search yields [`SimilarPairs`], which [`SimilarityGraph`] turns into
//! a degree-capped undirected graph.

pub mod control; // Cancellation, progress and the worker pool
pub mod diagnostics;
pub mod graph;
pub mod lsh;
pub mod similar_pairs;
pub mod similarity;
pub mod topk;

pub use control::{build_thread_pool, SearchControl};
pub use diagnostics::{analyze_all_pairs, compare_lsh_similarity, LshComparison, PairAnalysis};
pub use graph::{Edge, GraphSummary, SimilarityGraph};
pub use lsh::{estimate_angle, hamming, BucketStatistics, LshIndex, LshVectors, SignatureTable};
pub use similar_pairs::{similar_pairs_file_name, similar_pairs_name, SimilarPairs};
pub use similarity::{sparse_dot, ApproximateSimilarity, SimilarityEngine, SimilarityMode};
pub use topk::{BoundedTopK, Neighbor};
