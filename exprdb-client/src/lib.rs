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


//! ExprDB Client
//!
//! [`ExpressionMatrix`] is the single top-level context: it owns a store
//! directory and every named object derived from it.
//!
//! ```rust,no_run
//! use exprdb_client::{ExpressionMatrix, PairsMethod};
//! use exprdb_core::{SearchConfig, SimilarPairsParams, StoreConfig};
//!
//! # fn main() -> exprdb_core::Result<()> {
//! let mut matrix =
//!     ExpressionMatrix::create("./pbmc", StoreConfig::default(), SearchConfig::default())?;
//! let counts = std::io::BufReader::new(std::fs::File::open("counts.tsv")?);
//! matrix.ingest(counts, None::<std::io::Empty>)?;
//! matrix.save()?;
//!
//! let params = SimilarPairsParams::new(10, 0.5);
//! matrix.find_similar_pairs("knn", "AllCells", params, PairsMethod::Exact)?;
//! let summary = matrix.create_graph("graph", "AllCells", "knn", 0.5, 10, true)?;
//! println!("{} vertices, {} edges", summary.vertex_count, summary.edge_count);
//! # Ok(())
//! # }
//! ```

pub mod ingest;
pub mod matrix;
pub mod operation;

pub use ingest::{read_meta_data, read_triplets, IngestSummary, ObservationCounts};
pub use matrix::{ExpressionMatrix, MatrixInfo, PairsMethod};
pub use operation::{Operation, OperationOutput};

pub use exprdb_core::{ExprError, Result};
