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


//! Operation dispatch
//!
//! Every request a front end can make of an [`ExpressionMatrix`] is one
//! [`Operation`] variant, executed by [`ExpressionMatrix::execute`]. The
//! enum is serde-friendly so that requests can arrive as JSON.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use exprdb_core::{LshParams, Result, SimilarPairsParams};
use exprdb_index::{GraphSummary, LshComparison, PairAnalysis};
use exprdb_storage::{MetaDataNameUsage, ProbeStatistics};

use crate::matrix::{ExpressionMatrix, MatrixInfo, PairsMethod};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Info,
    ListMetaDataNames,
    HistogramMetaData {
        observation_set: String,
        meta_data_name: String,
    },
    HashTableSummary,

    ListObservationSets,
    CreateObservationSet {
        name: String,
        observations: Vec<String>,
    },
    CreateObservationSetFromMetaData {
        name: String,
        meta_data_name: String,
        pattern: String,
    },
    CreateObservationSetIntersection {
        name: String,
        inputs: Vec<String>,
    },
    CreateObservationSetUnion {
        name: String,
        inputs: Vec<String>,
    },
    DownsampleObservationSet {
        name: String,
        input: String,
        probability: f64,
        seed: u64,
    },
    RemoveObservationSet {
        name: String,
    },

    ListSimilarPairs,
    FindSimilarPairs {
        name: String,
        observation_set: String,
        k: usize,
        threshold: f64,
        method: PairsMethod,
    },
    RemoveSimilarPairs {
        name: String,
    },
    ExportSimilarPairs {
        name: String,
        path: PathBuf,
    },

    ListGraphs,
    CreateGraph {
        name: String,
        observation_set: String,
        similar_pairs: String,
        threshold: f64,
        max_connectivity: usize,
        remove_isolated_vertices: bool,
    },
    RemoveGraph {
        name: String,
    },
    ExportGraph {
        name: String,
        path: PathBuf,
    },

    AnalyzeAllPairs {
        observation_set: String,
        bin_count: usize,
    },
    CompareLsh {
        observation_set: String,
        lsh: LshParams,
    },

    Save,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum OperationOutput {
    Done,
    Info(MatrixInfo),
    Names { names: Vec<String> },
    MetaDataNames { names: Vec<MetaDataNameUsage> },
    Histogram { values: Vec<(String, u64)> },
    HashTables { tables: Vec<(String, ProbeStatistics)> },
    Set { name: String, size: usize },
    SimilarPairs { name: String, method: String, pair_count: usize },
    Graph(GraphSummary),
    PairAnalysis(PairAnalysis),
    LshComparison(LshComparison),
}

fn set_output(name: &str, size: usize) -> OperationOutput {
    OperationOutput::Set {
        name: name.to_string(),
        size,
    }
}

fn names(names: Vec<String>) -> OperationOutput {
    OperationOutput::Names { names }
}

impl ExpressionMatrix {
    pub fn execute(&mut self, operation: Operation) -> Result<OperationOutput> {
        let output = match operation {
            Operation::Info => OperationOutput::Info(self.info()),
            Operation::ListMetaDataNames => OperationOutput::MetaDataNames {
                names: self.store().meta_data_names(),
            },
            Operation::HistogramMetaData {
                observation_set,
                meta_data_name,
            } => OperationOutput::Histogram {
                values: self.histogram_meta_data(&observation_set, &meta_data_name)?,
            },
            Operation::HashTableSummary => OperationOutput::HashTables {
                tables: self.hash_table_summary(),
            },

            Operation::ListObservationSets => names(self.list_observation_sets()),
            Operation::CreateObservationSet { name, observations } => {
                let observations: Vec<&str> = observations.iter().map(String::as_str).collect();
                let size = self.create_observation_set(&name, &observations)?.len();
                set_output(&name, size)
            }
            Operation::CreateObservationSetFromMetaData {
                name,
                meta_data_name,
                pattern,
            } => {
                let size = self
                    .create_observation_set_from_meta_data(&name, &meta_data_name, &pattern)?
                    .len();
                set_output(&name, size)
            }
            Operation::CreateObservationSetIntersection { name, inputs } => {
                let inputs: Vec<&str> = inputs.iter().map(String::as_str).collect();
                let size = self.create_observation_set_intersection(&name, &inputs)?.len();
                set_output(&name, size)
            }
            Operation::CreateObservationSetUnion { name, inputs } => {
                let inputs: Vec<&str> = inputs.iter().map(String::as_str).collect();
                let size = self.create_observation_set_union(&name, &inputs)?.len();
                set_output(&name, size)
            }
            Operation::DownsampleObservationSet {
                name,
                input,
                probability,
                seed,
            } => {
                let size = self
                    .downsample_observation_set(&name, &input, probability, seed)?
                    .len();
                set_output(&name, size)
            }
            Operation::RemoveObservationSet { name } => {
                self.remove_observation_set(&name)?;
                OperationOutput::Done
            }

            Operation::ListSimilarPairs => names(self.list_similar_pairs()),
            Operation::FindSimilarPairs {
                name,
                observation_set,
                k,
                threshold,
                method,
            } => {
                let pairs = self.find_similar_pairs(
                    &name,
                    &observation_set,
                    SimilarPairsParams::new(k, threshold),
                    method,
                )?;
                OperationOutput::SimilarPairs {
                    method: pairs.method().to_string(),
                    pair_count: pairs.pair_count(),
                    name,
                }
            }
            Operation::RemoveSimilarPairs { name } => {
                self.remove_similar_pairs(&name)?;
                OperationOutput::Done
            }
            Operation::ExportSimilarPairs { name, path } => {
                self.export_similar_pairs(&name, &path)?;
                OperationOutput::Done
            }

            Operation::ListGraphs => names(self.list_graphs()),
            Operation::CreateGraph {
                name,
                observation_set,
                similar_pairs,
                threshold,
                max_connectivity,
                remove_isolated_vertices,
            } => OperationOutput::Graph(
                self.create_graph(
                    &name,
                    &observation_set,
                    &similar_pairs,
                    threshold,
                    max_connectivity,
                    remove_isolated_vertices,
                )?
                .clone(),
            ),
            Operation::RemoveGraph { name } => {
                self.remove_graph(&name)?;
                OperationOutput::Done
            }
            Operation::ExportGraph { name, path } => {
                self.export_graph(&name, &path)?;
                OperationOutput::Done
            }

            Operation::AnalyzeAllPairs {
                observation_set,
                bin_count,
            } => {
                OperationOutput::PairAnalysis(self.analyze_all_pairs(&observation_set, bin_count)?)
            }
            Operation::CompareLsh {
                observation_set,
                lsh,
            } => OperationOutput::LshComparison(self.compare_lsh(&observation_set, lsh)?),

            Operation::Save => {
                self.save()?;
                OperationOutput::Done
            }
        };
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operations_parse_from_json() {
        let json = r#"{"op":"find_similar_pairs","name":"knn","observation_set":"AllCells",
            "k":10,"threshold":0.5,
            "method":{"mode":"lsh_banded",
                      "lsh":{"band_count":8,"row_count":16,"seed":3},"load_factor":2.0}}"#;
        let operation: Operation = serde_json::from_str(json).unwrap();
        assert_eq!(
            operation,
            Operation::FindSimilarPairs {
                name: "knn".to_string(),
                observation_set: "AllCells".to_string(),
                k: 10,
                threshold: 0.5,
                method: PairsMethod::LshBanded {
                    lsh: LshParams::new(8, 16, 3),
                    load_factor: 2.0,
                },
            }
        );

        let operation: Operation = serde_json::from_str(r#"{"op":"list_graphs"}"#).unwrap();
        assert_eq!(operation, Operation::ListGraphs);
    }
}
