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


//! End-to-end lifecycle of an expression matrix: ingest, search, graph,
//! persistence and the named-object operations.

use std::io::Cursor;
use std::path::Path;

use exprdb_client::{ExpressionMatrix, Operation, OperationOutput, PairsMethod};
use exprdb_core::{ExprError, LshParams, SearchConfig, SimilarPairsParams, StoreConfig};

const COUNTS: &str = "\
c0\tg0\t5\nc0\tg1\t4\n\
c1\tg0\t5\nc1\tg1\t4\n\
c2\tg0\t10\nc2\tg1\t8\n\
c3\tg2\t5\nc3\tg3\t4\n\
c4\tg0\t5\nc4\tg1\t4\n";

const META: &str = "\
c0\ttype\tT\nc1\ttype\tT\nc2\ttype\tB\nc3\ttype\tNK\nc4\ttype\tT\n";

fn populated(dir: &Path) -> ExpressionMatrix {
    let mut matrix =
        ExpressionMatrix::create(dir, StoreConfig::small(), SearchConfig::default()).unwrap();
    matrix
        .ingest(Cursor::new(COUNTS), Some(Cursor::new(META)))
        .unwrap();
    matrix.save().unwrap();
    matrix
}

#[test]
fn test_create_twice_is_duplicate() {
    let dir = tempfile::tempdir().unwrap();
    populated(dir.path());
    assert!(matches!(
        ExpressionMatrix::create(dir.path(), StoreConfig::small(), SearchConfig::default()),
        Err(ExprError::DuplicateName(_))
    ));
}

#[test]
fn test_graph_with_one_isolated_vertex() {
    let dir = tempfile::tempdir().unwrap();
    let mut matrix = populated(dir.path());

    matrix
        .find_similar_pairs(
            "knn",
            "AllCells",
            SimilarPairsParams::new(3, 0.9),
            PairsMethod::Exact,
        )
        .unwrap();
    assert!(matrix.similar_pairs("knn").unwrap().neighbors_of(3).unwrap().is_empty());

    let summary = matrix
        .create_graph("full", "AllCells", "knn", 0.9, 3, false)
        .unwrap()
        .clone();
    assert_eq!(summary.vertex_count, 5);
    assert_eq!(summary.isolated_vertex_count, 1);
    assert_eq!(summary.edge_count, 6);

    let pruned = matrix
        .create_graph("pruned", "AllCells", "knn", 0.9, 3, true)
        .unwrap()
        .clone();
    assert_eq!(pruned.vertex_count, 4);
    assert_eq!(pruned.isolated_vertex_count, 1);
    assert!(!matrix.graph("pruned").unwrap().contains(3));
    assert_eq!(matrix.list_graphs(), vec!["full".to_string(), "pruned".to_string()]);
}

#[test]
fn test_similar_pairs_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let expected = {
        let mut matrix = populated(dir.path());
        matrix
            .create_observation_set_from_meta_data("t_cells", "type", "T")
            .unwrap();
        matrix
            .find_similar_pairs(
                "lsh",
                "t_cells",
                SimilarPairsParams::new(2, -1.0),
                PairsMethod::Lsh {
                    lsh: LshParams::flat(256, 7),
                },
            )
            .unwrap();
        matrix
            .create_graph("g", "t_cells", "lsh", 0.0, 2, true)
            .unwrap();
        matrix.similar_pairs("lsh").unwrap().neighbors_of(0).unwrap().to_vec()
    };
    assert!(dir.path().join("SimilarPairs-lsh.bin").exists());

    let matrix = ExpressionMatrix::open(dir.path(), SearchConfig::default()).unwrap();
    assert_eq!(matrix.list_similar_pairs(), vec!["lsh".to_string()]);
    assert_eq!(
        matrix.similar_pairs("lsh").unwrap().neighbors_of(0).unwrap(),
        expected.as_slice()
    );
    assert_eq!(matrix.observation_set("t_cells").unwrap().as_slice(), &[0, 1, 4]);
    assert!(matrix.list_graphs().is_empty());
    assert_eq!(matrix.store().observation_count(), 5);
}

#[test]
fn test_named_object_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let mut matrix = populated(dir.path());
    let params = SimilarPairsParams::new(2, 0.0);

    matrix
        .find_similar_pairs("p", "AllCells", params, PairsMethod::Truncated)
        .unwrap();
    assert!(matches!(
        matrix.find_similar_pairs("p", "AllCells", params, PairsMethod::Exact),
        Err(ExprError::DuplicateName(_))
    ));
    assert!(matches!(
        matrix.find_similar_pairs("../p", "AllCells", params, PairsMethod::Exact),
        Err(ExprError::InvalidArgument(_))
    ));

    matrix.remove_similar_pairs("p").unwrap();
    assert!(!dir.path().join("SimilarPairs-p.bin").exists());
    assert!(matches!(
        matrix.remove_similar_pairs("p"),
        Err(ExprError::NotFound(_))
    ));
    assert!(matches!(matrix.remove_graph("g"), Err(ExprError::NotFound(_))));
    assert!(matches!(
        matrix.remove_observation_set("AllCells"),
        Err(ExprError::InvalidArgument(_))
    ));
}

#[test]
fn test_cancelled_search_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let mut matrix = populated(dir.path());
    let control = matrix.search_control();
    control.cancel();

    let result = matrix.find_similar_pairs(
        "p",
        "AllCells",
        SimilarPairsParams::new(2, 0.0),
        PairsMethod::Exact,
    );
    assert!(matches!(result, Err(ExprError::Cancelled)));
    assert!(matrix.list_similar_pairs().is_empty());
    assert!(!dir.path().join("SimilarPairs-p.bin").exists());

    control.resume();
    assert!(matrix
        .find_similar_pairs("p", "AllCells", SimilarPairsParams::new(2, 0.0), PairsMethod::Exact)
        .is_ok());
}

#[test]
fn test_execute_operations() {
    let dir = tempfile::tempdir().unwrap();
    let mut matrix = populated(dir.path());

    let output = matrix
        .execute(Operation::CreateObservationSetFromMetaData {
            name: "t".to_string(),
            meta_data_name: "type".to_string(),
            pattern: "T".to_string(),
        })
        .unwrap();
    assert!(matches!(output, OperationOutput::Set { size: 3, .. }));

    let output = matrix
        .execute(Operation::CreateObservationSetUnion {
            name: "t_or_b".to_string(),
            inputs: vec!["t".to_string(), "AllCells".to_string()],
        })
        .unwrap();
    assert!(matches!(output, OperationOutput::Set { size: 5, .. }));

    let output = matrix
        .execute(Operation::HistogramMetaData {
            observation_set: "AllCells".to_string(),
            meta_data_name: "type".to_string(),
        })
        .unwrap();
    match output {
        OperationOutput::Histogram { values } => {
            assert_eq!(values[0], ("T".to_string(), 3));
            assert_eq!(values.len(), 3);
        }
        other => panic!("unexpected output {:?}", other),
    }

    let output = matrix
        .execute(Operation::FindSimilarPairs {
            name: "banded".to_string(),
            observation_set: "AllCells".to_string(),
            k: 2,
            threshold: 0.5,
            method: PairsMethod::LshBanded {
                lsh: LshParams::new(16, 8, 1),
                load_factor: 1.0,
            },
        })
        .unwrap();
    assert!(matches!(output, OperationOutput::SimilarPairs { .. }));

    let csv = dir.path().join("banded.csv");
    matrix
        .execute(Operation::ExportSimilarPairs {
            name: "banded".to_string(),
            path: csv.clone(),
        })
        .unwrap();
    let text = std::fs::read_to_string(&csv).unwrap();
    assert!(text.starts_with("id0,id1,similarity\n"));

    let output = matrix.execute(Operation::HashTableSummary).unwrap();
    match output {
        OperationOutput::HashTables { tables } => assert_eq!(tables.len(), 4),
        other => panic!("unexpected output {:?}", other),
    }

    let output = matrix
        .execute(Operation::AnalyzeAllPairs {
            observation_set: "AllCells".to_string(),
            bin_count: 10,
        })
        .unwrap();
    match output {
        OperationOutput::PairAnalysis(analysis) => {
            assert_eq!(analysis.pair_count, 10);
            assert_eq!(analysis.bound_violations, 0);
        }
        other => panic!("unexpected output {:?}", other),
    }

    let output = matrix.execute(Operation::ListSimilarPairs).unwrap();
    match output {
        OperationOutput::Names { names } => assert_eq!(names, vec!["banded".to_string()]),
        other => panic!("unexpected output {:?}", other),
    }
}
