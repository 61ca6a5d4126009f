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

//! Degree-capped undirected similarity graph
//!
//! Built from neighbor lists in three steps:
//!
//! 1. every (observation, neighbor) entry with similarity at or above the
//!    threshold, both ends in the observation set, becomes the undirected
//!    edge `(min, max)`; an edge reported from both sides keeps the larger
//!    similarity
//! 2. every vertex ranks its incident edges (similarity descending, neighbor
//!    id ascending) and marks those past rank `k`; all marked edges go
//! 3. degree-0 vertices are counted, and can be pruned afterwards
//!
//! Graphs live in memory only.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use tracing::info;

use exprdb_core::config::validate_threshold;
use exprdb_core::{ExprError, ObservationId, Result};
use exprdb_storage::ObservationSet;

use crate::similar_pairs::SimilarPairs;
use crate::topk::Neighbor;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphSummary {
    pub observation_set_name: String,
    pub neighbor_list_name: String,
    pub similarity_threshold: f64,
    pub max_connectivity: usize,
    pub vertex_count: usize,
    pub edge_count: usize,
    pub isolated_vertex_count: usize,
}

/// One undirected edge, `a < b`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub a: ObservationId,
    pub b: ObservationId,
    pub similarity: f32,
}

#[derive(Debug, Clone)]
pub struct SimilarityGraph {
    summary: GraphSummary,
    /// Neighbors of every vertex, strongest first
    adjacency: BTreeMap<ObservationId, Vec<Neighbor>>,
}

impl SimilarityGraph {
    /// Build the graph of `observations` from `pairs`.
    ///
    /// Observations of the set missing from `pairs` become isolated vertices.
    pub fn build(
        observation_set_name: &str,
        observations: &ObservationSet,
        neighbor_list_name: &str,
        pairs: &SimilarPairs,
        similarity_threshold: f64,
        max_connectivity: usize,
    ) -> Result<Self> {
        validate_threshold(similarity_threshold)?;
        if max_connectivity == 0 {
            return Err(ExprError::invalid("max connectivity must be at least 1"));
        }

        // Canonical (min, max) -> similarity
        let mut edges: HashMap<(ObservationId, ObservationId), f32> = HashMap::new();
        for observation in observations.iter() {
            let Ok(neighbors) = pairs.neighbors_of(observation) else {
                continue;
            };
            for neighbor in neighbors {
                if neighbor.id == observation
                    || !observations.contains(neighbor.id)
                    || neighbor.similarity < similarity_threshold as f32
                {
                    continue;
                }
                let key = (observation.min(neighbor.id), observation.max(neighbor.id));
                edges
                    .entry(key)
                    .and_modify(|s| *s = s.max(neighbor.similarity))
                    .or_insert(neighbor.similarity);
            }
        }
        let candidate_edges = edges.len();

        let mut incident: BTreeMap<ObservationId, Vec<Neighbor>> =
            observations.iter().map(|id| (id, Vec::new())).collect();
        for (&(a, b), &similarity) in &edges {
            if let Some(list) = incident.get_mut(&a) {
                list.push(Neighbor::new(b, similarity));
            }
            if let Some(list) = incident.get_mut(&b) {
                list.push(Neighbor::new(a, similarity));
            }
        }

        let mut removed: Vec<(ObservationId, ObservationId)> = Vec::new();
        for (&vertex, list) in incident.iter_mut() {
            list.sort_by(Neighbor::rank_cmp);
            for dropped in list.iter().skip(max_connectivity) {
                removed.push((vertex.min(dropped.id), vertex.max(dropped.id)));
            }
        }
        removed.sort_unstable();
        removed.dedup();

        let mut graph = Self {
            summary: GraphSummary {
                observation_set_name: observation_set_name.to_string(),
                neighbor_list_name: neighbor_list_name.to_string(),
                similarity_threshold,
                max_connectivity,
                vertex_count: 0,
                edge_count: 0,
                isolated_vertex_count: 0,
            },
            adjacency: incident,
        };
        graph.remove_edges(&removed);
        graph.refresh_counts();
        graph.summary.isolated_vertex_count = graph
            .adjacency
            .values()
            .filter(|list| list.is_empty())
            .count();

        info!(
            vertices = graph.summary.vertex_count,
            edges = graph.summary.edge_count,
            removed_by_degree_cap = candidate_edges - graph.summary.edge_count,
            isolated = graph.summary.isolated_vertex_count,
            "built similarity graph"
        );
        Ok(graph)
    }

    /// Remove every edge in `removed` (sorted, canonical) from both ends
    fn remove_edges(&mut self, removed: &[(ObservationId, ObservationId)]) {
        for (&vertex, list) in self.adjacency.iter_mut() {
            list.retain(|n| {
                let key = (vertex.min(n.id), vertex.max(n.id));
                removed.binary_search(&key).is_err()
            });
        }
    }

    fn refresh_counts(&mut self) {
        self.summary.vertex_count = self.adjacency.len();
        self.summary.edge_count = self.adjacency.values().map(Vec::len).sum::<usize>() / 2;
    }

    /// Drop degree-0 vertices. Returns how many were removed.
    pub fn remove_isolated_vertices(&mut self) -> usize {
        let before = self.adjacency.len();
        self.adjacency.retain(|_, list| !list.is_empty());
        self.refresh_counts();
        let removed = before - self.adjacency.len();
        info!(removed, vertices = self.summary.vertex_count, "removed isolated vertices");
        removed
    }

    pub fn summary(&self) -> &GraphSummary {
        &self.summary
    }

    pub fn vertex_count(&self) -> usize {
        self.summary.vertex_count
    }

    pub fn edge_count(&self) -> usize {
        self.summary.edge_count
    }

    pub fn contains(&self, observation: ObservationId) -> bool {
        self.adjacency.contains_key(&observation)
    }

    pub fn vertices(&self) -> impl Iterator<Item = ObservationId> + '_ {
        self.adjacency.keys().copied()
    }

    /// Neighbors of a vertex, strongest first
    pub fn neighbors(&self, observation: ObservationId) -> Result<&[Neighbor]> {
        self.adjacency
            .get(&observation)
            .map(Vec::as_slice)
            .ok_or_else(|| ExprError::not_found(format!("vertex {}", observation)))
    }

    pub fn degree(&self, observation: ObservationId) -> Result<usize> {
        self.neighbors(observation).map(<[Neighbor]>::len)
    }

    /// Every edge once, ordered by `(a, b)`
    pub fn edges(&self) -> impl Iterator<Item = Edge> + '_ {
        let mut edges: Vec<Edge> = self
            .adjacency
            .iter()
            .flat_map(|(&a, list)| {
                list.iter().filter(move |n| a < n.id).map(move |n| Edge {
                    a,
                    b: n.id,
                    similarity: n.similarity,
                })
            })
            .collect();
        edges.sort_by(|x, y| x.a.cmp(&y.a).then(x.b.cmp(&y.b)));
        edges.into_iter()
    }

    /// One `id0,id1,similarity` row per edge
    pub fn write_csv<W: Write>(&self, mut writer: W) -> Result<()> {
        writeln!(writer, "id0,id1,similarity")?;
        for edge in self.edges() {
            writeln!(writer, "{},{},{}", edge.a, edge.b, edge.similarity)?;
        }
        writer.flush()?;
        Ok(())
    }
}
