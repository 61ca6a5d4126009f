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


//! ExprDB CLI
//!
//! Build an expression store from sparse triplets, find similar pairs and
//! assemble similarity graphs.
//!
//! ## Usage
//!
//! ```bash
//! # Create a store and load counts (observation<TAB>feature<TAB>count)
//! exprdb create --dir ./pbmc --truncation-budget 100
//! exprdb ingest --dir ./pbmc --counts counts.tsv --meta-data cells.tsv
//!
//! # Neighbor lists, exactly or with banded LSH
//! exprdb find-pairs --dir ./pbmc --name knn --k 10 --threshold 0.5 --mode exact
//! exprdb find-pairs --dir ./pbmc --name lsh --mode lsh-banded --bands 16 --rows 16
//!
//! # Graph and exports
//! exprdb graph --dir ./pbmc --pairs knn --max-connectivity 10 --output graph.csv
//! exprdb export-pairs --dir ./pbmc --name knn --output knn.csv
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use exprdb_client::{ExpressionMatrix, Operation, OperationOutput, PairsMethod};
use exprdb_core::{LshParams, SearchConfig, SimilarPairsParams, StoreConfig};
use exprdb_storage::ALL_OBSERVATIONS_SET_NAME;

/// ExprDB - sparse expression similarity search
#[derive(Parser)]
#[command(name = "exprdb")]
#[command(about = "Sparse expression store, similar pairs and similarity graphs")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Worker threads for the search passes (0 = one per core)
    #[arg(short = 't', long, global = true, default_value = "0")]
    threads: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Exact,
    Truncated,
    Lsh,
    LshBanded,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty store
    Create {
        #[arg(short, long)]
        dir: PathBuf,

        /// Largest counts kept per observation for truncated similarity
        #[arg(long, default_value = "100")]
        truncation_budget: usize,

        #[arg(long)]
        feature_capacity: Option<u64>,

        #[arg(long)]
        observation_capacity: Option<u64>,
    },

    /// Add observations from a triplet file
    Ingest {
        #[arg(short, long)]
        dir: PathBuf,

        /// observation<TAB>feature<TAB>count lines
        #[arg(short, long)]
        counts: PathBuf,

        /// observation<TAB>name<TAB>value lines
        #[arg(short, long)]
        meta_data: Option<PathBuf>,
    },

    /// Describe a store
    Info {
        #[arg(short, long)]
        dir: PathBuf,

        /// Also print string table probe statistics
        #[arg(long)]
        hash_tables: bool,
    },

    /// Compute a named neighbor list
    FindPairs {
        #[arg(short, long)]
        dir: PathBuf,

        #[arg(short, long)]
        name: String,

        #[arg(short, long, default_value = ALL_OBSERVATIONS_SET_NAME)]
        observation_set: String,

        #[arg(short, long, default_value = "10")]
        k: usize,

        #[arg(long, default_value = "0.5", allow_hyphen_values = true)]
        threshold: f64,

        #[arg(short, long, value_enum, default_value = "exact")]
        mode: Mode,

        /// LSH bands
        #[arg(long, default_value = "16")]
        bands: usize,

        /// LSH rows per band (power of two up to 64 for lsh-banded)
        #[arg(long, default_value = "16")]
        rows: usize,

        #[arg(long, default_value = "231")]
        seed: u64,

        /// Observations per bucket for lsh-banded
        #[arg(long, default_value = "1.0")]
        load_factor: f64,
    },

    /// Write a neighbor list as id0,id1,similarity rows
    ExportPairs {
        #[arg(short, long)]
        dir: PathBuf,

        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Remove a neighbor list
    RemovePairs {
        #[arg(short, long)]
        dir: PathBuf,

        #[arg(short, long)]
        name: String,
    },

    /// Build a similarity graph from a neighbor list and write its edges
    Graph {
        #[arg(short, long)]
        dir: PathBuf,

        #[arg(short, long)]
        pairs: String,

        #[arg(short, long, default_value = ALL_OBSERVATIONS_SET_NAME)]
        observation_set: String,

        #[arg(long, default_value = "0.5", allow_hyphen_values = true)]
        threshold: f64,

        #[arg(long, default_value = "10")]
        max_connectivity: usize,

        /// Keep vertices without edges
        #[arg(long)]
        keep_isolated: bool,

        /// Edge list output (id0,id1,similarity)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Create a named observation set
    CreateSet {
        #[arg(short, long)]
        dir: PathBuf,

        #[arg(short, long)]
        name: String,

        /// Meta data field to match, with --pattern
        #[arg(long, requires = "pattern")]
        meta_data_name: Option<String>,

        /// Regular expression the whole field value must match
        #[arg(long)]
        pattern: Option<String>,

        /// Intersection of these sets
        #[arg(long, num_args = 1.., conflicts_with_all = ["meta_data_name", "union"])]
        intersection: Vec<String>,

        /// Union of these sets
        #[arg(long, num_args = 1.., conflicts_with = "meta_data_name")]
        union: Vec<String>,

        /// Downsample this set, with --probability
        #[arg(long, requires = "probability")]
        downsample: Option<String>,

        #[arg(long)]
        probability: Option<f64>,

        #[arg(long, default_value = "231")]
        seed: u64,
    },

    /// Truncated vs exact similarity over all pairs of a set
    Analyze {
        #[arg(short, long)]
        dir: PathBuf,

        #[arg(short, long, default_value = ALL_OBSERVATIONS_SET_NAME)]
        observation_set: String,

        #[arg(long, default_value = "20")]
        bins: usize,

        /// Compare LSH estimates instead, with this many bits
        #[arg(long)]
        lsh_bits: Option<usize>,

        #[arg(long, default_value = "231")]
        seed: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let search = SearchConfig {
        threads: cli.threads,
        ..SearchConfig::default()
    };

    match cli.command {
        Commands::Create {
            dir,
            truncation_budget,
            feature_capacity,
            observation_capacity,
        } => {
            let defaults = StoreConfig::default();
            let config = StoreConfig {
                truncation_budget,
                feature_capacity: feature_capacity.unwrap_or(defaults.feature_capacity),
                observation_capacity: observation_capacity.unwrap_or(defaults.observation_capacity),
                ..defaults
            };
            ExpressionMatrix::create(&dir, config, search)
                .with_context(|| format!("Failed to create a store in {:?}", dir))?;
            eprintln!("Created store in {:?}", dir);
            Ok(())
        }
        Commands::Ingest {
            dir,
            counts,
            meta_data,
        } => ingest(&dir, search, &counts, meta_data.as_deref()),
        Commands::Info { dir, hash_tables } => {
            let mut matrix = open(&dir, search)?;
            print_output(matrix.execute(Operation::Info)?)?;
            if hash_tables {
                print_output(matrix.execute(Operation::HashTableSummary)?)?;
            }
            Ok(())
        }
        Commands::FindPairs {
            dir,
            name,
            observation_set,
            k,
            threshold,
            mode,
            bands,
            rows,
            seed,
            load_factor,
        } => {
            let lsh = LshParams::new(bands, rows, seed);
            let method = match mode {
                Mode::Exact => PairsMethod::Exact,
                Mode::Truncated => PairsMethod::Truncated,
                Mode::Lsh => PairsMethod::Lsh { lsh },
                Mode::LshBanded => PairsMethod::LshBanded { lsh, load_factor },
            };
            let mut matrix = open(&dir, search)?;
            let start = Instant::now();
            let pairs = matrix
                .find_similar_pairs(
                    &name,
                    &observation_set,
                    SimilarPairsParams::new(k, threshold),
                    method,
                )
                .with_context(|| format!("Failed to compute similar pairs {}", name))?;
            eprintln!(
                "Similar pairs {}: {} pairs ({}) in {:.2}s",
                name,
                pairs.pair_count(),
                pairs.method(),
                start.elapsed().as_secs_f64()
            );
            Ok(())
        }
        Commands::ExportPairs { dir, name, output } => {
            let matrix = open(&dir, search)?;
            matrix
                .export_similar_pairs(&name, &output)
                .with_context(|| format!("Failed to export similar pairs {}", name))?;
            eprintln!("Wrote {:?}", output);
            Ok(())
        }
        Commands::RemovePairs { dir, name } => {
            let mut matrix = open(&dir, search)?;
            matrix.remove_similar_pairs(&name)?;
            eprintln!("Removed similar pairs {}", name);
            Ok(())
        }
        Commands::Graph {
            dir,
            pairs,
            observation_set,
            threshold,
            max_connectivity,
            keep_isolated,
            output,
        } => {
            let mut matrix = open(&dir, search)?;
            let summary = matrix
                .create_graph(
                    "graph",
                    &observation_set,
                    &pairs,
                    threshold,
                    max_connectivity,
                    !keep_isolated,
                )
                .context("Failed to build the similarity graph")?
                .clone();
            print_output(OperationOutput::Graph(summary))?;
            if let Some(output) = output {
                matrix.export_graph("graph", &output)?;
                eprintln!("Wrote {:?}", output);
            }
            Ok(())
        }
        Commands::CreateSet {
            dir,
            name,
            meta_data_name,
            pattern,
            intersection,
            union,
            downsample,
            probability,
            seed,
        } => {
            let from_meta_data = meta_data_name.zip(pattern);
            let operation = if let Some((meta_data_name, pattern)) = from_meta_data {
                Operation::CreateObservationSetFromMetaData {
                    name,
                    meta_data_name,
                    pattern,
                }
            } else if !intersection.is_empty() {
                Operation::CreateObservationSetIntersection {
                    name,
                    inputs: intersection,
                }
            } else if !union.is_empty() {
                Operation::CreateObservationSetUnion {
                    name,
                    inputs: union,
                }
            } else if let (Some(input), Some(probability)) = (downsample, probability) {
                Operation::DownsampleObservationSet {
                    name,
                    input,
                    probability,
                    seed,
                }
            } else {
                bail!(
                    "Specify --meta-data-name/--pattern, --intersection, --union or --downsample"
                );
            };

            let mut matrix = open(&dir, search)?;
            print_output(matrix.execute(operation)?)?;
            matrix.save()?;
            Ok(())
        }
        Commands::Analyze {
            dir,
            observation_set,
            bins,
            lsh_bits,
            seed,
        } => {
            let mut matrix = open(&dir, search)?;
            let operation = match lsh_bits {
                Some(bits) => Operation::CompareLsh {
                    observation_set,
                    lsh: LshParams::flat(bits, seed),
                },
                None => Operation::AnalyzeAllPairs {
                    observation_set,
                    bin_count: bins,
                },
            };
            print_output(matrix.execute(operation)?)
        }
    }
}

fn open(dir: &Path, search: SearchConfig) -> Result<ExpressionMatrix> {
    ExpressionMatrix::open(dir, search).with_context(|| format!("Failed to open store {:?}", dir))
}

fn ingest(dir: &Path, search: SearchConfig, counts: &Path, meta_data: Option<&Path>) -> Result<()> {
    let mut matrix = open(dir, search)?;
    let start = Instant::now();

    let counts_reader = BufReader::new(
        File::open(counts).with_context(|| format!("Failed to open {:?}", counts))?,
    );
    let meta_reader = match meta_data {
        Some(path) => Some(BufReader::new(
            File::open(path).with_context(|| format!("Failed to open {:?}", path))?,
        )),
        None => None,
    };

    let summary = matrix
        .ingest(counts_reader, meta_reader)
        .with_context(|| format!("Failed to ingest {:?}", counts))?;
    matrix.save().context("Failed to save the store")?;

    eprintln!(
        "Ingested {} observations ({} entries, {} new features) in {:.2}s",
        summary.observations,
        summary.entries,
        summary.new_features,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Results go to stdout as pretty JSON, diagnostics to stderr
fn print_output(output: OperationOutput) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
