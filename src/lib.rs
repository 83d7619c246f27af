//! # qgraph
//!
//! Quality-aware de Bruijn graph construction for short-read assembly.
//!
//! Given DNA reads with per-base qualities, the pipeline counts canonical
//! K-mers supported by a high-quality stretch of each read, records the
//! single-base neighbours observed around every surviving K-mer, contracts
//! unambiguous K-mer chains into unitig edges, materialises a bidirected
//! graph with an explicit reverse-complement involution, and threads each
//! read back through the graph as a sequence of edge ids with a start
//! offset.
//!
//! ```no_run
//! use bytes::Bytes;
//! use qgraph::{build_read_graph, BuildParams};
//!
//! let reads: Vec<Bytes> = load_reads();
//! let quals: Vec<Bytes> = load_quals();
//! let params = BuildParams {
//!     min_freq: 4,
//!     ..BuildParams::default()
//! };
//! let (graph, paths) = build_read_graph(&reads, &quals, &params)?;
//! println!("{} edges, {} paths", graph.edge_count(), paths.len());
//! # fn load_reads() -> Vec<Bytes> { Vec::new() }
//! # fn load_quals() -> Vec<Bytes> { Vec::new() }
//! # Ok::<(), qgraph::QgraphError>(())
//! ```
//!
//! Reads are contiguous 2-bit base streams ([`bytes::Bytes`] of codes,
//! A=0 C=1 G=2 T=3); qualities are unpacked 8-bit values of the same
//! length. FASTA/FASTQ ingest and the command-line surface are the
//! caller's concern.

pub mod bases;
pub mod config;
pub mod context;
pub mod counter;
pub mod dict;
pub mod edges;
pub mod error;
pub mod gapfill;
pub mod graph;
pub mod kmer;
pub mod pather;
pub mod pipeline;
pub mod qual;
pub mod record;
pub mod spectra;

/// Production K-mer length.
pub const DEFAULT_K: usize = 60;

pub use config::BuildParams;
pub use error::QgraphError;
pub use graph::Graph;
pub use pather::ReadPath;
pub use pipeline::build_read_graph;
