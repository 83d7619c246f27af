//! End-to-end graph construction.
//!
//! Wires the stages together: good-length qualification, K-mer counting,
//! edge building, the optional repair passes, graph assembly, and read
//! pathing. This is the library's main entry point; ingest and the
//! command-line surface live with the caller.

use bytes::Bytes;
use tracing::info;

use crate::config::BuildParams;
use crate::counter;
use crate::edges::build_edges;
use crate::error::QgraphError;
use crate::gapfill::{fill_gaps, join_overlaps};
use crate::graph::Graph;
use crate::pather::{path_reads, ReadPath};
use crate::qual;

/// Builds the bidirected edge graph from reads and their qualities, and
/// threads every read back through it.
///
/// Returns the graph and one [`ReadPath`] per input read. When
/// `params.workdir` is set, the K-mer frequency histogram is written there
/// as `small_K.freqs`.
pub fn build_read_graph(
    reads: &[Bytes],
    quals: &[Bytes],
    params: &BuildParams,
) -> Result<(Graph, Vec<ReadPath>), QgraphError> {
    assert_eq!(reads.len(), quals.len());
    let k = params.k;
    info!(reads = reads.len(), k, min_freq = params.min_freq, "building read graph");

    let good_lens = qual::good_lengths(quals, k, params.min_qual);
    let mut dict = counter::count_into_dict(
        reads,
        &good_lens,
        k,
        params.min_freq,
        params.count_batch_size,
        params.workdir.as_deref(),
    )?;
    dict.recompute_adjacencies();

    let mut edges = build_edges(&dict);
    let total_kmers: usize = edges.iter().map(|e| e.len() + 1 - k).sum();
    info!(edges = edges.len(), kmers = total_kmers, "initial edge set");

    let min_freq2 = params.min_freq2();
    if params.do_fill_gaps {
        fill_gaps(reads, params.max_gap_size, min_freq2, &mut edges, &mut dict);
    }
    if params.do_join_overlaps {
        join_overlaps(reads, (k / 2) as u32, min_freq2, &mut edges, &mut dict);
    }

    let graph = Graph::assemble(&edges, k);
    info!(
        graph_edges = graph.edge_count(),
        vertices = graph.vertex_count(),
        "graph assembled"
    );

    let paths = path_reads(reads, quals, &dict, &edges, &graph);
    info!(paths = paths.len(), "reads pathed");
    Ok((graph, paths))
}
