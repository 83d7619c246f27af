//! Graph repair passes: gap filling and overlap joining.
//!
//! Both passes re-path every read against the current edge set, harvest
//! residual evidence from the gaps, and rebuild the dictionary's edges.
//! [`fill_gaps`] recovers K-mers that fell under the primary frequency
//! threshold inside small non-conforming captured gaps; [`join_overlaps`]
//! confirms short overlaps between edge ends and splices them with
//! synthetic reads. Either pass invalidates all prior edge ids.

use bytes::Bytes;
use rayon::prelude::*;
use tracing::info;

use crate::bases::{complement, BaseVec};
use crate::context::KmerContext;
use crate::counter::{collapse_records, push_read_records};
use crate::dict::KmerDict;
use crate::edges::build_edges;
use crate::kmer::Kmer;
use crate::pather::{is_conforming_captured_gap, EdgeLoc, PathPart, Pather};
use crate::record::CountRecord;

/// Jitter tolerated when deciding whether a captured gap already fits the
/// graph.
const GAP_FILL_JITTER: u32 = 1;

/// Recovers under-threshold K-mers from non-conforming captured gaps and
/// rebuilds the edges.
///
/// Gap K-mers observed at least `min_freq` times across all reads are
/// inserted into the dictionary (contexts merge into pre-existing
/// entries); the flanking K-mers already in the dictionary get the linking
/// context bits ORed in atomically during the scan.
pub fn fill_gaps(
    reads: &[Bytes],
    max_gap_size: u32,
    min_freq: u32,
    edges: &mut Vec<BaseVec>,
    dict: &mut KmerDict,
) {
    let mut records: Vec<CountRecord> = {
        let edges: &[BaseVec] = edges;
        let dict: &KmerDict = dict;
        let pather = Pather::new(dict, edges);
        reads
            .par_iter()
            .flat_map_iter(|read| gap_records(&pather, dict, read, max_gap_size))
            .collect()
    };

    records.par_sort_unstable_by_key(|r| r.kmer);
    collapse_records(&mut records);

    let mut inserted = 0usize;
    for record in &records {
        if u32::from(record.count) >= min_freq {
            dict.insert(record.kmer, record.context);
            inserted += 1;
        }
    }
    info!(
        candidates = records.len(),
        inserted, min_freq, "gap filling recovered K-mers"
    );

    dict.null_entries();
    dict.recompute_adjacencies();
    *edges = build_edges(dict);
}

/// Emits count records for the K-mers spanning each repairable gap of one
/// read.
fn gap_records(
    pather: &Pather<'_>,
    dict: &KmerDict,
    read: &[u8],
    max_gap_size: u32,
) -> Vec<CountRecord> {
    let k = dict.k();
    let mut out = Vec::new();
    let parts = pather.path(read);
    if parts.len() < 3 {
        return out;
    }

    let mut rpos = parts[0].len() as usize;
    for i in 1..parts.len() - 1 {
        let part = &parts[i];
        if !part.is_gap()
            || (max_gap_size > 0 && part.len() > max_gap_size)
            || is_conforming_captured_gap(&parts[i - 1], part.len(), &parts[i + 1], GAP_FILL_JITTER)
        {
            rpos += part.len() as usize;
            continue;
        }

        // the gap holds new, interesting K-mers: re-extract them from the
        // raw read, linking through the flanking K-mers already present
        let gap_len = part.len() as usize;
        let start = rpos - 1;
        let mut kmer = Kmer::from_codes(&read[start..start + k]);
        let mut idx = start + k;
        dict.apply_canonical(kmer, KmerContext::initial(read[idx]));
        let last = idx + gap_len;
        while idx < last {
            let pred = kmer.front();
            kmer = kmer.to_successor(read[idx]);
            idx += 1;
            let context = KmerContext::flanked(pred, read[idx]);
            let (canonical, was_rc) = kmer.canonicalize();
            out.push(CountRecord::new(
                canonical,
                if was_rc { context.rc() } else { context },
                1,
            ));
        }
        let context = KmerContext::terminal(kmer.front());
        kmer = kmer.to_successor(read[idx]);
        dict.apply_canonical(kmer, context);

        rpos += gap_len;
    }
    out
}

/// A directed overlap observation between two edge locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Join {
    loc1: EdgeLoc,
    loc2: EdgeLoc,
    overlap: u32,
}

/// Confirms short overlaps captured between edge ends and splices them by
/// re-processing synthetic 2K-base reads, then rebuilds the edges.
///
/// `max_gap_size` must be smaller than K-1 so every join has a positive
/// overlap; the pipeline passes K/2.
pub fn join_overlaps(
    reads: &[Bytes],
    max_gap_size: u32,
    min_freq: u32,
    edges: &mut Vec<BaseVec>,
    dict: &mut KmerDict,
) {
    let k = dict.k();
    assert!((max_gap_size as usize) < k - 1);

    let mut joins: Vec<Join> = {
        let edges: &[BaseVec] = edges;
        let pather = Pather::new(dict, edges);
        reads
            .par_iter()
            .flat_map_iter(|read| join_candidates(&pather, read, k, max_gap_size))
            .collect()
    };
    joins.par_sort_unstable();

    let mut fake_reads: Vec<Bytes> = Vec::new();
    let mut i = 0;
    while i < joins.len() {
        let join = joins[i];
        let mut run = 1usize;
        while i + run < joins.len() && joins[i + run] == join {
            run += 1;
        }
        i += run;

        if !valid_overlap(&join, edges, k) {
            panic!(
                "overlap join bases disagree: {:?} <-{}-> {:?}",
                join.loc1, join.overlap, join.loc2
            );
        }
        if run as u32 >= min_freq {
            let mut fake = BaseVec::with_capacity(2 * k);
            append_loc(&mut fake, edges, &join.loc1, 0, k);
            append_loc(&mut fake, edges, &join.loc2, join.overlap as usize, k);
            fake_reads.push(Bytes::from(fake.into_inner()));
        }
    }
    info!(joins = joins.len(), confirmed = fake_reads.len(), "overlap joining");

    if fake_reads.is_empty() {
        return;
    }
    dict.null_entries();
    let mut records = Vec::new();
    for fake in &fake_reads {
        push_read_records(&mut records, fake, fake.len(), k);
    }
    for record in records {
        dict.insert(record.kmer, record.context);
    }
    *edges = build_edges(dict);
}

/// Join records for every small captured gap of one read, canonicalised so
/// the smaller edge id leads.
fn join_candidates(pather: &Pather<'_>, read: &[u8], k: usize, max_gap_size: u32) -> Vec<Join> {
    let mut out = Vec::new();
    let parts = pather.path(read);
    if parts.len() < 3 {
        return out;
    }
    for i in 1..parts.len() - 1 {
        let part = &parts[i];
        if !part.is_gap() || part.len() > max_gap_size {
            continue;
        }
        let prev = &parts[i - 1];
        let next = &parts[i + 1];
        let overlap = k as u32 - part.len() - 1;
        let (PathPart::Seg { edge_id: prev_id, .. }, PathPart::Seg { edge_id: next_id, .. }) =
            (*prev, *next)
        else {
            continue;
        };
        let join = if next_id < prev_id {
            Join {
                loc1: next.rc().last_loc(),
                loc2: prev.rc().first_loc(),
                overlap,
            }
        } else {
            Join {
                loc1: prev.last_loc(),
                loc2: next.first_loc(),
                overlap,
            }
        };
        out.push(join);
    }
    out
}

/// Base at oriented position `pos` of an edge.
fn oriented_base(edge: &[u8], rc: bool, pos: usize) -> u8 {
    if rc {
        complement(edge[edge.len() - 1 - pos])
    } else {
        edge[pos]
    }
}

/// The last `overlap` bases of loc1's K-base window must equal the first
/// `overlap` bases of loc2's.
fn valid_overlap(join: &Join, edges: &[BaseVec], k: usize) -> bool {
    let e1 = edges[join.loc1.edge_id as usize].as_slice();
    let e2 = edges[join.loc2.edge_id as usize].as_slice();
    let overlap = join.overlap as usize;
    (0..overlap).all(|i| {
        oriented_base(e1, join.loc1.rc, join.loc1.offset as usize + k - overlap + i)
            == oriented_base(e2, join.loc2.rc, join.loc2.offset as usize + i)
    })
}

/// Appends `K - indent` oriented bases of an edge location, skipping the
/// first `indent`.
fn append_loc(fake: &mut BaseVec, edges: &[BaseVec], loc: &EdgeLoc, indent: usize, k: usize) {
    let edge = edges[loc.edge_id as usize].as_slice();
    let offset = loc.offset as usize + indent;
    for i in 0..k - indent {
        fake.push(oriented_base(edge, loc.rc, offset + i));
    }
}
