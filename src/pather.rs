//! Threading reads back through the edge graph.
//!
//! [`Pather::path`] decomposes a read into path parts: located segments on
//! edges (offsets and lengths in K-mers) separated by gaps. [`path_reads`]
//! then applies the per-read cleanup policy — hanging-edge seed demotion,
//! gap coalescing, repair of inconsistent captured gaps, short-seed
//! trimming — converts the parts into a [`ReadPath`] over graph edge ids,
//! and finishes with a quality-weighted extension that resolves
//! unambiguous vertex exits at both ends of the path.

use bytes::Bytes;
use rayon::prelude::*;

use crate::bases::{complement, BaseVec};
use crate::dict::KmerDict;
use crate::graph::Graph;
use crate::kmer::Kmer;

/// Jitter tolerated by the repair pass's captured-gap conformity test.
const REPAIR_JITTER: u32 = 3;

/// Edges at most this many K-mers long are candidates for hanging-edge
/// seed demotion.
const HANGING_EDGE_MAX_KMERS: u32 = 100;

/// Trailing seeds that enter an edge at offset 0 and match at most this
/// many K-mers are backed off to gaps.
const SHORT_SEED_MAX_KMERS: u32 = 5;

/// Summed quality of mismatching bases a path extension may absorb before
/// a candidate edge is rejected.
const EXTENSION_MISMATCH_BUDGET: i32 = 20;

/// A location on a canonical edge: id, orientation, and K-mer offset in
/// that orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EdgeLoc {
    pub edge_id: u32,
    pub rc: bool,
    pub offset: u32,
}

/// One aligned piece of a read: either an unmatched gap or a located
/// segment on an edge. Segment offsets and lengths count K-mers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathPart {
    Gap {
        len: u32,
    },
    Seg {
        edge_id: u32,
        rc: bool,
        offset: u32,
        len: u32,
        edge_len: u32,
    },
}

impl PathPart {
    pub fn is_gap(&self) -> bool {
        matches!(self, PathPart::Gap { .. })
    }

    /// Length in K-mers (for segments) or bases (for gaps); both advance
    /// the read cursor by the same amount.
    pub fn len(&self) -> u32 {
        match *self {
            PathPart::Gap { len } | PathPart::Seg { len, .. } => len,
        }
    }

    fn incr_len(&mut self, extra: u32) {
        match self {
            PathPart::Gap { len } | PathPart::Seg { len, .. } => *len += extra,
        }
    }

    /// One past the last matched K-mer offset on the edge.
    fn end_offset(&self) -> u32 {
        match *self {
            PathPart::Gap { .. } => 0,
            PathPart::Seg { offset, len, .. } => offset + len,
        }
    }

    fn is_same_edge(&self, other: &PathPart) -> bool {
        match (*self, *other) {
            (
                PathPart::Seg {
                    edge_id: a, rc: ra, ..
                },
                PathPart::Seg {
                    edge_id: b, rc: rb, ..
                },
            ) => a == b && ra == rb,
            _ => false,
        }
    }

    /// Location of the first matched K-mer.
    pub fn first_loc(&self) -> EdgeLoc {
        match *self {
            PathPart::Seg {
                edge_id, rc, offset, ..
            } => EdgeLoc {
                edge_id,
                rc,
                offset,
            },
            PathPart::Gap { .. } => unreachable!("gap parts have no location"),
        }
    }

    /// Location of the last matched K-mer.
    pub fn last_loc(&self) -> EdgeLoc {
        match *self {
            PathPart::Seg {
                edge_id,
                rc,
                offset,
                len,
                ..
            } => EdgeLoc {
                edge_id,
                rc,
                offset: offset + len - 1,
            },
            PathPart::Gap { .. } => unreachable!("gap parts have no location"),
        }
    }

    /// The same segment viewed from the reverse-complement orientation.
    pub fn rc(&self) -> PathPart {
        match *self {
            PathPart::Gap { len } => PathPart::Gap { len },
            PathPart::Seg {
                edge_id,
                rc,
                offset,
                len,
                edge_len,
            } => PathPart::Seg {
                edge_id,
                rc: !rc,
                offset: edge_len - (offset + len),
                len,
                edge_len,
            },
        }
    }
}

/// Gap-length vs graph-distance consistency for a gap captured between two
/// located parts.
pub fn is_conforming_captured_gap(
    prev: &PathPart,
    gap_len: u32,
    next: &PathPart,
    max_jitter: u32,
) -> bool {
    let (PathPart::Seg {
        edge_len: prev_edge_len,
        ..
    }, PathPart::Seg {
        offset: next_offset, ..
    }) = (*prev, *next)
    else {
        return false;
    };
    let mut graph_dist = i64::from(next_offset) - i64::from(prev.end_offset());
    if !prev.is_same_edge(next) {
        graph_dist += i64::from(prev_edge_len);
    }
    (i64::from(gap_len) - graph_dist).abs() <= i64::from(max_jitter)
}

/// A read path: graph edge ids in read order, plus the base offset of the
/// read's start within the first edge (negative when the read starts with
/// a gap hanging off the edge).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadPath {
    pub offset: i32,
    pub edges: Vec<u32>,
}

/// Length of the equal prefix of two code slices.
fn match_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Length of the equal prefix of `read` against the reverse complement of
/// `edge`, starting at `rc_from` in reverse-complement coordinates.
fn match_len_rc(read: &[u8], edge: &[u8], rc_from: usize) -> usize {
    let mut n = 0;
    while n < read.len() && rc_from + n < edge.len() {
        if read[n] != complement(edge[edge.len() - 1 - (rc_from + n)]) {
            break;
        }
        n += 1;
    }
    n
}

/// Match length under a per-base quality budget: mismatches consume their
/// base's weight, and the walk stops once the budget is exhausted. Returns
/// the matched length and whether the budget survived.
fn fuzzy_match_len(a: &[u8], b: &[u8], weights: &[u8], mut budget: i32) -> (usize, bool) {
    let mut n = 0;
    while n < a.len() && n < b.len() && n < weights.len() {
        if a[n] != b[n] {
            budget -= i32::from(weights[n]);
        }
        if budget < 0 {
            return (n, false);
        }
        n += 1;
    }
    (n, true)
}

/// Greedy read-to-edge alignment over a dictionary and its edges.
pub struct Pather<'a> {
    dict: &'a KmerDict,
    edges: &'a [BaseVec],
    k: usize,
}

impl<'a> Pather<'a> {
    pub fn new(dict: &'a KmerDict, edges: &'a [BaseVec]) -> Self {
        Self {
            dict,
            edges,
            k: dict.k(),
        }
    }

    /// Decomposes a read into gaps and located segments.
    pub fn path(&self, read: &[u8]) -> Vec<PathPart> {
        let k = self.k;
        let mut parts = Vec::new();
        if read.len() < k {
            parts.push(PathPart::Gap {
                len: read.len() as u32,
            });
            return parts;
        }

        let mut itr = 0usize;
        let end = read.len() - k + 1;
        while itr < end {
            let mut kmer = Kmer::from_codes(&read[itr..itr + k]);
            let mut found = self.dict.find(kmer);
            if found.is_none() {
                let mut gap_len = 1u32;
                let mut itr2 = itr + k;
                itr += 1;
                while itr2 < read.len() {
                    kmer = kmer.to_successor(read[itr2]);
                    itr2 += 1;
                    found = self.dict.find(kmer);
                    if found.is_some() {
                        break;
                    }
                    gap_len += 1;
                    itr += 1;
                }
                parts.push(PathPart::Gap { len: gap_len });
            }
            if let Some(entry) = found {
                let placement = entry.placement().unwrap_or_else(|| {
                    panic!("K-mer {} is in the dictionary but on no edge", entry.kmer())
                });
                let edge = self.edges[placement.edge_id as usize].as_slice();
                let offset = placement.offset as usize;
                let window = &read[itr..itr + k];
                let (rc, seg_offset, len) = if window == &edge[offset..offset + k] {
                    let len = 1 + match_len(&read[itr + k..], &edge[offset + k..]);
                    (false, offset, len)
                } else {
                    debug_assert_eq!(
                        Kmer::from_codes(window),
                        Kmer::from_codes(&edge[offset..offset + k]).rc(),
                    );
                    let rc_end = edge.len() - offset;
                    let len = 1 + match_len_rc(&read[itr + k..], edge, rc_end);
                    (true, rc_end - k, len)
                };
                parts.push(PathPart::Seg {
                    edge_id: placement.edge_id,
                    rc,
                    offset: seg_offset as u32,
                    len: len as u32,
                    edge_len: (edge.len() - k + 1) as u32,
                });
                itr += len;
            }
        }
        parts
    }

    /// Two located parts can flank a captured gap when they sit on the same
    /// edge, or when their oriented terminal (K-1)-sub-K-mers agree.
    pub fn is_joinable(&self, a: &PathPart, b: &PathPart) -> bool {
        let (PathPart::Seg { edge_id: ea, .. }, PathPart::Seg { edge_id: eb, .. }) = (*a, *b)
        else {
            return false;
        };
        if ea == eb {
            return true;
        }
        self.terminal_cut(a) == self.terminal_cut(b)
    }

    /// The last (K-1) bases of the part's edge in the part's orientation.
    fn terminal_cut(&self, part: &PathPart) -> Kmer {
        let PathPart::Seg { edge_id, rc, .. } = *part else {
            unreachable!("gap parts have no edge")
        };
        let edge = self.edges[edge_id as usize].as_slice();
        if rc {
            Kmer::from_codes(&edge[..self.k - 1]).rc()
        } else {
            Kmer::from_codes(&edge[edge.len() - (self.k - 1)..])
        }
    }
}

/// Graph edge id of a located part, respecting orientation.
fn part_graph_id(part: &PathPart, graph: &Graph) -> u32 {
    let PathPart::Seg { edge_id, rc, .. } = *part else {
        unreachable!("gap parts have no edge")
    };
    if rc {
        graph.rev_id(edge_id)
    } else {
        graph.fwd_id(edge_id)
    }
}

/// Seeds on short dead-start edges whose far vertex rejoins denser graph
/// structure are unreliable; demote them to gaps.
fn is_hanging_seed(part: &PathPart, graph: &Graph) -> bool {
    let PathPart::Seg { edge_len, .. } = *part else {
        return false;
    };
    let graph_id = part_graph_id(part, graph);
    let head = graph.to_left(graph_id);
    let tail = graph.to_right(graph_id);
    graph.in_degree(head) == 0
        && graph.in_degree(tail) > 1
        && graph.out_degree(tail) > 0
        && edge_len <= HANGING_EDGE_MAX_KMERS
}

/// Converts a cleaned part list into a read path: gaps dropped, repeated
/// same-edge segments deduplicated, offset taken from the first located
/// part (or projected through a leading gap).
fn parts_to_read_path(parts: &[PathPart], graph: &Graph) -> ReadPath {
    let mut path = ReadPath::default();
    let mut last_seg: Option<&PathPart> = None;
    for part in parts {
        if part.is_gap() {
            continue;
        }
        if let Some(prev) = last_seg {
            if prev.is_same_edge(part) {
                continue;
            }
        }
        path.edges.push(part_graph_id(part, graph));
        last_seg = Some(part);
    }
    if path.edges.is_empty() {
        path.offset = 0;
    } else if let PathPart::Seg { offset, .. } = parts[0] {
        path.offset = offset as i32;
    } else {
        let lead_gap = parts[0].len() as i32;
        let PathPart::Seg { offset, .. } = parts[1] else {
            unreachable!("coalesced gaps cannot be adjacent")
        };
        path.offset = offset as i32 - lead_gap;
    }
    path
}

/// Read position at which the path's last edge ends, derived from the
/// offset and the K-1 overlaps between consecutive edges.
fn last_edge_end(path: &ReadPath, graph: &Graph) -> i64 {
    let k = graph.k() as i64;
    let mut start = -i64::from(path.offset);
    let mut end = start;
    for &edge_id in &path.edges {
        end = start + graph.edge(edge_id).len() as i64;
        start = end - (k - 1);
    }
    end
}

/// The same path against the reverse-complemented read. Applying this
/// twice returns the original path.
fn rc_path(path: &ReadPath, read_len: i64, graph: &Graph) -> ReadPath {
    ReadPath {
        offset: (last_edge_end(path, graph) - read_len) as i32,
        edges: path.edges.iter().rev().map(|&e| graph.inv(e)).collect(),
    }
}

/// Extends the path rightward while exactly one outgoing edge at the final
/// vertex matches the remaining read bases within the quality budget.
fn extend_right(path: &mut ReadPath, read: &[u8], qual: &[u8], graph: &Graph) {
    let k = graph.k();
    loop {
        let end = last_edge_end(path, graph);
        if end < 0 || end as usize >= read.len() {
            return;
        }
        let end = end as usize;
        let Some(&last) = path.edges.last() else {
            return;
        };
        let read_tail = &read[end..];
        let weights = &qual[end.min(qual.len())..];

        let mut viable = 0u32;
        let mut best: Option<u32> = None;
        let mut best_len = 0usize;
        for &candidate in graph.out_edges(graph.to_right(last)) {
            let codes = graph.edge(candidate).as_slice();
            let (len, ok) =
                fuzzy_match_len(read_tail, &codes[k - 1..], weights, EXTENSION_MISMATCH_BUDGET);
            if ok {
                viable += 1;
                if best.is_none() || len > best_len {
                    best = Some(candidate);
                    best_len = len;
                }
            }
        }
        match (viable, best) {
            (1, Some(edge_id)) => path.edges.push(edge_id),
            _ => return,
        }
    }
}

/// Quality-aware left/right extension of a finished read path.
fn attempt_left_right_extension(path: &mut ReadPath, read: &[u8], qual: &[u8], graph: &Graph) {
    if path.edges.is_empty() {
        return;
    }
    extend_right(path, read, qual, graph);

    let read_len = read.len() as i64;
    let rc_read: Vec<u8> = read.iter().rev().map(|&c| complement(c)).collect();
    let rc_qual: Vec<u8> = qual.iter().rev().copied().collect();
    let mut mirrored = rc_path(path, read_len, graph);
    extend_right(&mut mirrored, &rc_read, &rc_qual, graph);
    *path = rc_path(&mirrored, read_len, graph);
}

/// Paths one read end to end: align, demote hanging seeds, coalesce gaps,
/// repair inconsistent captured gaps, trim weak trailing seeds, convert,
/// extend.
fn path_one_read(pather: &Pather<'_>, read: &[u8], qual: &[u8], graph: &Graph) -> ReadPath {
    let raw = pather.path(read);

    // hanging-edge demotion and gap coalescing in one pass
    let mut parts: Vec<PathPart> = Vec::with_capacity(raw.len());
    for mut part in raw {
        if is_hanging_seed(&part, graph) {
            part = PathPart::Gap { len: part.len() };
        }
        if part.is_gap() {
            if let Some(last) = parts.last_mut() {
                if last.is_gap() {
                    last.incr_len(part.len());
                    continue;
                }
            }
        }
        parts.push(part);
    }

    // first inconsistent internal captured gap: drop the offending seed and
    // everything after it (or absorb the tail into the gap when only one
    // seed precedes it)
    if parts.len() >= 3 {
        let mut seeds = u32::from(!parts[0].is_gap());
        let mut i = 1;
        while i + 1 < parts.len() {
            if !parts[i].is_gap() {
                seeds += 1;
                i += 1;
                continue;
            }
            let consistent = is_conforming_captured_gap(
                &parts[i - 1],
                parts[i].len(),
                &parts[i + 1],
                REPAIR_JITTER,
            ) && pather.is_joinable(&parts[i - 1], &parts[i + 1]);
            if !consistent {
                if seeds > 1 {
                    let absorbed: u32 = parts[i - 1..].iter().map(PathPart::len).sum();
                    parts.truncate(i - 1);
                    parts.push(PathPart::Gap { len: absorbed });
                } else {
                    let absorbed: u32 = parts[i..].iter().map(PathPart::len).sum();
                    parts.truncate(i);
                    parts.push(PathPart::Gap { len: absorbed });
                }
                break;
            }
            i += 1;
        }
    }

    // a trailing seed that only just entered an edge is weak evidence; back
    // it off and let extension re-add it if the qualities support it. A
    // read whose sole part is a located segment keeps it.
    if parts.len() > 1 {
        let n = parts.len();
        if parts[n - 1].is_gap() {
            if let PathPart::Seg { offset: 0, len, .. } = parts[n - 2] {
                if len <= SHORT_SEED_MAX_KMERS {
                    let total = parts[n - 1].len() + len;
                    parts.truncate(n - 2);
                    parts.push(PathPart::Gap { len: total });
                }
            }
        } else if let PathPart::Seg { offset: 0, len, .. } = parts[n - 1] {
            if len <= SHORT_SEED_MAX_KMERS {
                parts[n - 1] = PathPart::Gap { len };
            }
        }
    }

    let mut path = parts_to_read_path(&parts, graph);
    attempt_left_right_extension(&mut path, read, qual, graph);
    path
}

/// Paths every read in parallel. The dictionary and edges are read-only
/// throughout.
pub fn path_reads(
    reads: &[Bytes],
    quals: &[Bytes],
    dict: &KmerDict,
    edges: &[BaseVec],
    graph: &Graph,
) -> Vec<ReadPath> {
    assert_eq!(reads.len(), quals.len());
    let pather = Pather::new(dict, edges);
    reads
        .par_iter()
        .zip(quals.par_iter())
        .map(|(read, qual)| path_one_read(&pather, read, qual, graph))
        .collect()
}
