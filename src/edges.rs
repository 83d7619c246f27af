//! Unitig edge construction.
//!
//! Walks the K-mer dictionary and contracts unambiguous chains into edges:
//! maximal unbranching paths emitted in canonical orientation, plus smooth
//! circles picked up by a single-threaded sweep afterwards. Each placed
//! K-mer records its edge id and offset; placing a K-mer twice means the
//! dictionary contexts are inconsistent and is a fatal invariant violation.
//!
//! A walk seeded at one end of a chain emits the canonical (FWD) sequence;
//! the mirror walk from the other end produces the reverse complement and
//! discards it, so every edge is appended exactly once.

use std::sync::{Mutex, PoisonError};

use tracing::info;

use crate::bases::{canonical_form_of, BaseVec, CanonicalForm};
use crate::context::KmerContext;
use crate::dict::{DictEntry, KmerDict};
use crate::kmer::Kmer;

/// Emits all edges for a dictionary whose entries are still null.
pub fn build_edges(dict: &KmerDict) -> Vec<BaseVec> {
    let k = dict.k();
    let edges = Mutex::new(Vec::new());

    dict.parallel_for_each_bucket(|slots| {
        let mut builder = EdgeBuilder::new(dict, &edges, k);
        for entry in slots.iter().filter_map(Option::as_ref) {
            if entry.is_null() {
                builder.build_edge(entry);
            }
        }
    });

    let (regular, regular_len) = {
        let edges = edges.lock().unwrap_or_else(PoisonError::into_inner);
        (edges.len(), edges.iter().map(BaseVec::len).sum::<usize>())
    };
    info!(edges = regular, total_length = regular_len, "built linear edges");

    // entries not yet placed must sit on smooth circles; the circle walk
    // mutates shared walk state and runs single-threaded
    let mut builder = EdgeBuilder::new(dict, &edges, k);
    for entry in dict.entries() {
        if entry.is_null() {
            builder.simple_circle(entry);
        }
    }

    let edges = edges.into_inner().unwrap_or_else(PoisonError::into_inner);
    let total_len: usize = edges.iter().map(BaseVec::len).sum();
    info!(
        circular_edges = edges.len() - regular,
        circular_length = total_len - regular_len,
        "built circular edges"
    );
    edges
}

/// Per-walk state for emitting one edge at a time.
struct EdgeBuilder<'a> {
    dict: &'a KmerDict,
    edges: &'a Mutex<Vec<BaseVec>>,
    k: usize,
    seq: BaseVec,
    entries: Vec<&'a DictEntry>,
}

impl<'a> EdgeBuilder<'a> {
    fn new(dict: &'a KmerDict, edges: &'a Mutex<Vec<BaseVec>>, k: usize) -> Self {
        Self {
            dict,
            edges,
            k,
            seq: BaseVec::new(),
            entries: Vec::new(),
        }
    }

    /// Classifies `entry` and emits its edge unless the walk should start
    /// elsewhere (interior K-mers) or the mirror walk owns the emission.
    fn build_edge(&mut self, entry: &'a DictEntry) {
        if self.is_palindromic(entry.kmer()) {
            self.make_single_kmer_edge(entry);
        } else if self.upstream_extension_possible(entry) {
            if self.downstream_extension_possible(entry) {
                return;
            }
            self.extend_upstream(entry);
        } else if self.downstream_extension_possible(entry) {
            self.extend_downstream(entry);
        } else {
            self.make_single_kmer_edge(entry);
        }
    }

    /// Palindrome test used to cut walks. For even K this is the K-mer
    /// itself; for odd K either (K-1)-sub-K-mer being palindromic cuts the
    /// walk.
    fn is_palindromic(&self, kmer: Kmer) -> bool {
        if kmer.len() % 2 == 0 {
            kmer.is_palindrome()
        } else {
            kmer.prefix().is_palindrome() || kmer.suffix().is_palindrome()
        }
    }

    /// Resolves a K-mer in either orientation, returning its entry and the
    /// context oriented to match the queried K-mer.
    fn lookup(&self, kmer: Kmer) -> (&'a DictEntry, KmerContext) {
        let (entry, rc) = if kmer.is_rev() {
            (self.dict.find_canonical(kmer.rc()), true)
        } else {
            (self.dict.find_canonical(kmer), false)
        };
        let entry = entry
            .unwrap_or_else(|| panic!("K-mer {kmer} referenced by a context is not in the dictionary"));
        let context = entry.context();
        (entry, if rc { context.rc() } else { context })
    }

    fn upstream_extension_possible(&self, entry: &DictEntry) -> bool {
        let context = entry.context();
        if context.predecessor_count() != 1 {
            return false;
        }
        let pred = entry.kmer().to_predecessor(context.single_predecessor());
        if self.is_palindromic(pred) {
            return false;
        }
        let (_, pred_context) = self.lookup(pred);
        pred_context.successor_count() == 1
    }

    fn downstream_extension_possible(&self, entry: &DictEntry) -> bool {
        let context = entry.context();
        if context.successor_count() != 1 {
            return false;
        }
        let succ = entry.kmer().to_successor(context.single_successor());
        if self.is_palindromic(succ) {
            return false;
        }
        let (_, succ_context) = self.lookup(succ);
        succ_context.predecessor_count() == 1
    }

    fn make_single_kmer_edge(&mut self, entry: &'a DictEntry) {
        self.seq = entry.kmer().codes().collect();
        self.entries.push(entry);
        self.add_edge();
    }

    fn extend_upstream(&mut self, entry: &'a DictEntry) {
        self.seq = entry.kmer().rc().codes().collect();
        self.entries.push(entry);
        self.extend(entry.kmer().rc(), entry.context().rc());
    }

    fn extend_downstream(&mut self, entry: &'a DictEntry) {
        self.seq = entry.kmer().codes().collect();
        self.entries.push(entry);
        self.extend(entry.kmer(), entry.context());
    }

    /// Walks unique successors until a branch, a palindrome, or a K-mer
    /// with more than one predecessor.
    fn extend(&mut self, kmer: Kmer, context: KmerContext) {
        let mut kmer = kmer;
        let mut context = context;
        while context.successor_count() == 1 {
            let succ = context.single_successor();
            let next = kmer.to_successor(succ);
            if self.is_palindromic(next) {
                break;
            }
            let (entry, next_context) = self.lookup(next);
            if next_context.predecessor_count() != 1 {
                break;
            }
            self.seq.push(succ);
            self.entries.push(entry);
            kmer = next;
            context = next_context;
        }
        match self.seq.canonical_form() {
            CanonicalForm::Palindrome => {
                assert_eq!(
                    self.seq.len(),
                    self.k,
                    "palindromic edge longer than one K-mer: {}",
                    self.seq
                );
                self.add_edge();
            }
            CanonicalForm::Fwd => self.add_edge(),
            CanonicalForm::Rev => {
                // the walk from the other endpoint emits this edge
                self.seq.clear();
                self.entries.clear();
            }
        }
    }

    /// Walks a smooth circle back to its starting entry, rotates it so the
    /// minimum K-mer leads, and emits it. Not thread-safe.
    fn simple_circle(&mut self, first: &'a DictEntry) {
        self.seq = first.kmer().codes().collect();
        self.entries.push(first);
        let mut context = first.context();
        let mut kmer = first.kmer();
        loop {
            if context.predecessor_count() != 1 || context.successor_count() != 1 {
                panic!(
                    "K-mer {kmer} on a smooth circle has in/out degree {}/{}",
                    context.predecessor_count(),
                    context.successor_count()
                );
            }
            let succ = context.single_successor();
            kmer = kmer.to_successor(succ);
            let (entry, next_context) = self.lookup(kmer);
            if std::ptr::eq(entry, first) {
                break;
            }
            if !entry.is_null() {
                panic!("failed to close circle: K-mer {} already placed", entry.kmer());
            }
            self.seq.push(succ);
            self.entries.push(entry);
            context = next_context;
        }
        self.canonicalize_circle();
        self.add_edge();
    }

    /// Rotates the circular sequence so its minimum K-mer sits at offset 0,
    /// reverse-complementing first if that placement reads in REV form.
    fn canonicalize_circle(&mut self) {
        let k = self.k;
        let mut idx = 0;
        for i in 1..self.entries.len() {
            if self.entries[i].kmer() < self.entries[idx].kmer() {
                idx = i;
            }
        }
        if canonical_form_of(&self.seq.as_slice()[idx..idx + k]) == CanonicalForm::Rev {
            self.seq.reverse_complement();
            self.entries.reverse();
            idx = self.seq.len() - idx - k;
        }
        if idx == 0 {
            return;
        }
        let slice = self.seq.as_slice();
        // circle sequences wrap: the first K-1 bases repeat at the tail
        debug_assert_eq!(&slice[..k - 1], &slice[slice.len() - (k - 1)..]);
        let mut rotated = BaseVec::with_capacity(slice.len());
        rotated.extend_from_slice(&slice[idx..]);
        rotated.extend_from_slice(&slice[k - 1..k - 1 + idx]);
        self.seq = rotated;
        self.entries.rotate_left(idx);
    }

    /// Appends the finished sequence under the writer lock and back-
    /// annotates every visited entry with its placement.
    fn add_edge(&mut self) {
        if self.seq.canonical_form() == CanonicalForm::Rev {
            self.seq.reverse_complement();
            self.entries.reverse();
        }
        #[cfg(debug_assertions)]
        for (offset, entry) in self.entries.iter().enumerate() {
            let window = &self.seq.as_slice()[offset..offset + self.k];
            let kmer = Kmer::from_codes(window);
            debug_assert!(
                kmer == entry.kmer() || kmer.rc() == entry.kmer(),
                "edge window at offset {offset} does not match entry {}",
                entry.kmer()
            );
        }

        let edge_id = {
            let mut edges = self.edges.lock().unwrap_or_else(PoisonError::into_inner);
            let edge_id = edges.len() as u32;
            edges.push(std::mem::take(&mut self.seq));
            edge_id
        };
        for (offset, entry) in self.entries.drain(..).enumerate() {
            if let Err(existing) = entry.try_place(edge_id, offset as u32) {
                panic!(
                    "K-mer {} placed twice: on edge {}:{} and edge {edge_id}:{offset}",
                    entry.kmer(),
                    existing.edge_id,
                    existing.offset
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter;
    use bytes::Bytes;

    fn dict_from_reads(reads: &[&str], k: usize, min_freq: u32) -> KmerDict {
        let encoded: Vec<Bytes> = reads
            .iter()
            .map(|r| Bytes::from(BaseVec::from_dna(r).unwrap().into_inner()))
            .collect();
        let lens: Vec<u16> = encoded.iter().map(|r| r.len() as u16).collect();
        let dict = counter::count_into_dict(&encoded, &lens, k, min_freq, 1024, None).unwrap();
        dict.recompute_adjacencies();
        dict
    }

    fn edge_strings(edges: &[BaseVec]) -> Vec<String> {
        let mut strings: Vec<String> = edges.iter().map(BaseVec::to_string).collect();
        strings.sort();
        strings
    }

    #[test]
    fn single_chain_becomes_one_edge() {
        let dict = dict_from_reads(&["AAAACCCG", "AAAACCCG"], 4, 1);
        let edges = build_edges(&dict);
        assert_eq!(edge_strings(&edges), vec!["AAAACCCG"]);
    }

    #[test]
    fn every_kmer_placed_exactly_once() {
        let dict = dict_from_reads(&["AAAACCCG"], 4, 1);
        let edges = build_edges(&dict);
        for entry in dict.entries() {
            let placement = entry.placement().unwrap();
            let edge = &edges[placement.edge_id as usize];
            let window = Kmer::from_codes(
                &edge.as_slice()[placement.offset as usize..placement.offset as usize + 4],
            );
            assert!(window == entry.kmer() || window.rc() == entry.kmer());
        }
    }

    #[test]
    fn branch_point_splits_edges() {
        let dict = dict_from_reads(&["AAAACG", "AAAATG"], 4, 1);
        let edges = build_edges(&dict);
        assert_eq!(edge_strings(&edges), vec!["AAAA", "AAACG", "AAATG"]);
    }

    #[test]
    fn palindromic_kmers_form_single_kmer_edges() {
        let dict = dict_from_reads(&["ATATAT"], 4, 1);
        let edges = build_edges(&dict);
        assert_eq!(edge_strings(&edges), vec!["ATAT", "TATA"]);
        for edge in &edges {
            assert_eq!(edge.len(), 4);
        }
    }

    #[test]
    fn smooth_circle_is_emitted_with_min_kmer_first() {
        // circular sequence AACGG covered with wrap-around context
        let dict = dict_from_reads(&["AACGGAACG"], 4, 1);
        let edges = build_edges(&dict);
        assert_eq!(edge_strings(&edges), vec!["AACGGAAC"]);
        // wrap invariant: first K-1 bases repeat at the tail
        let edge = &edges[0];
        assert_eq!(
            &edge.as_slice()[..3],
            &edge.as_slice()[edge.len() - 3..]
        );
    }

    #[test]
    fn edges_are_never_rev_canonical() {
        let dict = dict_from_reads(&["AAAACCCG", "GGGTTACA", "CCATTTTG"], 4, 1);
        let edges = build_edges(&dict);
        for edge in &edges {
            assert_ne!(edge.canonical_form(), CanonicalForm::Rev, "edge {edge}");
        }
    }

    #[test]
    fn rebuild_after_null_entries_is_identical() {
        let dict = dict_from_reads(&["AAAACCCG", "AACGGTTA"], 4, 1);
        let first = edge_strings(&build_edges(&dict));
        dict.null_entries();
        let second = edge_strings(&build_edges(&dict));
        assert_eq!(first, second);
    }
}
