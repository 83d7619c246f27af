//! The bidirected edge graph.
//!
//! Canonical edges are materialised into a flat edge arena together with
//! their reverse complements, so the external id space is symmetric: the
//! involution array maps every edge to its mirror (palindromic edges
//! self-map). Vertices are the (K-1)-mer cuts at edge boundaries, kept in
//! a dense arena keyed by the exact (K-1)-mer; a canonical vertex pair
//! therefore appears as two vertices related through the involution.

use rustc_hash::FxHashMap;

use crate::bases::{BaseVec, CanonicalForm};
use crate::kmer::Kmer;

/// A bidirected de Bruijn graph over base-sequence edges.
#[derive(Debug)]
pub struct Graph {
    edges: Vec<BaseVec>,
    inv: Vec<u32>,
    to_left: Vec<u32>,
    to_right: Vec<u32>,
    out_edges: Vec<Vec<u32>>,
    in_edges: Vec<Vec<u32>>,
    fwd_ids: Vec<u32>,
    rev_ids: Vec<u32>,
    k: usize,
}

impl Graph {
    /// Materialises canonical edges into the doubled representation.
    pub fn assemble(canonical_edges: &[BaseVec], k: usize) -> Self {
        let mut edges: Vec<BaseVec> = Vec::with_capacity(canonical_edges.len() * 2);
        let mut inv = Vec::with_capacity(canonical_edges.len() * 2);
        let mut fwd_ids = Vec::with_capacity(canonical_edges.len());
        let mut rev_ids = Vec::with_capacity(canonical_edges.len());

        for edge in canonical_edges {
            let fwd_id = edges.len() as u32;
            fwd_ids.push(fwd_id);
            if edge.canonical_form() == CanonicalForm::Palindrome {
                edges.push(edge.clone());
                inv.push(fwd_id);
                rev_ids.push(fwd_id);
            } else {
                edges.push(edge.clone());
                edges.push(edge.rc());
                inv.push(fwd_id + 1);
                inv.push(fwd_id);
                rev_ids.push(fwd_id + 1);
            }
        }

        let mut vertex_ids: FxHashMap<Kmer, u32> = FxHashMap::default();
        let mut vertex_of = |cut: Kmer| -> u32 {
            let next = vertex_ids.len() as u32;
            *vertex_ids.entry(cut).or_insert(next)
        };
        let mut to_left = Vec::with_capacity(edges.len());
        let mut to_right = Vec::with_capacity(edges.len());
        for edge in &edges {
            let codes = edge.as_slice();
            to_left.push(vertex_of(Kmer::from_codes(&codes[..k - 1])));
            to_right.push(vertex_of(Kmer::from_codes(&codes[codes.len() - (k - 1)..])));
        }

        let vertex_count = vertex_ids.len();
        let mut out_edges = vec![Vec::new(); vertex_count];
        let mut in_edges = vec![Vec::new(); vertex_count];
        for edge_id in 0..edges.len() as u32 {
            out_edges[to_left[edge_id as usize] as usize].push(edge_id);
            in_edges[to_right[edge_id as usize] as usize].push(edge_id);
        }

        Self {
            edges,
            inv,
            to_left,
            to_right,
            out_edges,
            in_edges,
            fwd_ids,
            rev_ids,
            k,
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn vertex_count(&self) -> usize {
        self.out_edges.len()
    }

    pub fn edge(&self, edge_id: u32) -> &BaseVec {
        &self.edges[edge_id as usize]
    }

    /// The reverse-complement mirror of an edge.
    pub fn inv(&self, edge_id: u32) -> u32 {
        self.inv[edge_id as usize]
    }

    /// The full involution array.
    pub fn involution(&self) -> &[u32] {
        &self.inv
    }

    /// Source vertex (the first K-1 bases) of an edge.
    pub fn to_left(&self, edge_id: u32) -> u32 {
        self.to_left[edge_id as usize]
    }

    /// Target vertex (the last K-1 bases) of an edge.
    pub fn to_right(&self, edge_id: u32) -> u32 {
        self.to_right[edge_id as usize]
    }

    pub fn out_edges(&self, vertex: u32) -> &[u32] {
        &self.out_edges[vertex as usize]
    }

    pub fn in_edges(&self, vertex: u32) -> &[u32] {
        &self.in_edges[vertex as usize]
    }

    pub fn in_degree(&self, vertex: u32) -> usize {
        self.in_edges[vertex as usize].len()
    }

    pub fn out_degree(&self, vertex: u32) -> usize {
        self.out_edges[vertex as usize].len()
    }

    /// Graph edge id of a canonical edge read forward.
    pub fn fwd_id(&self, canonical_id: u32) -> u32 {
        self.fwd_ids[canonical_id as usize]
    }

    /// Graph edge id of a canonical edge read reverse-complemented.
    pub fn rev_id(&self, canonical_id: u32) -> u32 {
        self.rev_ids[canonical_id as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(dna: &str) -> BaseVec {
        BaseVec::from_dna(dna).unwrap()
    }

    #[test]
    fn linear_edge_gets_a_mirror() {
        let graph = Graph::assemble(&[seq("AAAACCCG")], 4);
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.edge(0).to_string(), "AAAACCCG");
        assert_eq!(graph.edge(1).to_string(), "CGGGTTTT");
        assert_eq!(graph.inv(0), 1);
        assert_eq!(graph.inv(1), 0);
        assert_eq!(graph.fwd_id(0), 0);
        assert_eq!(graph.rev_id(0), 1);
    }

    #[test]
    fn involution_is_self_inverse() {
        let graph = Graph::assemble(&[seq("AAAACCCG"), seq("ATAT"), seq("AAACG")], 4);
        for edge_id in 0..graph.edge_count() as u32 {
            assert_eq!(graph.inv(graph.inv(edge_id)), edge_id);
        }
    }

    #[test]
    fn palindromic_edge_self_maps() {
        let graph = Graph::assemble(&[seq("ATAT")], 4);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.inv(0), 0);
        assert_eq!(graph.fwd_id(0), graph.rev_id(0));
    }

    #[test]
    fn shared_cuts_collapse_to_one_vertex() {
        // AAAA ends at AAA; AAACG starts at AAA
        let graph = Graph::assemble(&[seq("AAAA"), seq("AAACG"), seq("AAATG")], 4);
        let trunk_tail = graph.to_right(graph.fwd_id(0));
        let branch_head = graph.to_left(graph.fwd_id(1));
        let other_branch_head = graph.to_left(graph.fwd_id(2));
        assert_eq!(trunk_tail, branch_head);
        assert_eq!(branch_head, other_branch_head);
        assert_eq!(graph.out_degree(trunk_tail), 3); // AAAA loops plus two branches
        assert_eq!(graph.in_degree(trunk_tail), 1); // AAAA comes in
    }

    #[test]
    fn degrees_count_mirrored_edges_separately() {
        let graph = Graph::assemble(&[seq("AAAACCCG")], 4);
        let head = graph.to_left(0);
        let tail = graph.to_right(0);
        assert_eq!(graph.out_degree(head), 1);
        assert_eq!(graph.in_degree(tail), 1);
        // the mirror edge has its own cuts
        let rc_head = graph.to_left(1);
        assert_eq!(graph.out_degree(rc_head), 1);
        assert_ne!(head, rc_head);
    }
}
