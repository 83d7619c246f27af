//! The canonical K-mer dictionary.
//!
//! An open-addressed (linear probe, power-of-two capacity) hash set keyed
//! by canonical K-mer. Each entry carries two atomically updatable words:
//! the neighbour-context byte, and a packed edge placement
//! (`edge_id`, `offset`, or null while the entry has not been placed on an
//! edge). Bulk load is single-threaded; lookups, context ORs and placement
//! transitions are safe under shared references, which is what the parallel
//! edge builder and the gap-filling map phase rely on.
//!
//! Placement uses a compare-exchange from the null word, so two walks
//! claiming the same K-mer are detected exactly rather than racing.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use rayon::prelude::*;
use rustc_hash::FxHasher;

use crate::context::KmerContext;
use crate::kmer::Kmer;

const NULL_KDEF: u64 = u64::MAX;

/// Number of slots handed to each closure invocation of
/// [`KmerDict::parallel_for_each_bucket`].
const BUCKET_GROUP: usize = 1024;

/// Where a K-mer sits on an edge: edge id and K-mer offset within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgePlacement {
    pub edge_id: u32,
    pub offset: u32,
}

/// One dictionary entry: a canonical K-mer plus its mutable state.
#[derive(Debug)]
pub struct DictEntry {
    kmer: Kmer,
    context: AtomicU8,
    kdef: AtomicU64,
}

impl DictEntry {
    fn new(kmer: Kmer, context: KmerContext) -> Self {
        Self {
            kmer,
            context: AtomicU8::new(context.raw()),
            kdef: AtomicU64::new(NULL_KDEF),
        }
    }

    pub fn kmer(&self) -> Kmer {
        self.kmer
    }

    pub fn context(&self) -> KmerContext {
        KmerContext::from_raw(self.context.load(Ordering::Relaxed))
    }

    /// Atomically ORs additional context evidence into this entry.
    pub fn or_context(&self, context: KmerContext) {
        self.context.fetch_or(context.raw(), Ordering::Relaxed);
    }

    fn set_context(&self, context: KmerContext) {
        self.context.store(context.raw(), Ordering::Relaxed);
    }

    /// True while the entry has not been placed on any edge.
    pub fn is_null(&self) -> bool {
        self.kdef.load(Ordering::Relaxed) == NULL_KDEF
    }

    /// The edge placement, if the entry has been placed.
    pub fn placement(&self) -> Option<EdgePlacement> {
        match self.kdef.load(Ordering::Relaxed) {
            NULL_KDEF => None,
            packed => Some(EdgePlacement {
                edge_id: (packed >> 32) as u32,
                offset: packed as u32,
            }),
        }
    }

    /// Transitions null -> placed. On failure returns the placement that
    /// already owns the entry, which the edge builder treats as a fatal
    /// invariant violation.
    pub fn try_place(&self, edge_id: u32, offset: u32) -> Result<(), EdgePlacement> {
        let packed = (u64::from(edge_id) << 32) | u64::from(offset);
        match self
            .kdef
            .compare_exchange(NULL_KDEF, packed, Ordering::Relaxed, Ordering::Relaxed)
        {
            Ok(_) => Ok(()),
            Err(existing) => Err(EdgePlacement {
                edge_id: (existing >> 32) as u32,
                offset: existing as u32,
            }),
        }
    }

    fn clear_placement(&self) {
        self.kdef.store(NULL_KDEF, Ordering::Relaxed);
    }
}

fn hash_kmer(kmer: Kmer) -> u64 {
    let mut hasher = FxHasher::default();
    kmer.hash(&mut hasher);
    hasher.finish()
}

/// Open-addressed hash set over canonical K-mers.
#[derive(Debug)]
pub struct KmerDict {
    slots: Vec<Option<DictEntry>>,
    mask: usize,
    len: usize,
    k: usize,
}

impl KmerDict {
    /// Creates a dictionary sized for `expected` entries of length `k`.
    pub fn with_capacity(expected: usize, k: usize) -> Self {
        let capacity = (expected.max(8) * 4 / 3 + 1).next_power_of_two();
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            mask: capacity - 1,
            len: 0,
            k,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Probe position of `kmer`: its slot if present, otherwise the empty
    /// slot where it would be inserted.
    fn probe(&self, kmer: Kmer) -> usize {
        let mut idx = (hash_kmer(kmer) as usize) & self.mask;
        loop {
            match &self.slots[idx] {
                Some(entry) if entry.kmer == kmer => return idx,
                Some(_) => idx = (idx + 1) & self.mask,
                None => return idx,
            }
        }
    }

    /// Inserts a canonical K-mer during bulk load. Not thread-safe.
    ///
    /// The K-mer is assumed absent; inserting a duplicate ORs the context
    /// into the existing entry instead.
    pub fn insert(&mut self, kmer: Kmer, context: KmerContext) {
        debug_assert!(!kmer.is_rev(), "dictionary keys must be canonical");
        if (self.len + 1) * 4 > self.slots.len() * 3 {
            self.grow();
        }
        let idx = self.probe(kmer);
        match &self.slots[idx] {
            Some(entry) => entry.or_context(context),
            None => {
                self.slots[idx] = Some(DictEntry::new(kmer, context));
                self.len += 1;
            }
        }
    }

    fn grow(&mut self) {
        let new_capacity = self.slots.len() * 2;
        let old: Vec<Option<DictEntry>> = std::mem::replace(
            &mut self.slots,
            (0..new_capacity).map(|_| None).collect(),
        );
        self.mask = new_capacity - 1;
        for entry in old.into_iter().flatten() {
            let idx = self.probe(entry.kmer);
            debug_assert!(self.slots[idx].is_none());
            self.slots[idx] = Some(entry);
        }
    }

    /// Looks up a K-mer in either orientation. Thread-safe for reads.
    pub fn find(&self, kmer: Kmer) -> Option<&DictEntry> {
        let (canonical, _) = kmer.canonicalize();
        self.find_canonical(canonical)
    }

    /// Looks up a K-mer that is already canonical.
    pub fn find_canonical(&self, kmer: Kmer) -> Option<&DictEntry> {
        debug_assert!(!kmer.is_rev());
        self.slots[self.probe(kmer)].as_ref()
    }

    /// Atomically ORs `context` into the entry for a K-mer known to be
    /// present (in either orientation). Returns false when the K-mer is
    /// absent.
    pub fn apply_canonical(&self, kmer: Kmer, context: KmerContext) -> bool {
        let (canonical, was_rc) = kmer.canonicalize();
        match self.find_canonical(canonical) {
            Some(entry) => {
                entry.or_context(if was_rc { context.rc() } else { context });
                true
            }
            None => false,
        }
    }

    /// Clears every entry's edge placement back to null.
    pub fn null_entries(&self) {
        for entry in self.entries() {
            entry.clear_placement();
        }
    }

    /// Rescans all entries, dropping neighbour bits whose neighbouring
    /// K-mer is no longer in the dictionary.
    ///
    /// Runs as a parallel pure compute pass followed by a store pass, so
    /// entries are never read half-updated.
    pub fn recompute_adjacencies(&self) {
        let normalized: Vec<Option<u8>> = self
            .slots
            .par_iter()
            .map(|slot| {
                let entry = slot.as_ref()?;
                let context = entry.context();
                let mut pred_mask = 0u8;
                let mut succ_mask = 0u8;
                for base in 0..4u8 {
                    if context.predecessors() & (1 << base) != 0
                        && self.find(entry.kmer.to_predecessor(base)).is_some()
                    {
                        pred_mask |= 1 << base;
                    }
                    if context.successors() & (1 << base) != 0
                        && self.find(entry.kmer.to_successor(base)).is_some()
                    {
                        succ_mask |= 1 << base;
                    }
                }
                Some((pred_mask << 4) | succ_mask)
            })
            .collect();

        self.slots
            .par_iter()
            .zip(normalized)
            .for_each(|(slot, raw)| {
                if let (Some(entry), Some(raw)) = (slot.as_ref(), raw) {
                    entry.set_context(KmerContext::from_raw(raw));
                }
            });
    }

    /// Invokes `f` on disjoint groups of slots in parallel.
    pub fn parallel_for_each_bucket<F>(&self, f: F)
    where
        F: Fn(&[Option<DictEntry>]) + Send + Sync,
    {
        self.slots.par_chunks(BUCKET_GROUP).for_each(|chunk| f(chunk));
    }

    /// Iterates all entries, single-threaded.
    pub fn entries(&self) -> impl Iterator<Item = &DictEntry> {
        self.slots.iter().filter_map(Option::as_ref)
    }
}
