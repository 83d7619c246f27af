//! Neighbour context for canonical K-mers.
//!
//! A [`KmerContext`] records which bases were observed immediately before
//! and after occurrences of a K-mer: a 4-bit predecessor mask in the high
//! nibble and a 4-bit successor mask in the low nibble. Union over
//! occurrences is bitwise OR, and the whole context fits the single `kc`
//! byte of the packed count record.

use std::ops::{BitOr, BitOrAssign};

/// Reverses a 4-bit base mask, remapping each bit b to bit 3-b.
///
/// Under the 2-bit encoding this is exactly the A<->T, C<->G complement of
/// the base set.
#[inline]
fn complement_mask(mask: u8) -> u8 {
    ((mask & 1) << 3) | ((mask & 2) << 1) | ((mask & 4) >> 1) | ((mask & 8) >> 3)
}

/// Predecessor/successor base sets observed around a canonical K-mer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KmerContext(u8);

impl KmerContext {
    /// A context with no observed neighbours.
    pub fn empty() -> Self {
        Self(0)
    }

    /// Context of a read's first K-mer: one successor, no predecessors.
    pub fn initial(succ: u8) -> Self {
        debug_assert!(succ < 4);
        Self(1 << succ)
    }

    /// Context of a read's last K-mer: one predecessor, no successors.
    pub fn terminal(pred: u8) -> Self {
        debug_assert!(pred < 4);
        Self(0x10 << pred)
    }

    /// Context of an interior K-mer: one predecessor and one successor.
    pub fn flanked(pred: u8, succ: u8) -> Self {
        debug_assert!(pred < 4 && succ < 4);
        Self((0x10 << pred) | (1 << succ))
    }

    pub fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u8 {
        self.0
    }

    /// The 4-bit predecessor mask.
    pub fn predecessors(self) -> u8 {
        self.0 >> 4
    }

    /// The 4-bit successor mask.
    pub fn successors(self) -> u8 {
        self.0 & 0x0f
    }

    pub fn predecessor_count(self) -> u32 {
        self.predecessors().count_ones()
    }

    pub fn successor_count(self) -> u32 {
        self.successors().count_ones()
    }

    /// The unique predecessor base. Meaningful only when
    /// `predecessor_count() == 1`.
    pub fn single_predecessor(self) -> u8 {
        debug_assert_eq!(self.predecessor_count(), 1);
        self.predecessors().trailing_zeros() as u8
    }

    /// The unique successor base. Meaningful only when
    /// `successor_count() == 1`.
    pub fn single_successor(self) -> u8 {
        debug_assert_eq!(self.successor_count(), 1);
        self.successors().trailing_zeros() as u8
    }

    /// The context of the reverse-complement K-mer: the masks swap roles
    /// after each is complemented.
    pub fn rc(self) -> Self {
        Self((complement_mask(self.successors()) << 4) | complement_mask(self.predecessors()))
    }
}

impl BitOr for KmerContext {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for KmerContext {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}
