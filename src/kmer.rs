//! Fixed-width packed K-mers.
//!
//! A [`Kmer`] packs up to 64 bases into a `u128`, two bits per base, with
//! base 0 in the two most significant bits. Numeric order on the packed
//! value therefore equals lexicographic order on the bases, and the two
//! exported 64-bit limbs sort the same way (`kdata[0]`, then `kdata[1]`),
//! which is the order of the packed record stream.
//!
//! K is fixed for a run ([`crate::DEFAULT_K`] = 60 for production builds);
//! each value carries its length so the same machinery can be driven at
//! small K in tests.

use std::cmp::Ordering;
use std::fmt;

use crate::bases::{Base, CanonicalForm};

/// Mask selecting the low bit of every 2-bit group.
const PAIR_LOW: u128 = 0x5555_5555_5555_5555_5555_5555_5555_5555;

/// A DNA K-mer packed two bits per base into a `u128`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Kmer {
    bits: u128,
    len: u8,
}

impl Kmer {
    /// Builds a K-mer from a slice of 2-bit base codes.
    ///
    /// Supports lengths 1..=64.
    pub fn from_codes(codes: &[u8]) -> Self {
        debug_assert!(!codes.is_empty() && codes.len() <= 64);
        let mut bits = 0u128;
        for &code in codes {
            debug_assert!(code < 4);
            bits = (bits << 2) | u128::from(code);
        }
        let len = codes.len() as u8;
        Self {
            bits: bits << (128 - 2 * u32::from(len)),
            len,
        }
    }

    /// Reconstructs a K-mer from its two 64-bit limbs.
    pub fn from_limbs(limbs: [u64; 2], len: usize) -> Self {
        debug_assert!(len >= 1 && len <= 64);
        Self {
            bits: (u128::from(limbs[0]) << 64) | u128::from(limbs[1]),
            len: len as u8,
        }
    }

    /// The two 64-bit limbs of the packed representation, most significant
    /// first. Sorting by `limbs()[0]` then `limbs()[1]` equals K-mer order.
    pub fn limbs(self) -> [u64; 2] {
        [(self.bits >> 64) as u64, self.bits as u64]
    }

    pub fn len(self) -> usize {
        self.len as usize
    }

    pub fn is_empty(self) -> bool {
        self.len == 0
    }

    /// The 2-bit code of base `i`.
    pub fn base(self, i: usize) -> u8 {
        debug_assert!(i < self.len());
        ((self.bits >> (126 - 2 * i)) & 3) as u8
    }

    /// The first base.
    pub fn front(self) -> u8 {
        self.base(0)
    }

    /// The last base.
    pub fn back(self) -> u8 {
        self.base(self.len() - 1)
    }

    /// Bit mask covering the used (top `2 * len`) bits.
    fn used_mask(self) -> u128 {
        // len >= 1, so the shift is at most 126
        !0u128 << (128 - 2 * u32::from(self.len))
    }

    /// Shifts in `code` at the back, dropping the front base.
    pub fn to_successor(self, code: u8) -> Self {
        debug_assert!(code < 4);
        Self {
            bits: (self.bits << 2) | (u128::from(code) << (128 - 2 * u32::from(self.len))),
            len: self.len,
        }
    }

    /// Shifts in `code` at the front, dropping the back base.
    pub fn to_predecessor(self, code: u8) -> Self {
        debug_assert!(code < 4);
        Self {
            bits: ((self.bits >> 2) & self.used_mask()) | (u128::from(code) << 126),
            len: self.len,
        }
    }

    /// The reverse complement.
    pub fn rc(self) -> Self {
        let complemented = !self.bits & self.used_mask();
        // Full bit reversal puts the bases in reverse order with each 2-bit
        // group internally swapped; the pair swap restores the groups.
        let reversed = complemented.reverse_bits();
        let fixed = ((reversed >> 1) & PAIR_LOW) | ((reversed & PAIR_LOW) << 1);
        Self {
            bits: fixed << (128 - 2 * u32::from(self.len)),
            len: self.len,
        }
    }

    /// True when this K-mer is strictly greater than its reverse complement.
    pub fn is_rev(self) -> bool {
        self.bits > self.rc().bits
    }

    /// True when this K-mer equals its reverse complement (even lengths only).
    pub fn is_palindrome(self) -> bool {
        self.bits == self.rc().bits
    }

    pub fn canonical_form(self) -> CanonicalForm {
        match self.bits.cmp(&self.rc().bits) {
            Ordering::Less => CanonicalForm::Fwd,
            Ordering::Greater => CanonicalForm::Rev,
            Ordering::Equal => CanonicalForm::Palindrome,
        }
    }

    /// Returns the canonical form and whether the reverse complement was
    /// taken.
    pub fn canonicalize(self) -> (Self, bool) {
        let rc = self.rc();
        if self.bits > rc.bits {
            (rc, true)
        } else {
            (self, false)
        }
    }

    /// The first `len - 1` bases.
    pub fn prefix(self) -> Self {
        debug_assert!(self.len >= 2);
        let shorter = Self {
            bits: self.bits,
            len: self.len - 1,
        };
        Self {
            bits: self.bits & shorter.used_mask(),
            len: self.len - 1,
        }
    }

    /// The last `len - 1` bases.
    pub fn suffix(self) -> Self {
        debug_assert!(self.len >= 2);
        Self {
            bits: self.bits << 2,
            len: self.len - 1,
        }
    }

    /// Iterates the base codes front to back.
    pub fn codes(self) -> impl Iterator<Item = u8> {
        (0..self.len()).map(move |i| self.base(i))
    }
}

impl fmt::Display for Kmer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for code in self.codes() {
            write!(f, "{}", Base::from_code(code).to_ascii() as char)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bases::BaseVec;

    fn kmer(dna: &str) -> Kmer {
        Kmer::from_codes(BaseVec::from_dna(dna).unwrap().as_slice())
    }

    #[test]
    fn codes_roundtrip() {
        for dna in ["ACGT", "GATTACA", "AAAA", "TTTT", "CCGG"] {
            assert_eq!(kmer(dna).to_string(), dna);
        }
    }

    #[test]
    fn ordering_is_lexicographic() {
        assert!(kmer("AAAC") < kmer("AAAG"));
        assert!(kmer("AAAA") < kmer("AAAC"));
        assert!(kmer("CAAA") > kmer("ATTT"));
        // 33 bases forces both limbs into play
        let low = kmer("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAC");
        let high = kmer("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAG");
        assert!(low < high);
    }

    #[test]
    fn successor_slides_window() {
        let mut k = kmer("ACGT");
        k = k.to_successor(Base::A.code());
        assert_eq!(k.to_string(), "CGTA");
        k = k.to_successor(Base::C.code());
        assert_eq!(k.to_string(), "GTAC");
    }

    #[test]
    fn predecessor_slides_window() {
        let mut k = kmer("ACGT");
        k = k.to_predecessor(Base::T.code());
        assert_eq!(k.to_string(), "TACG");
    }

    #[test]
    fn successor_then_predecessor_restores_prefix() {
        let k = kmer("GATTACA");
        let slid = k.to_successor(Base::G.code()).to_predecessor(k.front());
        assert_eq!(slid.to_string(), "GATTACA");
    }

    #[test]
    fn reverse_complement() {
        assert_eq!(kmer("AACG").rc().to_string(), "CGTT");
        assert_eq!(kmer("GATTACA").rc().to_string(), "TGTAATC");
        // involution
        let k = kmer("CCGATTAG");
        assert_eq!(k.rc().rc(), k);
    }

    #[test]
    fn canonical_picks_smaller() {
        let (canonical, was_rc) = kmer("CGTT").canonicalize();
        assert_eq!(canonical.to_string(), "AACG");
        assert!(was_rc);

        let (canonical, was_rc) = kmer("AACG").canonicalize();
        assert_eq!(canonical.to_string(), "AACG");
        assert!(!was_rc);
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let (once, _) = kmer("TTGC").canonicalize();
        let (twice, was_rc) = once.canonicalize();
        assert_eq!(once, twice);
        assert!(!was_rc);
    }

    #[test]
    fn palindrome_detection() {
        assert!(kmer("ACGT").is_palindrome());
        assert!(kmer("ATAT").is_palindrome());
        assert!(!kmer("AAAA").is_palindrome());
        assert_eq!(kmer("ACGT").canonical_form(), CanonicalForm::Palindrome);
    }

    #[test]
    fn prefix_and_suffix() {
        let k = kmer("GATTA");
        assert_eq!(k.prefix().to_string(), "GATT");
        assert_eq!(k.suffix().to_string(), "ATTA");
    }

    #[test]
    fn limbs_roundtrip() {
        for dna in ["ACGT", "GATTACAGATTACAGATTACAGATTACAGATTACA"] {
            let k = kmer(dna);
            assert_eq!(Kmer::from_limbs(k.limbs(), k.len()), k);
        }
    }

    #[test]
    fn limb_order_matches_kmer_order() {
        let a = kmer("ACGTACGTACGTACGTACGTACGTACGTACGTACGT");
        let b = kmer("ACGTACGTACGTACGTACGTACGTACGTACGTACGG");
        assert_eq!(a.cmp(&b), a.limbs().cmp(&b.limbs()));
    }
}
