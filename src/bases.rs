//! 2-bit base primitives and base sequences.
//!
//! All sequences in this crate are streams of 2-bit base codes
//! (A=0, C=1, G=2, T=3). The reverse complement of a code is its bitwise
//! complement, so `complement(b) == 3 - b`. Reads arrive as immutable
//! [`bytes::Bytes`] of codes; [`BaseVec`] is the growable variant used for
//! edge sequences and synthetic reads.

use std::fmt;

/// A single DNA base as a 2-bit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Base {
    /// Adenine (code 0)
    A,
    /// Cytosine (code 1)
    C,
    /// Guanine (code 2)
    G,
    /// Thymine (code 3)
    T,
}

impl Base {
    /// Decodes a 2-bit code. Panics on codes > 3, which cannot occur for
    /// values produced by this crate.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Base::A,
            1 => Base::C,
            2 => Base::G,
            3 => Base::T,
            _ => unreachable!("invalid 2-bit base code {code}"),
        }
    }

    /// Parses an ASCII base, accepting soft-masked (lowercase) input.
    pub fn from_ascii(byte: u8) -> Option<Self> {
        match byte {
            b'A' | b'a' => Some(Base::A),
            b'C' | b'c' => Some(Base::C),
            b'G' | b'g' => Some(Base::G),
            b'T' | b't' => Some(Base::T),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn to_ascii(self) -> u8 {
        match self {
            Base::A => b'A',
            Base::C => b'C',
            Base::G => b'G',
            Base::T => b'T',
        }
    }

    pub fn complement(self) -> Self {
        Base::from_code(complement(self.code()))
    }
}

/// Complement of a 2-bit base code (A<->T, C<->G).
#[inline]
pub fn complement(code: u8) -> u8 {
    3 - code
}

/// Orientation of a sequence relative to its reverse complement.
///
/// A sequence is `Fwd` when it is lexicographically smaller than its
/// reverse complement, `Rev` when larger, and `Palindrome` when equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalForm {
    Fwd,
    Rev,
    Palindrome,
}

/// A growable sequence of 2-bit base codes.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct BaseVec(Vec<u8>);

impl BaseVec {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    /// Builds a sequence from raw 2-bit codes.
    pub fn from_codes(codes: &[u8]) -> Self {
        debug_assert!(codes.iter().all(|&c| c < 4));
        Self(codes.to_vec())
    }

    /// Parses an ASCII DNA string.
    ///
    /// Returns `Err(index)` with the index of the first byte that is not a
    /// DNA base.
    pub fn from_dna(dna: &str) -> Result<Self, usize> {
        dna.bytes()
            .enumerate()
            .map(|(i, byte)| Base::from_ascii(byte).map(Base::code).ok_or(i))
            .collect::<Result<Vec<u8>, usize>>()
            .map(Self)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, code: u8) {
        debug_assert!(code < 4);
        self.0.push(code);
    }

    pub fn get(&self, index: usize) -> u8 {
        self.0[index]
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = u8> + '_ {
        self.0.iter().copied()
    }

    /// Appends a range of another sequence.
    pub fn extend_from_slice(&mut self, codes: &[u8]) {
        debug_assert!(codes.iter().all(|&c| c < 4));
        self.0.extend_from_slice(codes);
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// The reverse complement of this sequence.
    pub fn rc(&self) -> Self {
        Self(self.0.iter().rev().map(|&c| complement(c)).collect())
    }

    /// Reverse-complements in place.
    pub fn reverse_complement(&mut self) {
        self.0.reverse();
        for code in &mut self.0 {
            *code = complement(*code);
        }
    }

    /// Classifies this sequence against its reverse complement.
    pub fn canonical_form(&self) -> CanonicalForm {
        canonical_form_of(&self.0)
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

/// Classifies a code slice against its reverse complement without
/// materialising the complement.
pub fn canonical_form_of(codes: &[u8]) -> CanonicalForm {
    let rc = codes.iter().rev().map(|&c| complement(c));
    for (fwd, rev) in codes.iter().copied().zip(rc) {
        if fwd < rev {
            return CanonicalForm::Fwd;
        }
        if fwd > rev {
            return CanonicalForm::Rev;
        }
    }
    CanonicalForm::Palindrome
}

impl fmt::Display for BaseVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &code in &self.0 {
            write!(f, "{}", Base::from_code(code).to_ascii() as char)?;
        }
        Ok(())
    }
}

impl FromIterator<u8> for BaseVec {
    fn from_iter<I: IntoIterator<Item = u8>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
