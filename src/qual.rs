//! Read-length qualification from base qualities.
//!
//! For each read we keep only a prefix that ends in K consecutive bases of
//! acceptable quality: scanning from the 3' end toward the 5' end, a run
//! counter tracks consecutive bases with `qual >= min_qual` and resets on
//! any violation; the first time the run reaches K, the prefix ending at
//! that run is the read's good length. Reads whose run never reaches K get
//! a good length of 0 and contribute no K-mers downstream.

use bytes::Bytes;
use rayon::prelude::*;

/// Computes per-read good lengths, in parallel across reads.
pub fn good_lengths(quals: &[Bytes], k: usize, min_qual: u8) -> Vec<u16> {
    quals
        .par_iter()
        .map(|qual| good_length(qual, k, min_qual))
        .collect()
}

/// The good length of a single read.
pub fn good_length(qual: &[u8], k: usize, min_qual: u8) -> u16 {
    let mut run = 0usize;
    for (i, &q) in qual.iter().enumerate().rev() {
        if q < min_qual {
            run = 0;
        } else {
            run += 1;
            if run == k {
                return (i + k) as u16;
            }
        }
    }
    0
}
