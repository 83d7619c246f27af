//! Build configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::DEFAULT_K;

/// Options recognised by the graph construction pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildParams {
    /// K-mer length. Fixed for a run; 60 for production builds.
    pub k: usize,
    /// Quality threshold for the good-length qualifier.
    pub min_qual: u8,
    /// K-mer count threshold for the primary dictionary.
    pub min_freq: u32,
    /// Fraction of `min_freq` used by the repair passes:
    /// `min_freq2 = max(2, round(min_freq2_fraction * min_freq))`.
    pub min_freq2_fraction: f64,
    /// Upper bound on repairable captured gaps.
    pub max_gap_size: u32,
    /// Run the gap-filling pass.
    pub do_fill_gaps: bool,
    /// Run the overlap-joining pass.
    pub do_join_overlaps: bool,
    /// Reads per counting batch.
    pub count_batch_size: u64,
    /// Destination for the small-K frequency histogram CSV; skipped when
    /// unset.
    pub workdir: Option<PathBuf>,
}

impl Default for BuildParams {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            min_qual: 7,
            min_freq: 4,
            min_freq2_fraction: 0.5,
            max_gap_size: 10,
            do_fill_gaps: false,
            do_join_overlaps: false,
            count_batch_size: 1_000_000,
            workdir: None,
        }
    }
}

impl BuildParams {
    /// The repair-pass frequency threshold.
    pub fn min_freq2(&self) -> u32 {
        2.max((self.min_freq2_fraction * f64::from(self.min_freq)).round() as u32)
    }
}
