//! Error types for qgraph.
//!
//! Recoverable failures (I/O, malformed inputs) surface as [`QgraphError`]
//! values. Invariant violations inside the graph machinery — a K-mer placed
//! on two edges, a smooth circle that fails to close, an overlap join whose
//! bases disagree — are terminal and abort with a diagnostic naming the
//! offending K-mer; they are not represented here.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in qgraph operations.
#[derive(Debug, Error)]
pub enum QgraphError {
    /// Failed to open, read, or write a file.
    #[error("I/O failure on '{path}': {source}")]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// The packed K-mer stream ended mid-record.
    #[error("short read in packed K-mer file '{path}': expected {expected} records, got {got}")]
    ShortKmerStream {
        path: PathBuf,
        expected: u64,
        got: u64,
    },

    /// An empty sequence was encountered mid-stream.
    #[error("empty sequence at record {index}")]
    EmptySequence { index: usize },

    /// Failed to write a CSV table.
    #[error("failed to write CSV output: {0}")]
    Csv(#[from] csv::Error),
}

impl QgraphError {
    /// Wraps an I/O error with the path it occurred on.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: path.into(),
        }
    }
}
