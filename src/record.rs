//! Count records and the packed on-disk K-mer format.
//!
//! [`CountRecord`] is the in-memory unit of the counter: a canonical K-mer,
//! its neighbour context, and an occurrence count saturating at 255.
//! [`write_raw_kmers`]/[`read_raw_kmers`] implement the `raw_kmers.data`
//! format consumed by the spectra-cn tabulation: a `u64` record count
//! followed by that many 18-byte records
//! `{u64 kdata[2]; u8 count; u8 kc}` with no padding, sorted ascending by
//! `kdata[0]` then `kdata[1]`.
//!
//! Records are written in host byte order, matching the in-memory limb
//! layout; the file is not portable across endianness.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::context::KmerContext;
use crate::error::QgraphError;
use crate::kmer::Kmer;

/// Size of one packed record on disk.
pub const PACKED_RECORD_BYTES: usize = 18;

/// A canonical K-mer with its observed context and saturating count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountRecord {
    pub kmer: Kmer,
    pub context: KmerContext,
    pub count: u8,
}

impl CountRecord {
    pub fn new(kmer: Kmer, context: KmerContext, count: u8) -> Self {
        Self {
            kmer,
            context,
            count,
        }
    }

    /// Folds another observation of the same K-mer into this record:
    /// contexts union, counts saturate at 255.
    pub fn combine(&mut self, other: &Self) {
        debug_assert_eq!(self.kmer, other.kmer);
        self.count = self.count.saturating_add(other.count);
        self.context |= other.context;
    }

    fn to_packed_bytes(self) -> [u8; PACKED_RECORD_BYTES] {
        let limbs = self.kmer.limbs();
        let mut buf = [0u8; PACKED_RECORD_BYTES];
        buf[..8].copy_from_slice(&limbs[0].to_ne_bytes());
        buf[8..16].copy_from_slice(&limbs[1].to_ne_bytes());
        buf[16] = self.count;
        buf[17] = self.context.raw();
        buf
    }

    fn from_packed_bytes(buf: &[u8; PACKED_RECORD_BYTES], k: usize) -> Self {
        let limb0 = u64::from_ne_bytes(buf[..8].try_into().unwrap_or_default());
        let limb1 = u64::from_ne_bytes(buf[8..16].try_into().unwrap_or_default());
        Self {
            kmer: Kmer::from_limbs([limb0, limb1], k),
            count: buf[16],
            context: KmerContext::from_raw(buf[17]),
        }
    }
}

/// Writes a sorted record list as a packed K-mer file.
///
/// The records must already be in ascending K-mer order; that order is what
/// the streaming cross-tabulation in [`crate::spectra`] relies on.
pub fn write_raw_kmers<P: AsRef<Path>>(path: P, records: &[CountRecord]) -> Result<(), QgraphError> {
    let path = path.as_ref();
    debug_assert!(records.windows(2).all(|w| w[0].kmer <= w[1].kmer));

    let file = File::create(path).map_err(|e| QgraphError::io(e, path))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(&(records.len() as u64).to_ne_bytes())
        .map_err(|e| QgraphError::io(e, path))?;
    for record in records {
        writer
            .write_all(&record.to_packed_bytes())
            .map_err(|e| QgraphError::io(e, path))?;
    }
    writer.flush().map_err(|e| QgraphError::io(e, path))
}

/// Reads a packed K-mer file back into records of length `k`.
pub fn read_raw_kmers<P: AsRef<Path>>(path: P, k: usize) -> Result<Vec<CountRecord>, QgraphError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| QgraphError::io(e, path))?;
    let mut reader = BufReader::new(file);

    let mut count_buf = [0u8; 8];
    reader
        .read_exact(&mut count_buf)
        .map_err(|e| QgraphError::io(e, path))?;
    let expected = u64::from_ne_bytes(count_buf);

    let mut records = Vec::with_capacity(expected as usize);
    let mut buf = [0u8; PACKED_RECORD_BYTES];
    for got in 0..expected {
        if let Err(e) = reader.read_exact(&mut buf) {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                return Err(QgraphError::ShortKmerStream {
                    path: path.to_path_buf(),
                    expected,
                    got,
                });
            }
            return Err(QgraphError::io(e, path));
        }
        records.push(CountRecord::from_packed_bytes(&buf, k));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bases::BaseVec;
    use tempfile::tempdir;

    fn record(dna: &str, context: KmerContext, count: u8) -> CountRecord {
        let kmer = Kmer::from_codes(BaseVec::from_dna(dna).unwrap().as_slice());
        CountRecord::new(kmer, context, count)
    }

    #[test]
    fn combine_saturates_and_unions() {
        let mut a = record("AACG", KmerContext::initial(2), 200);
        let b = record("AACG", KmerContext::terminal(1), 100);
        a.combine(&b);
        assert_eq!(a.count, 255);
        assert_eq!(a.context.successor_count(), 1);
        assert_eq!(a.context.predecessor_count(), 1);
    }

    #[test]
    fn packed_record_is_18_bytes() {
        let rec = record("ACGT", KmerContext::empty(), 1);
        assert_eq!(rec.to_packed_bytes().len(), PACKED_RECORD_BYTES);
    }

    #[test]
    fn file_roundtrip_preserves_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raw_kmers.data");

        let mut records = vec![
            record("AAAC", KmerContext::initial(0), 3),
            record("AACG", KmerContext::flanked(1, 2), 7),
            record("ACGG", KmerContext::terminal(3), 255),
        ];
        records.sort_by_key(|r| r.kmer);

        write_raw_kmers(&path, &records).unwrap();
        let reread = read_raw_kmers(&path, 4).unwrap();
        assert_eq!(reread, records);
    }

    #[test]
    fn empty_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raw_kmers.data");
        write_raw_kmers(&path, &[]).unwrap();
        assert!(read_raw_kmers(&path, 4).unwrap().is_empty());
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("raw_kmers.data");

        let records = vec![
            record("AAAC", KmerContext::empty(), 1),
            record("AACG", KmerContext::empty(), 1),
        ];
        write_raw_kmers(&path, &records).unwrap();

        // chop off the last record
        let data = std::fs::read(&path).unwrap();
        std::fs::write(&path, &data[..data.len() - PACKED_RECORD_BYTES]).unwrap();

        let err = read_raw_kmers(&path, 4).unwrap_err();
        assert!(matches!(
            err,
            QgraphError::ShortKmerStream {
                expected: 2,
                got: 1,
                ..
            }
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_raw_kmers("/nonexistent/raw_kmers.data", 4).unwrap_err();
        assert!(matches!(err, QgraphError::Io { .. }));
    }
}
