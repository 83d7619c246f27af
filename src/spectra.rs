//! Spectra-cn cross-tabulation.
//!
//! Compares the K-mer content of an assembly (a [`Graph`] or an arbitrary
//! sequence collection) against the raw read K-mer spectrum persisted as
//! `raw_kmers.data` (see [`crate::record`]), and writes a sparse table of
//! `(graph count, read count) -> #K-mers` as `<name>.freqs` with header
//! `f0,f1,kmers`. Graph K-mers absent from the reads tabulate with a read
//! count of zero; read K-mers absent from the assembly are not reported.

use std::collections::BTreeMap;
use std::path::Path;

use bytes::Bytes;
use tracing::info;

use crate::bases::BaseVec;
use crate::counter;
use crate::error::QgraphError;
use crate::graph::Graph;
use crate::record::{read_raw_kmers, write_raw_kmers, CountRecord};

/// Counts the reads and persists their merged spectrum as a packed K-mer
/// file for later cross-tabulation.
pub fn write_raw_read_kmers<P: AsRef<Path>>(
    reads: &[Bytes],
    good_lens: &[u16],
    k: usize,
    batch_size: u64,
    path: P,
) -> Result<(), QgraphError> {
    let records = counter::count_records(reads, good_lens, k, batch_size);
    write_raw_kmers(path, &records)
}

/// Extracts the sorted, collapsed K-mer spectrum of a graph, visiting one
/// representative per involution pair.
pub fn graph_kmer_records(graph: &Graph) -> Vec<CountRecord> {
    let k = graph.k();
    let mut records = Vec::new();
    for edge_id in 0..graph.edge_count() as u32 {
        if graph.inv(edge_id) < edge_id {
            continue;
        }
        let edge = graph.edge(edge_id);
        counter::push_read_records(&mut records, edge.as_slice(), edge.len(), k);
    }
    records.sort_unstable_by_key(|r| r.kmer);
    counter::collapse_records(&mut records);
    records
}

/// Extracts the sorted, collapsed K-mer spectrum of a sequence collection.
///
/// An empty sequence mid-stream is a terminal input error naming the
/// record index.
pub fn sequence_kmer_records(
    sequences: &[BaseVec],
    k: usize,
) -> Result<Vec<CountRecord>, QgraphError> {
    let mut records = Vec::new();
    for (index, sequence) in sequences.iter().enumerate() {
        if sequence.is_empty() {
            return Err(QgraphError::EmptySequence { index });
        }
        counter::push_read_records(&mut records, sequence.as_slice(), sequence.len(), k);
    }
    records.sort_unstable_by_key(|r| r.kmer);
    counter::collapse_records(&mut records);
    Ok(records)
}

/// Tabulates assembly K-mers against the read spectrum.
///
/// Each assembly K-mer contributes exactly one increment, keyed by its
/// assembly count and its read count (zero when the reads never saw it).
pub fn cross_tabulate(
    assembly: &[CountRecord],
    read_spectrum: &[CountRecord],
) -> BTreeMap<(u8, u8), u64> {
    let mut totals = BTreeMap::new();
    let mut ri = 0usize;
    for record in assembly {
        while ri < read_spectrum.len() && read_spectrum[ri].kmer < record.kmer {
            ri += 1;
        }
        let read_count = if ri < read_spectrum.len() && read_spectrum[ri].kmer == record.kmer {
            read_spectrum[ri].count
        } else {
            0
        };
        *totals.entry((record.count, read_count)).or_insert(0) += 1;
    }
    totals
}

/// Cross-tabulates a graph against `<dir>/raw_kmers.data` and writes
/// `<dir>/<name>.freqs`.
pub fn dump_spectra_cn(graph: &Graph, dir: &Path, name: &str) -> Result<(), QgraphError> {
    let assembly = graph_kmer_records(graph);
    dump_records(&assembly, graph.k(), dir, name)
}

/// Cross-tabulates an arbitrary assembly sequence collection against
/// `<dir>/raw_kmers.data` and writes `<dir>/<name>.freqs`.
pub fn dump_spectra_cn_for_sequences(
    sequences: &[BaseVec],
    k: usize,
    dir: &Path,
    name: &str,
) -> Result<(), QgraphError> {
    let assembly = sequence_kmer_records(sequences, k)?;
    dump_records(&assembly, k, dir, name)
}

fn dump_records(
    assembly: &[CountRecord],
    k: usize,
    dir: &Path,
    name: &str,
) -> Result<(), QgraphError> {
    let read_spectrum = read_raw_kmers(dir.join("raw_kmers.data"), k)?;
    let totals = cross_tabulate(assembly, &read_spectrum);
    info!(
        assembly_kmers = assembly.len(),
        read_kmers = read_spectrum.len(),
        rows = totals.len(),
        "spectra-cn tabulated"
    );

    let path = dir.join(format!("{name}.freqs"));
    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(["f0", "f1", "kmers"])?;
    for ((assembly_count, read_count), kmers) in &totals {
        writer.write_record(&[
            assembly_count.to_string(),
            read_count.to_string(),
            kmers.to_string(),
        ])?;
    }
    writer.flush().map_err(|e| QgraphError::io(e, path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::KmerContext;
    use crate::kmer::Kmer;
    use tempfile::tempdir;

    fn encode(dna: &str) -> Bytes {
        Bytes::from(BaseVec::from_dna(dna).unwrap().into_inner())
    }

    fn kmer(dna: &str) -> Kmer {
        Kmer::from_codes(BaseVec::from_dna(dna).unwrap().as_slice())
    }

    #[test]
    fn graph_spectrum_visits_one_involution_representative() {
        let graph = Graph::assemble(&[BaseVec::from_dna("AAAACCCG").unwrap()], 4);
        let records = graph_kmer_records(&graph);
        // 5 canonical K-mers, each seen once
        assert_eq!(records.len(), 5);
        assert!(records.iter().all(|r| r.count == 1));
        assert!(records.iter().any(|r| r.kmer == kmer("AAAA")));
    }

    #[test]
    fn cross_tabulation_counts_each_assembly_kmer_once() {
        let assembly = vec![
            CountRecord::new(kmer("AAAA"), KmerContext::empty(), 1),
            CountRecord::new(kmer("AAAC"), KmerContext::empty(), 1),
            CountRecord::new(kmer("AACC"), KmerContext::empty(), 2),
        ];
        let reads = vec![
            CountRecord::new(kmer("AAAA"), KmerContext::empty(), 7),
            CountRecord::new(kmer("AACC"), KmerContext::empty(), 3),
        ];
        let totals = cross_tabulate(&assembly, &reads);

        // every assembly K-mer lands in exactly one cell, matches included
        let total: u64 = totals.values().sum();
        assert_eq!(total, assembly.len() as u64);
        assert_eq!(totals.get(&(1, 7)), Some(&1));
        assert_eq!(totals.get(&(1, 0)), Some(&1)); // AAAC unseen in reads
        assert_eq!(totals.get(&(2, 3)), Some(&1));
    }

    #[test]
    fn spectra_roundtrip_through_workdir() {
        let dir = tempdir().unwrap();

        let reads = vec![encode("AAAACCCG"), encode("AAAACCCG")];
        let lens = vec![8u16, 8];
        write_raw_read_kmers(&reads, &lens, 4, 1024, dir.path().join("raw_kmers.data")).unwrap();

        let graph = Graph::assemble(&[BaseVec::from_dna("AAAACCCG").unwrap()], 4);
        dump_spectra_cn(&graph, dir.path(), "spectra-cn").unwrap();

        let csv = std::fs::read_to_string(dir.path().join("spectra-cn.freqs")).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("f0,f1,kmers"));
        // all 5 graph K-mers occur once in the assembly and twice in reads
        assert_eq!(lines.next(), Some("1,2,5"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn graph_kmers_missing_from_reads_report_zero() {
        let dir = tempdir().unwrap();

        let reads = vec![encode("AAAACC"), encode("AAAACC")];
        let lens = vec![6u16, 6];
        write_raw_read_kmers(&reads, &lens, 4, 1024, dir.path().join("raw_kmers.data")).unwrap();

        // the graph carries CCCG territory the reads never covered
        let graph = Graph::assemble(&[BaseVec::from_dna("AAAACCCG").unwrap()], 4);
        dump_spectra_cn(&graph, dir.path(), "spectra-cn").unwrap();

        let csv = std::fs::read_to_string(dir.path().join("spectra-cn.freqs")).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("f0,f1,kmers"));
        assert_eq!(lines.next(), Some("1,0,2")); // ACCC, CCCG unseen
        assert_eq!(lines.next(), Some("1,2,3")); // AAAA, AAAC, AACC
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn empty_sequence_is_rejected_with_its_index() {
        let sequences = vec![
            BaseVec::from_dna("AAAACCCG").unwrap(),
            BaseVec::new(),
        ];
        let err = sequence_kmer_records(&sequences, 4).unwrap_err();
        assert!(matches!(err, QgraphError::EmptySequence { index: 1 }));
    }
}
