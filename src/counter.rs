//! Parallel canonical K-mer counting.
//!
//! Reads are split into batches; each batch builds a locally sorted,
//! collapsed record list, and finished batches meet in a progressive
//! pairwise reduction tree of `ceil(log2(batches))` levels. A batch
//! finishing level L claims the next slot at level L; odd slots (and the
//! final slot of a level) advance upward, odd claimants first merging with
//! their even partner through an in-place dual-ended merge that bounds peak
//! memory at roughly the merged size plus the smaller partner. Slot
//! readiness is a three-state atomic flag (empty, produced, consumed);
//! consumers park briefly and recheck.
//!
//! The merged list is filtered at `min_freq`, survivors are bulk-loaded
//! into a [`KmerDict`], and the count histogram is written as
//! `small_K.freqs` when a workdir is configured.

use std::path::Path;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use rayon::prelude::*;
use tracing::info;

use crate::context::KmerContext;
use crate::dict::KmerDict;
use crate::error::QgraphError;
use crate::kmer::Kmer;
use crate::record::CountRecord;

const SLOT_EMPTY: u8 = 0;
const SLOT_PRODUCED: u8 = 1;
const SLOT_CONSUMED: u8 = 2;

/// How long a consumer parks before rechecking its partner slot.
const SLOT_PARK: Duration = Duration::from_micros(10);

/// Appends one canonicalised record, swapping the context masks when the
/// reverse complement is taken.
fn push_canonical(out: &mut Vec<CountRecord>, kmer: Kmer, context: KmerContext) {
    let (canonical, was_rc) = kmer.canonicalize();
    let context = if was_rc { context.rc() } else { context };
    out.push(CountRecord::new(canonical, context, 1));
}

/// Emits the K-mers of one read's good prefix with their contexts.
///
/// The first K-mer gets an initial (successor-only) context, the last a
/// terminal (predecessor-only) context, interior K-mers both flanking
/// bases. A good length of exactly K yields a single K-mer with an empty
/// context.
pub(crate) fn push_read_records(out: &mut Vec<CountRecord>, read: &[u8], good_len: usize, k: usize) {
    if good_len < k || read.len() < good_len {
        return;
    }
    let codes = &read[..good_len];
    let mut kmer = Kmer::from_codes(&codes[..k]);
    if good_len == k {
        push_canonical(out, kmer, KmerContext::empty());
        return;
    }

    push_canonical(out, kmer, KmerContext::initial(codes[k]));
    let mut i = k;
    while i < good_len - 1 {
        let pred = kmer.front();
        kmer = kmer.to_successor(codes[i]);
        i += 1;
        push_canonical(out, kmer, KmerContext::flanked(pred, codes[i]));
    }
    let context = KmerContext::terminal(kmer.front());
    kmer = kmer.to_successor(codes[good_len - 1]);
    push_canonical(out, kmer, context);
}

/// Collapses runs of equal K-mers in a sorted record list.
pub(crate) fn collapse_records(records: &mut Vec<CountRecord>) {
    let mut write = 0;
    let mut read = 0;
    while read < records.len() {
        let mut merged = records[read];
        read += 1;
        while read < records.len() && records[read].kmer == merged.kmer {
            let next = records[read];
            merged.combine(&next);
            read += 1;
        }
        records[write] = merged;
        write += 1;
    }
    records.truncate(write);
}

/// In-place dual-ended merge of `src` into `dst`.
///
/// Both lists must be sorted and collapsed. Records present in both are
/// combined into `dst`; records unique to `src` are first compacted to the
/// head of `src`, then `dst` grows by that count and a right-to-left merge
/// fills it from both tails.
pub(crate) fn merge_records(dst: &mut Vec<CountRecord>, src: &mut Vec<CountRecord>) {
    // pass 1: combine duplicates, compact src down to records new to dst
    let mut d = 0;
    let mut write = 0;
    let mut read = 0;
    while read < src.len() {
        while d < dst.len() && dst[d].kmer < src[read].kmer {
            d += 1;
        }
        if d < dst.len() && dst[d].kmer == src[read].kmer {
            let incoming = src[read];
            dst[d].combine(&incoming);
            d += 1;
            read += 1;
        }
        while read < src.len() && (d == dst.len() || src[read].kmer < dst[d].kmer) {
            src[write] = src[read];
            write += 1;
            read += 1;
        }
    }
    src.truncate(write);
    if src.is_empty() {
        return;
    }

    // pass 2: grow dst and merge from the tails
    let old_len = dst.len();
    dst.resize(old_len + src.len(), CountRecord::new(Kmer::default(), KmerContext::empty(), 0));
    let mut out = dst.len();
    let mut d = old_len;
    let mut s = src.len();
    while s > 0 {
        out -= 1;
        if d > 0 && dst[d - 1].kmer > src[s - 1].kmer {
            dst[out] = dst[d - 1];
            d -= 1;
        } else {
            dst[out] = src[s - 1];
            s -= 1;
        }
    }
    src.clear();
    src.shrink_to_fit();
}

struct MergeSlot {
    status: AtomicU8,
    list: Mutex<Option<Vec<CountRecord>>>,
}

impl MergeSlot {
    fn new() -> Self {
        Self {
            status: AtomicU8::new(SLOT_EMPTY),
            list: Mutex::new(None),
        }
    }
}

fn lock_slot(slot: &MergeSlot) -> MutexGuard<'_, Option<Vec<CountRecord>>> {
    match slot.list.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Builds one batch's sorted, collapsed record list.
fn batch_records(reads: &[Bytes], good_lens: &[u16], range: std::ops::Range<usize>, k: usize) -> Vec<CountRecord> {
    let total_good: usize = good_lens[range.clone()].iter().map(|&l| l as usize).sum();
    let mut records = Vec::with_capacity(total_good);
    for read_id in range {
        push_read_records(&mut records, &reads[read_id], good_lens[read_id] as usize, k);
    }
    records.sort_unstable_by_key(|r| r.kmer);
    collapse_records(&mut records);
    records
}

/// Counts all reads into one merged, sorted, collapsed record list.
///
/// The result is independent of `batch_size` and thread count; only timing
/// changes.
pub fn count_records(reads: &[Bytes], good_lens: &[u16], k: usize, batch_size: u64) -> Vec<CountRecord> {
    assert_eq!(reads.len(), good_lens.len());
    let batch_size = (batch_size as usize).max(1);
    let batches = reads.len().div_ceil(batch_size).max(1);

    if batches == 1 {
        return batch_records(reads, good_lens, 0..reads.len(), k);
    }

    // level sizes halve (rounding up) until a single list remains
    let mut levels: Vec<Vec<MergeSlot>> = Vec::new();
    let mut elements = batches;
    while elements > 1 {
        levels.push((0..elements).map(|_| MergeSlot::new()).collect());
        elements = elements.div_ceil(2);
    }
    let level_counts: Vec<AtomicUsize> = levels.iter().map(|_| AtomicUsize::new(0)).collect();
    info!(batches, levels = levels.len(), batch_size, "counting K-mers");

    (0..batches).into_par_iter().for_each(|batch| {
        let from = batch * batch_size;
        let to = (from + batch_size).min(reads.len());
        let mut local = batch_records(reads, good_lens, from..to, k);

        let mut level = 0;
        loop {
            let slot = level_counts[level].fetch_add(1, Ordering::Relaxed);
            let last_in_level = slot == levels[level].len() - 1;
            if level < levels.len() - 1 && (slot % 2 == 1 || last_in_level) {
                if slot % 2 == 1 {
                    let partner = &levels[level][slot - 1];
                    while partner.status.load(Ordering::Acquire) != SLOT_PRODUCED {
                        std::thread::sleep(SLOT_PARK);
                    }
                    partner.status.store(SLOT_CONSUMED, Ordering::Relaxed);
                    let mut other = lock_slot(partner).take().unwrap_or_default();
                    if other.len() > local.len() {
                        std::mem::swap(&mut local, &mut other);
                    }
                    merge_records(&mut local, &mut other);
                }
                level += 1;
            } else {
                let cell = &levels[level][slot];
                *lock_slot(cell) = Some(local);
                cell.status.store(SLOT_PRODUCED, Ordering::Release);
                break;
            }
        }
    });

    // the parallel region is a barrier: the top level holds exactly two
    // produced lists
    let top = &levels[levels.len() - 1];
    let mut merged = lock_slot(&top[0]).take().unwrap_or_default();
    let mut second = lock_slot(&top[1]).take().unwrap_or_default();
    if second.len() > merged.len() {
        std::mem::swap(&mut merged, &mut second);
    }
    merge_records(&mut merged, &mut second);
    info!(kmers = merged.len(), "top level merge done");
    merged
}

/// Filters a merged record list at `min_freq`, loads survivors into a
/// dictionary, and writes the count histogram when a workdir is given.
pub fn build_dict(
    records: &[CountRecord],
    k: usize,
    min_freq: u32,
    workdir: Option<&Path>,
) -> Result<KmerDict, QgraphError> {
    let mut histogram = [0u64; 256];
    let mut used = 0usize;
    for record in records {
        histogram[record.count as usize] += 1;
        if u32::from(record.count) >= min_freq {
            used += 1;
        }
    }

    let mut dict = KmerDict::with_capacity(used, k);
    for record in records {
        if u32::from(record.count) >= min_freq {
            dict.insert(record.kmer, record.context);
        }
    }
    info!(
        used,
        counted = records.len(),
        min_freq,
        "kmers filtered into dictionary"
    );

    if let Some(workdir) = workdir {
        write_freq_histogram(&workdir.join("small_K.freqs"), &histogram)?;
    }
    Ok(dict)
}

/// Counts reads straight into a dictionary.
pub fn count_into_dict(
    reads: &[Bytes],
    good_lens: &[u16],
    k: usize,
    min_freq: u32,
    batch_size: u64,
    workdir: Option<&Path>,
) -> Result<KmerDict, QgraphError> {
    let records = count_records(reads, good_lens, k, batch_size);
    build_dict(&records, k, min_freq, workdir)
}

/// Writes the `count -> #kmers` histogram as CSV rows `i,count` for
/// i in [1, 255].
fn write_freq_histogram(path: &Path, histogram: &[u64; 256]) -> Result<(), QgraphError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(QgraphError::Csv)?;
    for (count, &kmers) in histogram.iter().enumerate().skip(1) {
        writer.write_record(&[count.to_string(), kmers.to_string()])?;
    }
    writer.flush().map_err(|e| QgraphError::io(e, path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bases::BaseVec;

    fn encode(dna: &str) -> Bytes {
        Bytes::from(BaseVec::from_dna(dna).unwrap().into_inner())
    }

    fn count_all(reads: &[&str], k: usize, batch_size: u64) -> Vec<CountRecord> {
        let encoded: Vec<Bytes> = reads.iter().map(|r| encode(r)).collect();
        let lens: Vec<u16> = encoded.iter().map(|r| r.len() as u16).collect();
        count_records(&encoded, &lens, k, batch_size)
    }

    fn kmer(dna: &str) -> Kmer {
        Kmer::from_codes(BaseVec::from_dna(dna).unwrap().as_slice())
    }

    #[test]
    fn single_read_kmer_count() {
        let records = count_all(&["AAAACCCG"], 4, 1024);
        // 5 windows, all distinct after canonicalisation
        assert_eq!(records.len(), 5);
        assert!(records.iter().all(|r| r.count == 1));
        assert!(records.windows(2).all(|w| w[0].kmer < w[1].kmer));
    }

    #[test]
    fn duplicate_reads_double_counts() {
        let records = count_all(&["AAAACCCG", "AAAACCCG"], 4, 1024);
        assert_eq!(records.len(), 5);
        assert!(records.iter().all(|r| r.count == 2));
    }

    #[test]
    fn contexts_link_neighbouring_kmers() {
        let records = count_all(&["AAAACC"], 4, 1024);
        // AAAA: no predecessor, successor A (the next base after the window)
        let first = records.iter().find(|r| r.kmer == kmer("AAAA")).unwrap();
        assert_eq!(first.context.predecessor_count(), 0);
        assert_eq!(first.context.single_successor(), 1); // C follows AAAA

        // AACC is the final window: one predecessor (A), no successor
        let last = records.iter().find(|r| r.kmer == kmer("AACC")).unwrap();
        assert_eq!(last.context.single_predecessor(), 0);
        assert_eq!(last.context.successor_count(), 0);
    }

    #[test]
    fn rc_occurrences_collapse_onto_canonical() {
        // CGTT's canonical form is AACG
        let records = count_all(&["AACGA", "TCGTT"], 4, 1024);
        let merged = records.iter().find(|r| r.kmer == kmer("AACG")).unwrap();
        assert_eq!(merged.count, 2);
    }

    #[test]
    fn good_length_truncates_kmers() {
        let encoded = vec![encode("AAAACCCG")];
        let records = count_records(&encoded, &[6], 4, 1024);
        // only windows of AAAACC survive
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn good_length_of_exactly_k_gives_one_empty_context_kmer() {
        let encoded = vec![encode("AAAC")];
        let records = count_records(&encoded, &[4], 4, 1024);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].context, KmerContext::empty());
        assert_eq!(records[0].count, 1);
    }

    #[test]
    fn merge_records_combines_and_interleaves() {
        let mut a = vec![
            CountRecord::new(kmer("AAAA"), KmerContext::initial(1), 1),
            CountRecord::new(kmer("AACC"), KmerContext::initial(2), 1),
        ];
        let mut b = vec![
            CountRecord::new(kmer("AAAC"), KmerContext::initial(3), 1),
            CountRecord::new(kmer("AACC"), KmerContext::terminal(0), 2),
        ];
        merge_records(&mut a, &mut b);

        assert!(b.is_empty());
        let kmers: Vec<Kmer> = a.iter().map(|r| r.kmer).collect();
        assert_eq!(kmers, vec![kmer("AAAA"), kmer("AAAC"), kmer("AACC")]);
        let shared = &a[2];
        assert_eq!(shared.count, 3);
        assert_eq!(shared.context.successor_count(), 1);
        assert_eq!(shared.context.predecessor_count(), 1);
    }

    #[test]
    fn counts_saturate_at_255() {
        let reads: Vec<&str> = std::iter::repeat("AAAAA").take(300).collect();
        let records = count_all(&reads, 4, 16);
        let aaaa = records.iter().find(|r| r.kmer == kmer("AAAA")).unwrap();
        assert_eq!(aaaa.count, 255);
    }

    #[test]
    fn determinism_across_batch_sizes() {
        let reads: Vec<String> = (0..200)
            .map(|i| {
                // deterministic pseudo-random read content
                let mut seq = String::new();
                let mut state = i as u64 * 2654435761 + 1;
                for _ in 0..30 {
                    state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                    seq.push(['A', 'C', 'G', 'T'][(state >> 60) as usize & 3]);
                }
                seq
            })
            .collect();
        let refs: Vec<&str> = reads.iter().map(String::as_str).collect();

        let small = count_all(&refs, 4, 3);
        let large = count_all(&refs, 4, 1024);
        assert_eq!(small, large);
    }

    #[test]
    fn build_dict_filters_and_writes_histogram() {
        use tempfile::tempdir;

        let dir = tempdir().unwrap();
        let records = count_all(&["AAAACCCG", "AAAACCCG", "ACGGTCAA"], 4, 1024);
        let dict = build_dict(&records, 4, 2, Some(dir.path())).unwrap();

        // only the doubled read's kmers survive
        assert_eq!(dict.len(), 5);
        assert!(dict.find(kmer("AAAA")).is_some());

        let csv = std::fs::read_to_string(dir.path().join("small_K.freqs")).unwrap();
        let mut lines = csv.lines();
        // ACGGTCAA contributes 5 distinct canonical singleton kmers
        assert_eq!(lines.next(), Some("1,5"));
        assert_eq!(lines.next(), Some("2,5"));
        assert_eq!(csv.lines().count(), 255);
    }
}
