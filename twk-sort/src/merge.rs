//! Phase 2 of the external sort: a k-way merge of the partially-sorted
//! blocks phase 1 produced, using a priority queue keyed by the record's
//! total order.
//!
//! Grounded in `examples/original_source/src/algorithm/sort/output_sorter.cpp`'s
//! `OutputSorter::sortMerge`: one `tgzf_iterator` per source block, seed the
//! queue with each stream's first record, then repeatedly pop the minimum,
//! emit it, and pull further records from the same stream while they stay
//! strictly less than the new top — pushing back only the first one that
//! isn't. `std::priority_queue` is a max-heap, so the original parameterizes
//! it with a descending comparator to get ascending (min-first) pop order;
//! here `std::collections::BinaryHeap` plays the same max-heap role, so
//! `Reverse<HeapEntry>` gets the same min-first behavior directly.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs::File;
use std::path::Path;

use twk_core::error::{Result, TwkError};
use twk_core::index::{Index, SortState};
use twk_core::reader::Reader;
use twk_core::record::LdRecord;
use twk_core::tgzf::{BlockStreamReader, FixedRecord};
use twk_core::writer::Writer;

/// Raw-byte budget per output block, same default as ingest's block flush
/// limit (spec.md §6).
pub const DEFAULT_MERGE_FLUSH_LIMIT: usize = 65536;

struct HeapEntry {
    record: LdRecord,
    stream_id: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.record == other.record && self.stream_id == other.stream_id
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Ties in the record's total order are broken by stream id, never by
/// address (spec.md §9) — deterministic given the same set of input blocks.
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.record.cmp(&other.record).then_with(|| self.stream_id.cmp(&other.stream_id))
    }
}

/// Accumulates emitted records into flush-limited raw buffers and appends
/// them as TGZF blocks, mirroring `ingest::Pipeline`'s block-flush shape but
/// over `LdRecord`s instead of variant meta/genotype streams.
struct MergeSink {
    writer: Writer,
    flush_limit: usize,
    pending: Vec<u8>,
    block_contig_id: Option<u32>,
    block_min: u32,
    block_max: u32,
    block_n: u32,
}

impl MergeSink {
    fn new(writer: Writer, flush_limit: usize) -> Self {
        Self {
            writer,
            flush_limit,
            pending: Vec::new(),
            block_contig_id: None,
            block_min: 0,
            block_max: 0,
            block_n: 0,
        }
    }

    fn emit(&mut self, record: &LdRecord) -> Result<()> {
        self.pending.extend_from_slice(&record.to_le_bytes());
        if self.block_contig_id.is_none() {
            self.block_contig_id = Some(record.contig_a);
            self.block_min = record.pos_a;
        }
        self.block_max = record.pos_a;
        self.block_n += 1;
        if self.pending.len() >= self.flush_limit {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.block_n == 0 {
            return Ok(());
        }
        self.writer.write_block_aligned(
            &self.pending,
            self.block_contig_id.unwrap(),
            self.block_min,
            self.block_max,
            self.block_n,
            LdRecord::SIZE,
        )?;
        self.pending.clear();
        self.block_contig_id = None;
        self.block_n = 0;
        Ok(())
    }

    fn finish(mut self) -> Result<Index> {
        self.flush()?;
        self.writer.finish(SortState::Sorted)
    }
}

/// Merge phase 2: requires `input` to be partially sorted (phase 1's
/// output); produces a fully-sorted file at `output`.
pub fn sort_merge(input: impl AsRef<Path>, output: impl AsRef<Path>, flush_limit: usize) -> Result<Index> {
    let input_path = input.as_ref().to_path_buf();
    let reader = Reader::open(&input_path)?;
    if !reader.sort_state().is_partial_sorted() {
        return Err(TwkError::StateError(
            "cannot merge: file is not partially sorted".into(),
        ));
    }

    let index = reader.index().clone();
    let mut header = reader.header.clone();
    header.append_literal("##twk_mergeSortCommand=twk merge");
    drop(reader);

    let n_blocks = index.len();
    log::info!("opening {n_blocks} file handles for merge");

    let mut files: Vec<File> = Vec::with_capacity(n_blocks);
    for _ in 0..n_blocks {
        files.push(File::open(&input_path)?);
    }

    let mut streams: Vec<BlockStreamReader<'_, File>> = Vec::with_capacity(n_blocks);
    for (i, file) in files.iter_mut().enumerate() {
        let entry = index.at(i);
        streams.push(BlockStreamReader::new(file, entry.byte_offset, entry.byte_offset_end)?);
    }

    let mut heap: BinaryHeap<Reverse<HeapEntry>> = BinaryHeap::new();
    for (stream_id, stream) in streams.iter_mut().enumerate() {
        if let Some(record) = stream.next_record::<LdRecord>()? {
            heap.push(Reverse(HeapEntry { record, stream_id }));
        }
    }
    if heap.is_empty() {
        return Err(TwkError::FormatError("no data to merge".into()));
    }

    log::info!("merging...");
    let mut sink = MergeSink::new(Writer::create(output, header)?, flush_limit);

    while let Some(Reverse(top)) = heap.pop() {
        sink.emit(&top.record)?;
        let stream_id = top.stream_id;

        loop {
            let Some(candidate) = streams[stream_id].next_record::<LdRecord>()? else {
                break;
            };
            let still_smallest = match heap.peek() {
                Some(Reverse(next_top)) => candidate < next_top.record,
                None => true,
            };
            if still_smallest {
                sink.emit(&candidate)?;
            } else {
                heap.push(Reverse(HeapEntry { record: candidate, stream_id }));
                break;
            }
        }
    }

    let index = sink.finish()?;
    let n_records: u64 = index.iter().map(|e| e.n_variants as u64).sum();
    log::info!("merge produced {} blocks, {n_records} records", index.len());
    Ok(index)
}
