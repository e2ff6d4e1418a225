//! Streaming writer for TWK files.
//!
//! # Write contract
//! [`Writer::create`] opens a new file and writes the header immediately
//! (placeholder length, patched once the header's compressed size is known —
//! the same "write a placeholder, patch it later" shape the teacher's
//! `Writer::create`/`finish` use for the file header). Callers then push one
//! flushed block's worth of already-assembled raw bytes at a time via
//! [`Writer::write_block`] — deciding *when* to flush (e.g. at 65536
//! uncompressed bytes) is the ingest pipeline's job, not this layer's.
//! [`Writer::finish`] writes the index and footer and returns the final
//! [`Index`].
//!
//! [`Writer::append`] reopens an existing unsorted or partially-sorted file,
//! replays its index into memory, truncates off the old index/footer/EOF,
//! and resumes writing — grounded in `VCFParser::Extend`.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Result, TwkError};
use crate::header::Header;
use crate::index::{Index, SortState, TotempoleEntry};
use crate::layout;
use crate::tgzf::{self, BlockStreamReader, FixedRecord};

pub struct Writer {
    file: File,
    header: Header,
    index: Index,
    current_offset: u64,
}

impl Writer {
    /// Create a new TWK file at `path`, overwriting any existing file.
    pub fn create(path: impl AsRef<Path>, header: Header) -> Result<Self> {
        let mut file = File::create(path)?;
        let data_start = layout::write_prologue_and_header(&mut file, &header)?;
        Ok(Self { file, header, index: Index::new(), current_offset: data_start })
    }

    /// Reopen an existing unsorted/partial-sorted TWK file and position for
    /// appending further blocks after its last one, dropping the stale
    /// index/footer/EOF marker. Refuses files that are already fully sorted.
    pub fn append(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let (header, data_start) = layout::read_prologue_and_header(&mut file)?;
        let (sort_state, index_offset) = layout::read_footer(&mut file)?;
        if sort_state.is_sorted() {
            return Err(TwkError::StateError(
                "cannot extend a file that has already been sorted".into(),
            ));
        }

        let file_len = file.seek(SeekFrom::End(0))?;
        let index_end = layout::index_end_offset(file_len);
        let mut index = Index::new();
        {
            let mut stream = BlockStreamReader::new(&mut file, index_offset, index_end)?;
            while let Some(entry) = stream.next_record::<TotempoleEntry>()? {
                index.append(entry);
            }
        }
        if let Some(first) = index.entries().first() {
            if first.byte_offset != data_start {
                return Err(TwkError::CorruptBlock(
                    "header/index byte-offset mismatch on extend".into(),
                ));
            }
        }

        file.set_len(index_offset)?;
        file.seek(SeekFrom::Start(index_offset))?;
        Ok(Self { file, header, index, current_offset: index_offset })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Deflate `raw` (chunked as needed) as the next data block and record a
    /// [`TotempoleEntry`] spanning its on-disk byte range.
    ///
    /// `raw` here is a mixed meta/genotype byte stream read back whole via
    /// [`crate::reader::Reader::read_block`], not walked record-by-record,
    /// so chunk boundaries don't need to land on a record size.
    pub fn write_block(
        &mut self,
        raw: &[u8],
        contig_id: u32,
        min_position: u32,
        max_position: u32,
        n_variants: u32,
    ) -> Result<()> {
        self.write_block_with_chunk_size(raw, contig_id, min_position, max_position, n_variants, layout::DATA_CHUNK_SIZE)
    }

    /// Like [`Writer::write_block`], but splits `raw` into physical TGZF
    /// blocks only at multiples of `record_size` bytes, so a
    /// [`BlockStreamReader`] walking the resulting byte range with
    /// `next_record::<T>()` (`T::SIZE == record_size`) never meets a record
    /// split across a block boundary. Used for fixed-record streams: the
    /// `LdRecord` blocks `calc`/`sort`/`merge` write and read back with
    /// `next_record`.
    pub fn write_block_aligned(
        &mut self,
        raw: &[u8],
        contig_id: u32,
        min_position: u32,
        max_position: u32,
        n_variants: u32,
        record_size: usize,
    ) -> Result<()> {
        self.write_block_with_chunk_size(
            raw,
            contig_id,
            min_position,
            max_position,
            n_variants,
            layout::chunk_size_for_record(record_size),
        )
    }

    fn write_block_with_chunk_size(
        &mut self,
        raw: &[u8],
        contig_id: u32,
        min_position: u32,
        max_position: u32,
        n_variants: u32,
        chunk_size: usize,
    ) -> Result<()> {
        let start = self.current_offset;
        let compressed = tgzf::deflate_chunked(raw, chunk_size)?;
        self.file.write_all(&compressed)?;
        self.current_offset += compressed.len() as u64;

        self.index.append(TotempoleEntry {
            contig_id,
            min_position,
            max_position,
            byte_offset: start,
            byte_offset_end: self.current_offset,
            uncompressed_size: raw.len() as u32,
            n_variants,
        });
        Ok(())
    }

    /// Write the index and footer, finalizing `sort_state`, and return the
    /// completed [`Index`].
    pub fn finish(mut self, sort_state: SortState) -> Result<Index> {
        let index_offset = self.current_offset;

        let mut index_bytes = Vec::with_capacity(self.index.len() * TotempoleEntry::SIZE);
        for entry in self.index.iter() {
            index_bytes.extend_from_slice(&entry.to_le_bytes());
        }
        let compressed =
            tgzf::deflate_chunked(&index_bytes, layout::chunk_size_for_record(TotempoleEntry::SIZE))?;
        self.file.write_all(&compressed)?;

        layout::write_footer(&mut self.file, sort_state, index_offset)?;
        self.file.flush()?;

        self.index.sort_state = sort_state;
        Ok(self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Contig;
    use crate::reader::Reader;

    fn sample_header() -> Header {
        Header::new(
            vec!["S1".into(), "S2".into(), "S3".into()],
            vec![Contig { id: 0, name: "chr1".into(), length: 1_000_000, n_blocks: 1 }],
            "##fileformat=VCFv4.2".into(),
        )
        .unwrap()
    }

    #[test]
    fn write_then_read_round_trips_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.twk");

        let mut writer = Writer::create(&path, sample_header()).unwrap();
        writer.write_block(b"block-one-bytes", 0, 100, 200, 2).unwrap();
        writer.write_block(b"block-two-bytes", 0, 300, 400, 3).unwrap();
        let index = writer.finish(SortState::Unsorted).unwrap();
        assert_eq!(index.len(), 2);

        let mut reader = Reader::open(&path).unwrap();
        assert_eq!(reader.header.samples, vec!["S1", "S2", "S3"]);
        assert_eq!(reader.block_count(), 2);
        assert_eq!(reader.read_block(0).unwrap(), b"block-one-bytes");
        assert_eq!(reader.read_block(1).unwrap(), b"block-two-bytes");
    }

    #[test]
    fn append_resumes_after_existing_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extend.twk");

        let mut writer = Writer::create(&path, sample_header()).unwrap();
        writer.write_block(b"first", 0, 1, 2, 1).unwrap();
        writer.finish(SortState::Unsorted).unwrap();

        let mut writer = Writer::append(&path).unwrap();
        assert_eq!(writer.index().len(), 1);
        writer.write_block(b"second", 0, 3, 4, 1).unwrap();
        let index = writer.finish(SortState::Unsorted).unwrap();
        assert_eq!(index.len(), 2);

        let mut reader = Reader::open(&path).unwrap();
        assert_eq!(reader.read_block(0).unwrap(), b"first");
        assert_eq!(reader.read_block(1).unwrap(), b"second");
    }

    #[test]
    fn append_refuses_sorted_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sorted.twk");

        let mut writer = Writer::create(&path, sample_header()).unwrap();
        writer.write_block(b"only", 0, 1, 2, 1).unwrap();
        writer.finish(SortState::Sorted).unwrap();

        let err = Writer::append(&path).unwrap_err();
        assert!(matches!(err, TwkError::StateError(_)));
    }
}
