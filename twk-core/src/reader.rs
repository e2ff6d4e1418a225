//! Random-access reader for TWK files.
//!
//! # Open sequence
//! 1. Read the prologue and TGZF-wrapped header (magic/version check).
//! 2. Read the fixed-size footer (sort state, index byte offset).
//! 3. Seek to the index offset and decode the TGZF-wrapped Totempole into
//!    memory.
//!
//! The index is small relative to the data it describes (36 bytes per
//! block), so it is always loaded in full on open — the same tradeoff the
//! teacher's `Reader::open` makes for its block index.
//!
//! # Access pattern
//! [`Reader::read_block`] seeks directly to `index[i].byte_offset` and
//! decodes only that block into a reused scratch buffer, the way
//! `TomahawkReader` reuses its `data_` buffer across block reads — no other
//! block is touched.

use std::fs::File;
use std::path::Path;

use crate::error::{Result, TwkError};
use crate::header::Header;
use crate::index::{Index, SortState, TotempoleEntry};
use crate::layout;
use crate::tgzf::{self, BlockStreamReader};

pub struct Reader {
    file: File,
    pub header: Header,
    index: Index,
    scratch: Vec<u8>,
}

impl Reader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = File::open(path)?;
        let (header, data_start) = layout::read_prologue_and_header(&mut file)?;
        let (sort_state, index_offset) = layout::read_footer(&mut file)?;

        let file_len = file.metadata()?.len();
        let index_end = layout::index_end_offset(file_len);
        let mut index = Index::new();
        {
            let mut stream = BlockStreamReader::new(&mut file, index_offset, index_end)?;
            while let Some(entry) = stream.next_record::<TotempoleEntry>()? {
                index.append(entry);
            }
        }
        index.sort_state = sort_state;

        if let Some(first) = index.entries().first() {
            if first.byte_offset != data_start {
                return Err(TwkError::CorruptBlock(
                    "header/index byte-offset mismatch".into(),
                ));
            }
        }

        Ok(Self { file, header, index, scratch: Vec::new() })
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn sort_state(&self) -> SortState {
        self.index.sort_state
    }

    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    /// Decode block `i`'s raw bytes into the shared scratch buffer and
    /// return a borrow of it. Only the bytes of this one block are read.
    pub fn read_block(&mut self, i: usize) -> Result<&[u8]> {
        let entry = *self.index.at(i);
        self.scratch = tgzf::inflate_range(&mut self.file, entry.byte_offset, entry.byte_offset_end)?;
        if self.scratch.len() != entry.uncompressed_size as usize {
            return Err(TwkError::CorruptBlock(format!(
                "block {i} decoded to {} bytes, index says {}",
                self.scratch.len(),
                entry.uncompressed_size
            )));
        }
        Ok(&self.scratch)
    }

    /// Open a `BlockStreamReader` over the fixed-size records spanning
    /// `[from_block, to_block]`, for callers (the external sort's k-way
    /// merge, `view`) that want `FixedRecord`-typed access rather than raw
    /// bytes.
    pub fn record_stream(
        &mut self,
        from_block: usize,
        to_block: usize,
    ) -> Result<BlockStreamReader<'_, File>> {
        let from = self.index.at(from_block).byte_offset;
        let to = self.index.at(to_block).byte_offset_end;
        BlockStreamReader::new(&mut self.file, from, to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Contig;
    use crate::writer::Writer;

    fn sample_header() -> Header {
        Header::new(
            vec!["A".into(), "B".into()],
            vec![Contig { id: 0, name: "1".into(), length: 1000, n_blocks: 1 }],
            String::new(),
        )
        .unwrap()
    }

    #[test]
    fn open_rejects_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.twk");
        std::fs::write(&path, b"not a twk file").unwrap();
        assert!(Reader::open(&path).is_err());
    }

    #[test]
    fn sort_state_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.twk");
        let mut writer = Writer::create(&path, sample_header()).unwrap();
        writer.write_block(b"abc", 0, 1, 2, 1).unwrap();
        writer.finish(SortState::PartialSorted).unwrap();

        let reader = Reader::open(&path).unwrap();
        assert_eq!(reader.sort_state(), SortState::PartialSorted);
    }
}
