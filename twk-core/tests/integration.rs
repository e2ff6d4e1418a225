//! End-to-end coverage of the TWK container: write many blocks, reopen,
//! random-access read a block in the middle without touching its neighbors,
//! extend an unsorted file, and confirm a corrupted block surfaces as an
//! error rather than silently wrong bytes.

use twk_core::header::{Contig, Header};
use twk_core::index::SortState;
use twk_core::reader::Reader;
use twk_core::writer::Writer;

fn pseudo_random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = seed;
    (0..len)
        .map(|_| {
            rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (rng >> 56) as u8
        })
        .collect()
}

fn header(n_samples: usize) -> Header {
    let samples = (0..n_samples).map(|i| format!("S{i}")).collect();
    Header::new(
        samples,
        vec![
            Contig { id: 0, name: "chr1".into(), length: 10_000_000, n_blocks: 0 },
            Contig { id: 1, name: "chr2".into(), length: 5_000_000, n_blocks: 0 },
        ],
        "##fileformat=VCFv4.2".into(),
    )
    .unwrap()
}

#[test]
fn random_access_reads_one_block_without_its_neighbors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("random_access.twk");

    const N_BLOCKS: usize = 16;
    const TARGET: usize = 12;

    let mut writer = Writer::create(&path, header(4)).unwrap();
    let mut blocks = Vec::new();
    for i in 0..N_BLOCKS {
        let raw = pseudo_random_bytes(4096, 0xC0FFEE ^ i as u64);
        writer.write_block(&raw, 0, (i * 100) as u32, (i * 100 + 99) as u32, 10).unwrap();
        blocks.push(raw);
    }
    writer.finish(SortState::Unsorted).unwrap();

    let mut reader = Reader::open(&path).unwrap();
    assert_eq!(reader.block_count(), N_BLOCKS);
    assert_eq!(reader.read_block(TARGET).unwrap(), blocks[TARGET].as_slice());
}

#[test]
fn index_monotonicity_holds_after_many_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("monotonic.twk");

    let mut writer = Writer::create(&path, header(3)).unwrap();
    for i in 0..20u32 {
        writer.write_block(format!("block-{i}").as_bytes(), 0, i, i, 1).unwrap();
    }
    let index = writer.finish(SortState::Unsorted).unwrap();
    assert!(index.check_monotonic());
}

#[test]
fn extend_appends_and_preserves_existing_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("extend.twk");

    let mut writer = Writer::create(&path, header(2)).unwrap();
    for i in 0..3u32 {
        writer.write_block(format!("first-phase-{i}").as_bytes(), 0, i, i, 1).unwrap();
    }
    writer.finish(SortState::Unsorted).unwrap();

    let mut writer = Writer::append(&path).unwrap();
    for i in 3..6u32 {
        writer.write_block(format!("second-phase-{i}").as_bytes(), 0, i, i, 1).unwrap();
    }
    let index = writer.finish(SortState::Unsorted).unwrap();
    assert_eq!(index.len(), 6);

    let mut reader = Reader::open(&path).unwrap();
    for i in 0..6u32 {
        let expected = if i < 3 {
            format!("first-phase-{i}")
        } else {
            format!("second-phase-{i}")
        };
        assert_eq!(reader.read_block(i as usize).unwrap(), expected.as_bytes());
    }
}

#[test]
fn corrupted_data_block_is_rejected_not_silently_wrong() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt.twk");

    let mut writer = Writer::create(&path, header(2)).unwrap();
    writer.write_block(b"intact bytes for this block", 0, 1, 2, 1).unwrap();
    writer.finish(SortState::Unsorted).unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    // Flip a byte inside the first data block's deflate payload, well past
    // the header/prologue region.
    let victim = bytes.len() / 2;
    bytes[victim] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let opened = Reader::open(&path);
    match opened {
        Ok(mut reader) => assert!(reader.read_block(0).is_err()),
        Err(_) => {} // corrupting the index/footer region itself also fails at open, which is fine
    }
}

#[test]
fn header_samples_and_contigs_round_trip_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("header.twk");

    let h = header(5);
    let mut writer = Writer::create(&path, h.clone()).unwrap();
    writer.write_block(b"x", 0, 0, 0, 1).unwrap();
    writer.finish(SortState::Sorted).unwrap();

    let reader = Reader::open(&path).unwrap();
    assert_eq!(reader.header.samples, h.samples);
    assert_eq!(reader.header.contigs, h.contigs);
    assert_eq!(reader.sort_state(), SortState::Sorted);
}
