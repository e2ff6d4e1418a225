//! The shared per-variant state machine fed by both the VCF and BCF front
//! ends: contig/position ordering enforcement, the simplicity and
//! missingness filters, RLE packing, and block flush.
//!
//! A data block's raw bytes (before TGZF deflation) are laid out as two
//! concatenated streams: every variant's fixed-size [`VariantMeta`] record in
//! order, followed by every variant's RLE-packed genotype run bytes, also in
//! order. A variant's genotype byte length isn't stored explicitly — it's
//! `meta.runs * width.bytes()`, so the meta stream alone is enough to slice
//! the genotype stream back into per-variant spans on read.

use std::path::Path;

use twk_core::error::{Result, TwkError};
use twk_core::header::Header;
use twk_core::index::{Index, SortState};
use twk_core::tgzf::FixedRecord;
use twk_core::width::Width;
use twk_core::writer::Writer;
use twk_genotype::rle::RleEncoder;

/// Default uncompressed block size at which a block is flushed to disk,
/// matching the budget named in spec.md §4.
pub const DEFAULT_BLOCK_FLUSH_LIMIT: usize = 65536;

/// Default fraction of missing calls above which a variant is dropped.
pub const DEFAULT_MISSINGNESS_CUTOFF: f32 = 0.20;

/// CLI-facing knobs for a `Pipeline`, gathered into one small `Copy` value
/// so `twk-cli` has a single thing to build from parsed flags and hand to
/// the pipeline, rather than threading each flag through as its own
/// parameter.
#[derive(Debug, Clone, Copy)]
pub struct ImportConfig {
    pub missingness_cutoff: f32,
    pub block_flush_limit: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            missingness_cutoff: DEFAULT_MISSINGNESS_CUTOFF,
            block_flush_limit: DEFAULT_BLOCK_FLUSH_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Ingested,
    DroppedNonSnp,
    DroppedMissingness,
    DroppedDuplicatePosition,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IngestStats {
    pub n_ingested: u64,
    pub n_dropped_non_snp: u64,
    pub n_dropped_missingness: u64,
    pub n_dropped_duplicate: u64,
}

pub struct Pipeline {
    writer: Writer,
    width: Width,
    block_flush_limit: usize,
    missingness_cutoff: f32,

    pending_meta: Vec<u8>,
    pending_genotypes: Vec<u8>,
    block_contig_id: Option<u32>,
    block_min_position: u32,
    block_max_position: u32,
    block_n_variants: u32,

    last_contig_id: Option<u32>,
    last_position: Option<u32>,

    stats: IngestStats,
}

impl Pipeline {
    /// Start a fresh TWK file at `path` from a parsed header.
    pub fn create(path: impl AsRef<Path>, header: Header) -> Result<Self> {
        let width = header.width;
        let writer = Writer::create(path, header)?;
        Ok(Self::new(writer, width))
    }

    /// Resume ingest into an existing unsorted/partial-sorted TWK file,
    /// continuing the ordering check from its last written block.
    pub fn extend(path: impl AsRef<Path>) -> Result<Self> {
        let writer = Writer::append(path)?;
        let width = writer.header().width;
        let mut pipeline = Self::new(writer, width);
        if let Some(last) = pipeline.writer.index().entries().last() {
            pipeline.last_contig_id = Some(last.contig_id);
            pipeline.last_position = Some(last.max_position);
        }
        Ok(pipeline)
    }

    fn new(writer: Writer, width: Width) -> Self {
        Self {
            writer,
            width,
            block_flush_limit: DEFAULT_BLOCK_FLUSH_LIMIT,
            missingness_cutoff: DEFAULT_MISSINGNESS_CUTOFF,
            pending_meta: Vec::new(),
            pending_genotypes: Vec::new(),
            block_contig_id: None,
            block_min_position: 0,
            block_max_position: 0,
            block_n_variants: 0,
            last_contig_id: None,
            last_position: None,
            stats: IngestStats::default(),
        }
    }

    pub fn set_block_flush_limit(&mut self, limit: usize) {
        self.block_flush_limit = limit;
    }

    pub fn set_missingness_cutoff(&mut self, cutoff: f32) {
        self.missingness_cutoff = cutoff;
    }

    pub fn apply_config(&mut self, config: ImportConfig) {
        self.missingness_cutoff = config.missingness_cutoff;
        self.block_flush_limit = config.block_flush_limit;
    }

    pub fn header(&self) -> &Header {
        self.writer.header()
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Fold in one variant. `biallelic_snp` and the allele bytes are decided
    /// by the caller (VCF/BCF front ends know the allele text; this layer
    /// only enforces ordering and the block-level packing).
    pub fn ingest_variant(
        &mut self,
        contig_name: &str,
        position: u32,
        ref_allele: u8,
        alt_allele: u8,
        biallelic_snp: bool,
        genotypes: &[(u8, u8, bool)],
    ) -> Result<IngestOutcome> {
        let contig_id = self.header().contig_id(contig_name)?;

        if let Some(last_contig) = self.last_contig_id {
            if contig_id < last_contig {
                return Err(TwkError::ContigNotSorted {
                    prev: self.header().contig_name(last_contig).to_string(),
                    current: contig_name.to_string(),
                });
            }
            if contig_id > last_contig {
                // Contig switch: a block is single-contig, so flush the
                // current one before this variant joins a new block, and
                // reset the ordering check's notion of "previous position".
                self.flush_block()?;
                self.last_position = None;
            } else if let Some(last_position) = self.last_position {
                if position < last_position {
                    return Err(TwkError::PositionNotSorted {
                        contig: contig_name.to_string(),
                        position,
                        previous: last_position,
                    });
                }
                if position == last_position {
                    log::warn!("dropping duplicate position {contig_name}:{position}");
                    self.stats.n_dropped_duplicate += 1;
                    return Ok(IngestOutcome::DroppedDuplicatePosition);
                }
            }
        }
        self.last_contig_id = Some(contig_id);
        self.last_position = Some(position);

        if !biallelic_snp {
            log::debug!("dropping non-biallelic-SNP variant {contig_name}:{position}");
            self.stats.n_dropped_non_snp += 1;
            return Ok(IngestOutcome::DroppedNonSnp);
        }

        let missing = genotypes
            .iter()
            .filter(|(a, b, _)| *a == twk_genotype::run::ALLELE_MISSING || *b == twk_genotype::run::ALLELE_MISSING)
            .count();
        let missing_fraction = missing as f32 / genotypes.len().max(1) as f32;
        if missing_fraction > self.missingness_cutoff {
            log::debug!(
                "dropping variant {contig_name}:{position}, missingness {missing_fraction:.3} exceeds cutoff"
            );
            self.stats.n_dropped_missingness += 1;
            return Ok(IngestOutcome::DroppedMissingness);
        }

        let mut encoder = RleEncoder::new(self.width);
        for (a, b, phased) in genotypes {
            encoder.push(*a, *b, *phased);
        }
        let (genotype_bytes, meta) =
            encoder.finish(genotypes.len() as u32, position, ref_allele, alt_allele, biallelic_snp)?;

        self.pending_meta.extend_from_slice(&meta.to_le_bytes());
        self.pending_genotypes.extend_from_slice(&genotype_bytes);

        if self.block_contig_id.is_none() {
            self.block_contig_id = Some(contig_id);
            self.block_min_position = position;
        }
        self.block_max_position = position;
        self.block_n_variants += 1;
        self.stats.n_ingested += 1;

        if self.pending_meta.len() + self.pending_genotypes.len() >= self.block_flush_limit {
            self.flush_block()?;
        }

        Ok(IngestOutcome::Ingested)
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.block_n_variants == 0 {
            return Ok(());
        }
        let mut raw = Vec::with_capacity(self.pending_meta.len() + self.pending_genotypes.len());
        raw.extend_from_slice(&self.pending_meta);
        raw.extend_from_slice(&self.pending_genotypes);

        self.writer.write_block(
            &raw,
            self.block_contig_id.unwrap(),
            self.block_min_position,
            self.block_max_position,
            self.block_n_variants,
        )?;

        self.pending_meta.clear();
        self.pending_genotypes.clear();
        self.block_contig_id = None;
        self.block_n_variants = 0;
        Ok(())
    }

    /// Flush any trailing partial block and write the index/footer.
    pub fn finish(mut self) -> Result<Index> {
        self.flush_block()?;
        self.writer.finish(SortState::Unsorted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use twk_core::header::Contig;
    use twk_core::reader::Reader;
    use twk_genotype::run::{ALLELE_ALT, ALLELE_MISSING, ALLELE_REF};

    fn header() -> Header {
        Header::new(
            vec!["S1".into(), "S2".into(), "S3".into(), "S4".into()],
            vec![
                Contig { id: 0, name: "chr1".into(), length: 1_000_000, n_blocks: 0 },
                Contig { id: 1, name: "chr2".into(), length: 1_000_000, n_blocks: 0 },
            ],
            "##fileformat=VCFv4.2".into(),
        )
        .unwrap()
    }

    #[test]
    fn ingests_and_flushes_a_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.twk");
        let mut pipeline = Pipeline::create(&path, header()).unwrap();

        let genotypes = vec![
            (ALLELE_REF, ALLELE_REF, true),
            (ALLELE_REF, ALLELE_ALT, true),
            (ALLELE_ALT, ALLELE_ALT, true),
            (ALLELE_REF, ALLELE_REF, true),
        ];
        let outcome = pipeline
            .ingest_variant("chr1", 100, b'A', b'G', true, &genotypes)
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Ingested);
        assert_eq!(pipeline.stats().n_ingested, 1);

        let index = pipeline.finish().unwrap();
        assert_eq!(index.len(), 1);

        let mut reader = Reader::open(&path).unwrap();
        assert_eq!(reader.block_count(), 1);
    }

    #[test]
    fn drops_non_snp_and_high_missingness() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.twk");
        let mut pipeline = Pipeline::create(&path, header()).unwrap();

        let outcome = pipeline
            .ingest_variant("chr1", 100, b'A', b'G', false, &[(ALLELE_REF, ALLELE_REF, true); 4])
            .unwrap();
        assert_eq!(outcome, IngestOutcome::DroppedNonSnp);

        let mostly_missing = vec![
            (ALLELE_MISSING, ALLELE_MISSING, true),
            (ALLELE_MISSING, ALLELE_MISSING, true),
            (ALLELE_MISSING, ALLELE_MISSING, true),
            (ALLELE_REF, ALLELE_REF, true),
        ];
        let outcome = pipeline
            .ingest_variant("chr1", 200, b'A', b'G', true, &mostly_missing)
            .unwrap();
        assert_eq!(outcome, IngestOutcome::DroppedMissingness);
        assert_eq!(pipeline.stats().n_dropped_non_snp, 1);
        assert_eq!(pipeline.stats().n_dropped_missingness, 1);
    }

    #[test]
    fn contig_switch_flushes_the_current_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.twk");
        let mut pipeline = Pipeline::create(&path, header()).unwrap();

        let genotypes = vec![(ALLELE_REF, ALLELE_REF, true); 4];
        pipeline.ingest_variant("chr1", 100, b'A', b'G', true, &genotypes).unwrap();
        pipeline.ingest_variant("chr2", 50, b'A', b'G', true, &genotypes).unwrap();

        let index = pipeline.finish().unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.at(0).contig_id, 0);
        assert_eq!(index.at(0).n_variants, 1);
        assert_eq!(index.at(1).contig_id, 1);
        assert_eq!(index.at(1).n_variants, 1);

        let mut reader = Reader::open(&path).unwrap();
        assert_eq!(reader.block_count(), 2);
    }

    #[test]
    fn rejects_out_of_order_positions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.twk");
        let mut pipeline = Pipeline::create(&path, header()).unwrap();

        let genotypes = vec![(ALLELE_REF, ALLELE_REF, true); 4];
        pipeline.ingest_variant("chr1", 200, b'A', b'G', true, &genotypes).unwrap();
        let err = pipeline
            .ingest_variant("chr1", 100, b'A', b'G', true, &genotypes)
            .unwrap_err();
        assert!(matches!(err, TwkError::PositionNotSorted { .. }));
    }

    #[test]
    fn drops_duplicate_position_rather_than_erroring() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.twk");
        let mut pipeline = Pipeline::create(&path, header()).unwrap();

        let genotypes = vec![(ALLELE_REF, ALLELE_REF, true); 4];
        pipeline.ingest_variant("chr1", 100, b'A', b'G', true, &genotypes).unwrap();
        let outcome = pipeline
            .ingest_variant("chr1", 100, b'A', b'C', true, &genotypes)
            .unwrap();
        assert_eq!(outcome, IngestOutcome::DroppedDuplicatePosition);
    }
}
