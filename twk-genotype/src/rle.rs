//! Run-length encoder: scans a variant's per-sample genotype calls left to
//! right and packs them into adaptive-width runs, accumulating the MAF/HWE
//! statistics in the same pass.

use twk_core::error::{Result, TwkError};
use twk_core::width::Width;

use crate::controller::{CONTROLLER_BIALLELIC_SNP, CONTROLLER_MISSING_PRESENT, CONTROLLER_PHASED};
use crate::meta::VariantMeta;
use crate::run::{Run, ALLELE_MISSING};
use crate::stats::GenotypeCounts;

pub struct RleEncoder {
    width: Width,
    bytes: Vec<u8>,
    current: Option<Run>,
    n_runs: u32,
    n_samples_seen: u64,
    counts: GenotypeCounts,
    saw_missing: bool,
    saw_unphased: bool,
}

impl RleEncoder {
    pub fn new(width: Width) -> Self {
        Self {
            width,
            bytes: Vec::new(),
            current: None,
            n_runs: 0,
            n_samples_seen: 0,
            counts: GenotypeCounts::default(),
            saw_missing: false,
            saw_unphased: false,
        }
    }

    /// Fold in one sample's genotype call.
    pub fn push(&mut self, allele_a: u8, allele_b: u8, phased: bool) {
        self.n_samples_seen += 1;
        self.counts.observe(allele_a, allele_b);
        if allele_a == ALLELE_MISSING || allele_b == ALLELE_MISSING {
            self.saw_missing = true;
        }
        if !phased {
            self.saw_unphased = true;
        }

        match &mut self.current {
            Some(run) if run.matches(allele_a, allele_b, phased) && run.length < self.width.max_run_length() => {
                run.length += 1;
            }
            _ => {
                self.flush_current();
                self.current = Some(Run::new(allele_a, allele_b, phased));
            }
        }
    }

    fn flush_current(&mut self) {
        if let Some(run) = self.current.take() {
            self.bytes.extend_from_slice(&run.to_le_bytes(self.width));
            self.n_runs += 1;
        }
    }

    /// Finish the variant: flush the trailing run, verify RLE completeness
    /// (`sum(run.length) == n_samples`), and build the [`VariantMeta`] entry.
    pub fn finish(
        mut self,
        n_samples: u32,
        position: u32,
        ref_allele: u8,
        alt_allele: u8,
        biallelic_snp: bool,
    ) -> Result<(Vec<u8>, VariantMeta)> {
        self.flush_current();

        if self.n_samples_seen != n_samples as u64 {
            return Err(TwkError::FormatError(format!(
                "RLE completeness check failed: packed {} samples, expected {}",
                self.n_samples_seen, n_samples
            )));
        }

        let mut controller = 0u8;
        if !self.saw_unphased {
            controller |= CONTROLLER_PHASED;
        }
        if biallelic_snp {
            controller |= CONTROLLER_BIALLELIC_SNP;
        }
        if self.saw_missing {
            controller |= CONTROLLER_MISSING_PRESENT;
        }

        let meta = VariantMeta {
            position,
            ref_allele,
            alt_allele,
            controller,
            maf: self.counts.maf(),
            hwe_p: self.counts.hwe_p(),
            runs: self.n_runs,
        };

        Ok((self.bytes, meta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{ALLELE_ALT, ALLELE_REF};

    #[test]
    fn completeness_holds_for_well_formed_input() {
        let mut enc = RleEncoder::new(Width::U8);
        for _ in 0..4 {
            enc.push(ALLELE_REF, ALLELE_REF, true);
        }
        for _ in 0..3 {
            enc.push(ALLELE_REF, ALLELE_ALT, true);
        }
        let (bytes, meta) = enc.finish(7, 1000, b'A', b'T', true).unwrap();
        assert_eq!(meta.runs, 2);
        assert_eq!(bytes.len(), 2 * Width::U8.bytes());
        assert!(meta.is_phased());
    }

    #[test]
    fn missing_genotype_sets_controller_bit() {
        let mut enc = RleEncoder::new(Width::U8);
        enc.push(ALLELE_REF, ALLELE_REF, true);
        enc.push(ALLELE_MISSING, ALLELE_MISSING, false);
        let (_, meta) = enc.finish(2, 5, b'A', b'C', true).unwrap();
        assert!(meta.has_missing());
        assert!(!meta.is_phased());
    }

    #[test]
    fn run_extends_up_to_max_length_then_splits() {
        let width = Width::U8;
        let max = width.max_run_length();
        let mut enc = RleEncoder::new(width);
        for _ in 0..(max + 5) {
            enc.push(ALLELE_REF, ALLELE_REF, true);
        }
        let (_, meta) = enc.finish((max + 5) as u32, 1, b'A', b'G', true).unwrap();
        assert_eq!(meta.runs, 2);
    }
}
