//! Borrowed, width-dispatched view over a decoded run buffer — used by both
//! the VCF re-emission path and LD dosage extraction, without copying the
//! underlying bytes.

use twk_core::width::Width;

use crate::run::{Run, ALLELE_MISSING};

#[derive(Clone, Copy)]
pub struct GenotypeView<'a> {
    bytes: &'a [u8],
    width: Width,
}

impl<'a> GenotypeView<'a> {
    pub fn new(bytes: &'a [u8], width: Width) -> Self {
        Self { bytes, width }
    }

    pub fn runs(&self) -> RunIter<'a> {
        RunIter { bytes: self.bytes, width: self.width, pos: 0 }
    }

    /// Expand into one dosage value per sample: 0/1/2 copies of the ALT
    /// allele, or `NaN` for any sample with a missing call. Used by the LD
    /// calculation's dosage-correlation r².
    pub fn dosages(&self, n_samples: usize) -> Vec<f32> {
        let mut out = Vec::with_capacity(n_samples);
        for run in self.runs() {
            let dosage = if run.allele_a == ALLELE_MISSING || run.allele_b == ALLELE_MISSING {
                f32::NAN
            } else {
                (run.allele_a == crate::run::ALLELE_ALT) as u8 as f32
                    + (run.allele_b == crate::run::ALLELE_ALT) as u8 as f32
            };
            for _ in 0..run.length {
                out.push(dosage);
            }
        }
        out
    }
}

pub struct RunIter<'a> {
    bytes: &'a [u8],
    width: Width,
    pos: usize,
}

impl<'a> Iterator for RunIter<'a> {
    type Item = Run;

    fn next(&mut self) -> Option<Run> {
        let w = self.width.bytes();
        if self.pos + w > self.bytes.len() {
            return None;
        }
        let run = Run::from_le_bytes(&self.bytes[self.pos..self.pos + w], self.width);
        self.pos += w;
        Some(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::ALLELE_REF;

    #[test]
    fn dosages_expand_runs_to_per_sample_values() {
        let width = Width::U8;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&Run { allele_a: ALLELE_REF, allele_b: ALLELE_REF, phased: true, length: 3 }.to_le_bytes(width));
        bytes.extend_from_slice(&Run { allele_a: crate::run::ALLELE_ALT, allele_b: crate::run::ALLELE_ALT, phased: true, length: 2 }.to_le_bytes(width));

        let view = GenotypeView::new(&bytes, width);
        let dosages = view.dosages(5);
        assert_eq!(dosages, vec![0.0, 0.0, 0.0, 2.0, 2.0]);
    }

    #[test]
    fn missing_run_yields_nan_dosage() {
        let width = Width::U8;
        let bytes = Run { allele_a: ALLELE_MISSING, allele_b: ALLELE_MISSING, phased: false, length: 1 }.to_le_bytes(width);
        let view = GenotypeView::new(&bytes, width);
        assert!(view.dosages(1)[0].is_nan());
    }
}
