//! Per-variant metadata entry, one per record in a TWK data block's meta
//! stream.

use twk_core::tgzf::FixedRecord;

use crate::controller::{CONTROLLER_BIALLELIC_SNP, CONTROLLER_MISSING_PRESENT, CONTROLLER_PHASED};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VariantMeta {
    pub position: u32,
    pub ref_allele: u8,
    pub alt_allele: u8,
    pub controller: u8,
    pub maf: f32,
    pub hwe_p: f32,
    pub runs: u32,
}

pub const VARIANT_META_SIZE: usize = 20;

impl VariantMeta {
    pub fn is_phased(&self) -> bool {
        self.controller & CONTROLLER_PHASED != 0
    }

    pub fn is_biallelic_snp(&self) -> bool {
        self.controller & CONTROLLER_BIALLELIC_SNP != 0
    }

    pub fn has_missing(&self) -> bool {
        self.controller & CONTROLLER_MISSING_PRESENT != 0
    }
}

impl FixedRecord for VariantMeta {
    const SIZE: usize = VARIANT_META_SIZE;

    fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.position.to_le_bytes());
        out.push(self.ref_allele);
        out.push(self.alt_allele);
        out.push(self.controller);
        out.push(0); // reserved, keeps the record 4-byte aligned
        out.extend_from_slice(&self.maf.to_le_bytes());
        out.extend_from_slice(&self.hwe_p.to_le_bytes());
        out.extend_from_slice(&self.runs.to_le_bytes());
        out
    }

    fn from_le_bytes(buf: &[u8]) -> Self {
        Self {
            position: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            ref_allele: buf[4],
            alt_allele: buf[5],
            controller: buf[6],
            // buf[7] reserved
            maf: f32::from_le_bytes(buf[8..12].try_into().unwrap()),
            hwe_p: f32::from_le_bytes(buf[12..16].try_into().unwrap()),
            runs: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let meta = VariantMeta {
            position: 12345,
            ref_allele: b'A',
            alt_allele: b'G',
            controller: CONTROLLER_PHASED | CONTROLLER_BIALLELIC_SNP,
            maf: 0.23,
            hwe_p: 0.87,
            runs: 14,
        };
        let bytes = meta.to_le_bytes();
        assert_eq!(bytes.len(), VARIANT_META_SIZE);
        assert_eq!(VariantMeta::from_le_bytes(&bytes), meta);
        assert!(meta.is_phased());
        assert!(meta.is_biallelic_snp());
        assert!(!meta.has_missing());
    }
}
