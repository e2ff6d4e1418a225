//! Textual VCF parsing: the `##...`/`#CHROM` header block and per-line
//! genotype records.

use twk_core::error::{Result, TwkError};
use twk_core::header::{Contig, Header};
use twk_genotype::run::{ALLELE_ALT, ALLELE_MISSING, ALLELE_REF};

/// Parsed `#CHROM` line plus the accumulated `##...` meta lines, ready to
/// become a [`Header`] once contig lengths are known (VCF doesn't require
/// `##contig` lines, so contigs are discovered from data as they're seen).
pub struct VcfHeader {
    pub literals: String,
    pub samples: Vec<String>,
}

/// Parse the header block: every `##...` line is kept verbatim in
/// `literals`; the `#CHROM` column line supplies the sample list. Returns
/// once the `#CHROM` line is consumed, leaving `lines` positioned at the
/// first data record.
pub fn parse_header<'a, I: Iterator<Item = &'a str>>(lines: &mut I) -> Result<VcfHeader> {
    let mut literals = String::new();
    for line in lines {
        if let Some(rest) = line.strip_prefix("##") {
            if !literals.is_empty() {
                literals.push('\n');
            }
            literals.push_str("##");
            literals.push_str(rest);
            continue;
        }
        if let Some(rest) = line.strip_prefix('#') {
            let columns: Vec<&str> = rest.split('\t').collect();
            if columns.len() < 9 {
                return Err(TwkError::FormatError("#CHROM line has fewer than 9 columns".into()));
            }
            let samples = columns[9..].iter().map(|s| s.to_string()).collect();
            return Ok(VcfHeader { literals, samples });
        }
        return Err(TwkError::FormatError("expected VCF header line before data records".into()));
    }
    Err(TwkError::FormatError("VCF header ended without a #CHROM line".into()))
}

/// One parsed data line: the fixed columns plus per-sample `(allele_a,
/// allele_b, phased)` genotype calls.
pub struct VcfRecord {
    pub contig: String,
    pub position: u32,
    pub reference: String,
    pub alt: String,
    pub genotypes: Vec<(u8, u8, bool)>,
}

/// Parse one tab-separated VCF data line. The FORMAT column's `GT`
/// sub-field is located by name; samples must all carry it.
pub fn parse_record(line: &str) -> Result<VcfRecord> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 10 {
        return Err(TwkError::FormatError(format!(
            "VCF data line has {} columns, need at least 10",
            fields.len()
        )));
    }

    let contig = fields[0].to_string();
    let position: u32 = fields[1]
        .parse()
        .map_err(|_| TwkError::FormatError(format!("invalid POS field {:?}", fields[1])))?;
    let reference = fields[3].to_string();
    let alt = fields[4].to_string();
    let format_keys: Vec<&str> = fields[8].split(':').collect();
    let gt_idx = format_keys
        .iter()
        .position(|k| *k == "GT")
        .ok_or_else(|| TwkError::FormatError("FORMAT column has no GT sub-field".into()))?;

    let mut genotypes = Vec::with_capacity(fields.len() - 9);
    for sample_field in &fields[9..] {
        let gt_str = sample_field
            .split(':')
            .nth(gt_idx)
            .ok_or_else(|| TwkError::FormatError("sample field missing GT sub-field".into()))?;
        genotypes.push(parse_gt(gt_str)?);
    }

    Ok(VcfRecord { contig, position, reference, alt, genotypes })
}

fn parse_gt(gt: &str) -> Result<(u8, u8, bool)> {
    let phased = gt.contains('|');
    let sep = if phased { '|' } else { '/' };
    let mut alleles = gt.split(sep);
    let a = parse_allele(alleles.next().unwrap_or("."))?;
    let b = parse_allele(alleles.next().unwrap_or("."))?;
    Ok((a, b, phased))
}

fn parse_allele(token: &str) -> Result<u8> {
    match token {
        "0" => Ok(ALLELE_REF),
        "1" => Ok(ALLELE_ALT),
        "." => Ok(ALLELE_MISSING),
        other => Err(TwkError::FormatError(format!(
            "non-biallelic or malformed allele index {other:?} (simplicity filter should have rejected this variant earlier)"
        ))),
    }
}

/// A biallelic SNP is a single-base REF and a single-base, single ALT.
pub fn is_biallelic_snp(reference: &str, alt: &str) -> bool {
    reference.len() == 1 && alt.len() == 1 && !alt.contains(',') && alt != "."
}

/// Build a [`Header`] from the parsed VCF header and the ordered list of
/// contigs observed in the data (spec.md requires the file to be contig-sorted
/// for a non-`extend` ingest, so contigs are appended as first encountered).
pub fn build_header(vcf_header: &VcfHeader, contigs: Vec<Contig>) -> Result<Header> {
    Header::new(vcf_header.samples.clone(), contigs, vcf_header.literals.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chrom_line_and_literals() {
        let text = "##fileformat=VCFv4.2\n##source=test\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\tS2\nchr1\t100\t.\tA\tG\t.\t.\t.\tGT\t0|1\t1/1\n";
        let mut lines = text.lines();
        let header = parse_header(&mut lines).unwrap();
        assert_eq!(header.samples, vec!["S1", "S2"]);
        assert!(header.literals.contains("fileformat"));

        let data_line = lines.next().unwrap();
        let record = parse_record(data_line).unwrap();
        assert_eq!(record.contig, "chr1");
        assert_eq!(record.position, 100);
        assert_eq!(record.genotypes, vec![(0, 1, true), (1, 1, false)]);
    }

    #[test]
    fn rejects_multiallelic_as_non_snp() {
        assert!(!is_biallelic_snp("A", "G,T"));
        assert!(!is_biallelic_snp("AG", "A"));
        assert!(is_biallelic_snp("A", "G"));
    }

    #[test]
    fn missing_genotype_parses_as_missing_allele() {
        let (a, b, phased) = parse_gt("./.").unwrap();
        assert_eq!((a, b, phased), (ALLELE_MISSING, ALLELE_MISSING, false));
    }
}
