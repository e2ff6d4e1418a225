//! TWK file header: sample names, contig table, and passed-through VCF
//! literal meta-lines. Parsed from VCF/BCF at ingest time; serialized
//! TGZF-wrapped at the start of every TWK file.

use crate::error::{Result, TwkError};
use crate::width::Width;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contig {
    pub id: u32,
    pub name: String,
    pub length: u32,
    pub n_blocks: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Header {
    pub samples: Vec<String>,
    pub contigs: Vec<Contig>,
    /// Passed-through `##...` VCF meta lines, including appended provenance
    /// lines such as `##twk_importCommand=...` / `##twk_sortCommand=...`.
    pub literals: String,
    pub width: Width,
}

impl Header {
    pub fn new(samples: Vec<String>, contigs: Vec<Contig>, literals: String) -> Result<Self> {
        if samples.len() < 2 {
            return Err(TwkError::InvalidParameter(format!(
                "need at least 2 samples, found {}",
                samples.len()
            )));
        }
        let width = Width::for_sample_count(samples.len() as u32);
        Ok(Self { samples, contigs, literals, width })
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn contig_id(&self, name: &str) -> Result<u32> {
        self.contigs
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.id)
            .ok_or_else(|| TwkError::UnknownContig(name.to_string()))
    }

    pub fn contig_name(&self, id: u32) -> &str {
        self.contigs
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.name.as_str())
            .unwrap_or("?")
    }

    pub fn contig_mut(&mut self, id: u32) -> Option<&mut Contig> {
        self.contigs.iter_mut().find(|c| c.id == id)
    }

    pub fn append_literal(&mut self, line: &str) {
        if !self.literals.is_empty() {
            self.literals.push('\n');
        }
        self.literals.push_str(line);
    }

    /// Serialize to the byte layout of spec.md §6:
    /// `u64 n_samples, u32 n_contigs, [contig...], literals, [sample...]`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.samples.len() as u64).to_le_bytes());
        out.extend_from_slice(&(self.contigs.len() as u32).to_le_bytes());
        for c in &self.contigs {
            out.extend_from_slice(&c.id.to_le_bytes());
            write_lp_string(&mut out, &c.name);
            out.extend_from_slice(&c.length.to_le_bytes());
            out.extend_from_slice(&c.n_blocks.to_le_bytes());
        }
        write_lp_string(&mut out, &self.literals);
        out.extend_from_slice(&(self.samples.len() as u32).to_le_bytes());
        for s in &self.samples {
            write_lp_string(&mut out, s);
        }
        out
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let mut cur = Cursor { buf, pos: 0 };
        let n_samples = cur.read_u64()? as usize;
        let n_contigs = cur.read_u32()? as usize;
        let mut contigs = Vec::with_capacity(n_contigs);
        for _ in 0..n_contigs {
            let id = cur.read_u32()?;
            let name = cur.read_lp_string()?;
            let length = cur.read_u32()?;
            let n_blocks = cur.read_u32()?;
            contigs.push(Contig { id, name, length, n_blocks });
        }
        let literals = cur.read_lp_string()?;
        let n_samples_again = cur.read_u32()? as usize;
        if n_samples_again != n_samples {
            return Err(TwkError::FormatError(format!(
                "sample count mismatch in header: {n_samples} vs {n_samples_again}"
            )));
        }
        let mut samples = Vec::with_capacity(n_samples);
        for _ in 0..n_samples {
            samples.push(cur.read_lp_string()?);
        }
        let width = Width::for_sample_count(samples.len() as u32);
        Ok(Self { samples, contigs, literals, width })
    }
}

fn write_lp_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn read_u32(&mut self) -> Result<u32> {
        if self.pos + 4 > self.buf.len() {
            return Err(TwkError::FormatError("truncated header".into()));
        }
        let v = u32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    fn read_u64(&mut self) -> Result<u64> {
        if self.pos + 8 > self.buf.len() {
            return Err(TwkError::FormatError("truncated header".into()));
        }
        let v = u64::from_le_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        Ok(v)
    }

    fn read_lp_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        if self.pos + len > self.buf.len() {
            return Err(TwkError::FormatError("truncated header string".into()));
        }
        let s = String::from_utf8_lossy(&self.buf[self.pos..self.pos + len]).into_owned();
        self.pos += len;
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = Header::new(
            vec!["S1".into(), "S2".into(), "S3".into()],
            vec![
                Contig { id: 0, name: "chr1".into(), length: 1_000_000, n_blocks: 1 },
                Contig { id: 1, name: "chr2".into(), length: 500_000, n_blocks: 0 },
            ],
            "##fileformat=VCFv4.2".into(),
        )
        .unwrap();

        let bytes = header.to_bytes();
        let decoded = Header::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.samples, header.samples);
        assert_eq!(decoded.contigs, header.contigs);
        assert_eq!(decoded.literals, header.literals);
    }

    #[test]
    fn fewer_than_two_samples_rejected() {
        let err = Header::new(vec!["only-one".into()], vec![], String::new()).unwrap_err();
        assert!(matches!(err, TwkError::InvalidParameter(_)));
    }
}
