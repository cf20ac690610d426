// ==================================================================================
// `axt` module: codon alignment -> AXT pairwise record
// ==================================================================================
use crate::error::{PipelineError, PipelineResult};
use bio::io::fasta;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Which rule decided the A/B order of the two aligned sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderResolution {
    /// Both declared gene ids were found among the alignment headers.
    Declared,
    /// Headers did not match; sequences were taken in file order.
    FileOrder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxtRecord {
    pub name_a: String,
    pub name_b: String,
    pub seq_a: Vec<u8>,
    pub seq_b: Vec<u8>,
}

/// Upper-cases and maps anything outside `ACGTN-` to `N`.
pub fn sanitize(seq: &[u8]) -> Vec<u8> {
    seq.iter()
        .map(|b| match b.to_ascii_uppercase() {
            c @ (b'A' | b'C' | b'G' | b'T' | b'N' | b'-') => c,
            _ => b'N',
        })
        .collect()
}

/// Records of a FASTA alignment in file order.
pub fn read_alignment(path: &Path) -> PipelineResult<Vec<(String, Vec<u8>)>> {
    let reader = fasta::Reader::from_file(path)
        .map_err(|e| PipelineError::format(path, format!("cannot read alignment: {}", e)))?;
    reader
        .records()
        .map(|result| {
            let record = result.map_err(|e| PipelineError::format(path, e.to_string()))?;
            let seq = record.seq().iter().copied().filter(|b| !b.is_ascii_whitespace()).collect();
            Ok((record.id().to_string(), seq))
        })
        .collect()
}

impl AxtRecord {
    /// Builds the record for `(gene_a, gene_b)` from a two-sequence codon
    /// alignment read from `source`.
    pub fn from_codon_alignment(
        records: Vec<(String, Vec<u8>)>,
        gene_a: &str,
        gene_b: &str,
        source: &Path,
    ) -> PipelineResult<(AxtRecord, OrderResolution)> {
        if records.len() != 2 {
            return Err(PipelineError::format(
                source,
                format!("sequence count: expected 2, got {}", records.len()),
            ));
        }
        let find = |id: &str| records.iter().position(|(name, _)| name == id);
        let (ia, ib, resolution) = match (find(gene_a), find(gene_b)) {
            (Some(ia), Some(ib)) if ia != ib => (ia, ib, OrderResolution::Declared),
            _ => (0, 1, OrderResolution::FileOrder),
        };
        let mut records = records;
        let seq_b = std::mem::take(&mut records[ib].1);
        let seq_a = std::mem::take(&mut records[ia].1);

        if seq_a.len() != seq_b.len() {
            return Err(PipelineError::format(
                source,
                format!("length mismatch: {} vs {}", seq_a.len(), seq_b.len()),
            ));
        }
        if seq_a.is_empty() {
            return Err(PipelineError::format(source, "empty alignment"));
        }
        if seq_a.len() % 3 != 0 {
            return Err(PipelineError::format(
                source,
                format!("non-codon length: {} is not a multiple of 3", seq_a.len()),
            ));
        }

        let record = AxtRecord {
            name_a: gene_a.to_string(),
            name_b: gene_b.to_string(),
            seq_a: sanitize(&seq_a),
            seq_b: sanitize(&seq_b),
        };
        Ok((record, resolution))
    }

    pub fn header(&self) -> String {
        format!("{}-{}", self.name_a, self.name_b)
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        writeln!(w, ">{}", self.header())?;
        w.write_all(&self.seq_a)?;
        w.write_all(b"\n")?;
        w.write_all(&self.seq_b)?;
        w.write_all(b"\n")?;
        w.flush()
    }

    pub fn write(&self, path: &Path) -> PipelineResult<()> {
        let file = File::create(path)?;
        self.write_to(BufWriter::new(file))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn recs(items: &[(&str, &str)]) -> Vec<(String, Vec<u8>)> {
        items.iter().map(|(n, s)| (n.to_string(), s.as_bytes().to_vec())).collect()
    }

    fn src() -> PathBuf {
        PathBuf::from("g1__g2.codon.aln.fa")
    }

    #[test]
    fn test_declared_order_wins_over_file_order() {
        let (axt, resolution) =
            AxtRecord::from_codon_alignment(recs(&[("g2", "CCC---"), ("g1", "ATGaaa")]), "g1", "g2", &src()).unwrap();
        assert_eq!(resolution, OrderResolution::Declared);
        assert_eq!(axt.seq_a, b"ATGAAA".to_vec());
        assert_eq!(axt.seq_b, b"CCC---".to_vec());

        let mut out = Vec::new();
        axt.write_to(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), ">g1-g2\nATGAAA\nCCC---\n");
    }

    #[test]
    fn test_unmatched_headers_fall_back_to_file_order() {
        let (axt, resolution) =
            AxtRecord::from_codon_alignment(recs(&[("x", "AAA"), ("y", "CCC")]), "g1", "g2", &src()).unwrap();
        assert_eq!(resolution, OrderResolution::FileOrder);
        assert_eq!(axt.header(), "g1-g2");
        assert_eq!(axt.seq_a, b"AAA".to_vec());
    }

    #[test]
    fn test_sanitize_restricts_alphabet() {
        assert_eq!(sanitize(b"acgtRYn-*."), b"ACGTNNN-NN".to_vec());
    }

    #[test]
    fn test_format_errors() {
        let err = AxtRecord::from_codon_alignment(recs(&[("g1", "AAA")]), "g1", "g2", &src()).unwrap_err();
        assert!(err.to_string().contains("sequence count"));

        let err = AxtRecord::from_codon_alignment(recs(&[("g1", "AAA"), ("g2", "AAAAAA")]), "g1", "g2", &src())
            .unwrap_err();
        assert!(err.to_string().contains("length mismatch"));

        let err =
            AxtRecord::from_codon_alignment(recs(&[("g1", "AAAA"), ("g2", "AAAA")]), "g1", "g2", &src()).unwrap_err();
        assert!(err.to_string().contains("non-codon length"));

        let err = AxtRecord::from_codon_alignment(recs(&[("g1", ""), ("g2", "")]), "g1", "g2", &src()).unwrap_err();
        assert!(err.to_string().contains("empty alignment"));
    }

    #[test]
    fn test_read_alignment_keeps_file_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("aln.fa");
        std::fs::write(&path, ">b desc\nAAA\nCCC\n>a\nGGG---\n").unwrap();
        let records = read_alignment(&path).unwrap();
        assert_eq!(records, recs(&[("b", "AAACCC"), ("a", "GGG---")]));
    }
}
