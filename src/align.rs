// ==================================================================================
// `align` module: per-pair protein alignment and codon back-translation
// ==================================================================================
use crate::axt::{read_alignment, AxtRecord, OrderResolution};
use crate::cds::CdsStore;
use crate::codon::translate;
use crate::common::pair_stem;
use crate::error::{PipelineError, PipelineResult};
use crate::pairs::GenePair;
use crate::tool::{run_tool, RunLimits, ToolSpec};
use anyhow::Result;
use bio::io::fasta;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const TMP_DIR_NAME: &str = "_tmp";

/// The two external programs run for every pair.
#[derive(Debug, Clone)]
pub struct Toolchain {
    /// Protein aligner: `<aligner> <pep.fa>` writes the alignment to stdout.
    pub aligner: ToolSpec,
    /// Back-translator: `<bt> <pep.aln.fa> <cds.fa> -output fasta` writes the
    /// codon alignment to stdout.
    pub backtranslator: ToolSpec,
}

impl Toolchain {
    pub fn mafft_pal2nal(mafft: impl Into<PathBuf>, perl: impl Into<PathBuf>, pal2nal: &Path) -> Self {
        Toolchain {
            aligner: ToolSpec::new(mafft).with_args(["--auto"]),
            backtranslator: ToolSpec::new(perl).with_args([pal2nal.to_string_lossy().into_owned()]),
        }
    }

    pub fn ensure_available(&self) -> Result<()> {
        self.aligner.ensure_available()?;
        self.backtranslator.ensure_available()
    }
}

/// A finished AXT file and how its sequence order was decided.
#[derive(Debug, Clone)]
pub struct BuiltAxt {
    pub path: PathBuf,
    pub resolution: OrderResolution,
}

fn write_two_record_fasta(path: &Path, records: [(&str, &[u8]); 2]) -> PipelineResult<()> {
    let mut writer = fasta::Writer::to_file(path)?;
    for (id, seq) in records {
        writer.write(id, None, seq)?;
    }
    writer.flush()?;
    Ok(())
}

/// Runs the whole per-pair chain and writes `<out_dir>/<geneA__geneB>.axt`.
/// Intermediate files go to `<out_dir>/_tmp/`.
pub fn build_axt(
    pair: &GenePair,
    cds: &CdsStore,
    toolchain: &Toolchain,
    out_dir: &Path,
    limits: &RunLimits,
) -> PipelineResult<BuiltAxt> {
    let (gene_a, gene_b) = (pair.gene_a.as_str(), pair.gene_b.as_str());
    let (cds_a, cds_b) = match (cds.get(gene_a), cds.get(gene_b)) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            let missing = [gene_a, gene_b]
                .into_iter()
                .filter(|g| !cds.contains(g))
                .map(str::to_string)
                .collect();
            return Err(PipelineError::MissingInput(missing));
        }
    };

    let stem = pair_stem(gene_a, gene_b);
    let tmp_dir = out_dir.join(TMP_DIR_NAME);
    fs::create_dir_all(&tmp_dir)?;
    let tmp = |suffix: &str| tmp_dir.join(format!("{}.{}", stem, suffix));

    let cds_fp = tmp("cds.fa");
    write_two_record_fasta(&cds_fp, [(gene_a, cds_a), (gene_b, cds_b)])?;

    let pep_fp = tmp("pep.fa");
    let (pep_a, pep_b) = (translate(cds_a), translate(cds_b));
    write_two_record_fasta(&pep_fp, [(gene_a, pep_a.as_bytes()), (gene_b, pep_b.as_bytes())])?;

    let pep_aln = tmp("pep.aln.fa");
    run_tool(&toolchain.aligner, [&pep_fp], Some(&pep_aln), Some(&tmp("aligner.log")), limits)?;

    let codon_aln = tmp("codon.aln.fa");
    run_tool(
        &toolchain.backtranslator,
        [pep_aln.as_os_str(), cds_fp.as_os_str(), OsStr::new("-output"), OsStr::new("fasta")],
        Some(&codon_aln),
        Some(&tmp("backtranslator.log")),
        limits,
    )?;

    let records = read_alignment(&codon_aln)?;
    let (axt, resolution) = AxtRecord::from_codon_alignment(records, gene_a, gene_b, &codon_aln)?;
    if resolution == OrderResolution::FileOrder {
        warn!(
            pair = %axt.header(),
            alignment = ?codon_aln,
            "declared gene ids not found in alignment headers; sequences taken in file order"
        );
    }

    let path = out_dir.join(format!("{}.axt", stem));
    axt.write(&path)?;
    debug!(pair = %axt.header(), axt = ?path, "AXT written");
    Ok(BuiltAxt { path, resolution })
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;

    /// A toolchain of shell stand-ins: the "aligner" echoes the protein FASTA and
    /// the "back-translator" echoes the CDS FASTA through `script`.
    pub(crate) fn fake_toolchain(dir: &Path, script: &str) -> Toolchain {
        let bt = dir.join("fake_pal2nal.sh");
        fs::write(&bt, script).unwrap();
        Toolchain {
            aligner: ToolSpec::new("cat"),
            backtranslator: ToolSpec::new("sh").with_args([bt.to_string_lossy().into_owned()]),
        }
    }

    pub(crate) const ECHO_CDS: &str = "cat \"$2\"\n";

    pub(crate) fn store() -> CdsStore {
        [
            ("g1", &b"ATGGCCAAA"[..]),
            ("g2", &b"ATGGCTAAG"[..]),
            ("g3", &b"atgGCGaaa"[..]),
            ("g4", &b"ATGCCCTTT"[..]),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_build_writes_codon_aligned_axt() {
        let dir = tempfile::TempDir::new().unwrap();
        let toolchain = fake_toolchain(dir.path(), ECHO_CDS);
        let out = dir.path().join("axt");
        fs::create_dir_all(&out).unwrap();

        let built = build_axt(&GenePair::new("g1", "g2", "t"), &store(), &toolchain, &out, &RunLimits::default())
            .unwrap();
        assert_eq!(built.path, out.join("g1__g2.axt"));
        assert_eq!(built.resolution, OrderResolution::Declared);
        assert_eq!(fs::read_to_string(&built.path).unwrap(), ">g1-g2\nATGGCCAAA\nATGGCTAAG\n");

        let pep = read_alignment(&out.join(TMP_DIR_NAME).join("g1__g2.pep.fa")).unwrap();
        assert_eq!(pep[0], ("g1".to_string(), b"MAK".to_vec()));
    }

    #[test]
    fn test_missing_gene_is_named() {
        let dir = tempfile::TempDir::new().unwrap();
        let toolchain = fake_toolchain(dir.path(), ECHO_CDS);
        let err = build_axt(&GenePair::new("g4", "g5", "t"), &store(), &toolchain, dir.path(), &RunLimits::default())
            .unwrap_err();
        assert!(matches!(&err, PipelineError::MissingInput(genes) if genes == &vec!["g5".to_string()]));
        assert!(err.to_string().contains("missing CDS"));
        assert!(!dir.path().join(TMP_DIR_NAME).exists());
    }

    #[test]
    fn test_failing_aligner_is_external_tool_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut toolchain = fake_toolchain(dir.path(), ECHO_CDS);
        toolchain.aligner = ToolSpec::new("false");
        let err = build_axt(&GenePair::new("g1", "g2", "t"), &store(), &toolchain, dir.path(), &RunLimits::default())
            .unwrap_err();
        assert!(matches!(err, PipelineError::ExternalTool { .. }));
        assert!(!dir.path().join("g1__g2.axt").exists());
    }

    #[test]
    fn test_renamed_headers_fall_back_to_file_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let toolchain = fake_toolchain(dir.path(), "sed 's/^>.*/>seq/' \"$2\"\n");
        let built = build_axt(&GenePair::new("g3", "g1", "t"), &store(), &toolchain, dir.path(), &RunLimits::default())
            .unwrap();
        assert_eq!(built.resolution, OrderResolution::FileOrder);
        assert_eq!(fs::read_to_string(&built.path).unwrap(), ">g3-g1\nATGGCGAAA\nATGGCCAAA\n");
    }

    #[test]
    fn test_non_codon_alignment_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let toolchain = fake_toolchain(dir.path(), "printf '>g1\\nATGG\\n>g2\\nATGC\\n'\n");
        let err = build_axt(&GenePair::new("g1", "g2", "t"), &store(), &toolchain, dir.path(), &RunLimits::default())
            .unwrap_err();
        assert!(err.to_string().contains("non-codon length"));
    }
}
