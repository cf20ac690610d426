// ==================================================================================
// `kaks_all` workflow module: make_axt -> run_kaks -> filter
// ==================================================================================
use crate::{batch, filter, kaks};
use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub const AXT_DIR: &str = "01_axt";
pub const RAW_TABLE: &str = "02_kaks.raw.tsv";
pub const FILTERED_TABLE: &str = "03_kaks.filtered.tsv";

#[derive(Parser, Debug)]
#[command(name = "kaks_all", about = "[Workflow] Run the complete pipeline: AXT generation (make_axt), Ka/Ks estimation (run_kaks), and filtering (filter)")]
pub struct Args {
    #[arg(long, help = "Gene pair table (geneA, geneB, type) with a header row")]
    pub pairs: PathBuf,

    #[arg(long, help = "CDS FASTA file (can be gzipped)")]
    pub cds: PathBuf,

    #[arg(short = 'o', long, help = "Main output directory for all results and intermediate files")]
    pub output_dir: PathBuf,

    #[arg(long, env = "HAMMER_KAKS_MAFFT", help = "Protein aligner executable", default_value = "mafft")]
    pub mafft: PathBuf,

    #[arg(long, env = "HAMMER_KAKS_PERL", help = "Perl interpreter used to run pal2nal", default_value = "perl")]
    pub perl: PathBuf,

    #[arg(long, env = "HAMMER_KAKS_PAL2NAL", help = "Path to pal2nal.pl")]
    pub pal2nal: PathBuf,

    #[arg(long, env = "HAMMER_KAKS_CALCULATOR", help = "Ka/Ks estimator executable (e.g. KaKs_Calculator)")]
    pub kaks: PathBuf,

    #[arg(short = 'm', long, help = "Estimation method passed to the estimator", default_value = "YN")]
    pub method: String,

    #[arg(short = 't', long, help = "Number of concurrent external tool runs", default_value_t = num_cpus::get_physical())]
    pub threads: usize,

    #[arg(long, help = "Per-tool timeout in seconds (0 disables)", default_value_t = 600)]
    pub timeout: u64,

    #[arg(long, help = "Fail on malformed estimator output lines instead of skipping them")]
    pub strict: bool,

    #[arg(long, help = "Minimum Ks (inclusive)", default_value_t = 0.01)]
    pub min_ks: f64,

    #[arg(long, help = "Maximum Ks (inclusive)", default_value_t = 2.0)]
    pub max_ks: f64,

    #[arg(long, help = "Maximum Ka/Ks (inclusive)", default_value_t = 1.0)]
    pub max_w: f64,

    #[arg(long, help = "Delete intermediate alignment files upon successful AXT generation")]
    pub cleanup: bool,
}

/// Stage outputs under the main output directory.
pub struct Layout {
    pub axt_dir: PathBuf,
    pub raw_table: PathBuf,
    pub filtered_table: PathBuf,
}

impl Layout {
    pub fn new(output_dir: &Path) -> Self {
        Layout {
            axt_dir: output_dir.join(AXT_DIR),
            raw_table: output_dir.join(RAW_TABLE),
            filtered_table: output_dir.join(FILTERED_TABLE),
        }
    }
}

pub fn run(args: Args) -> Result<()> {
    let total_start_time = Instant::now();
    println!("🚀 [Workflow] Starting hammer_kaks kaks_all pipeline...");

    let layout = Layout::new(&args.output_dir);
    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed to create main output directory: {:?}", args.output_dir))?;

    println!("\n[Step 1/3] ➡️  Building codon-aligned AXT files...");
    batch::run(batch::Args {
        pairs: args.pairs.clone(),
        cds: args.cds.clone(),
        outdir: layout.axt_dir.clone(),
        mafft: args.mafft.clone(),
        perl: args.perl.clone(),
        pal2nal: args.pal2nal.clone(),
        threads: args.threads,
        timeout: args.timeout,
        cleanup: args.cleanup,
    })?;

    println!("\n[Step 2/3] ➡️  Estimating Ka/Ks for every AXT file...");
    kaks::run(kaks::Args {
        axt_dir: layout.axt_dir.clone(),
        kaks: args.kaks.clone(),
        method: args.method.clone(),
        out: layout.raw_table.clone(),
        threads: args.threads,
        timeout: args.timeout,
        strict: args.strict,
    })?;

    println!("\n[Step 3/3] ➡️  Filtering and annotating results...");
    filter::run(filter::Args {
        kaks_raw: layout.raw_table.clone(),
        pairs: args.pairs.clone(),
        min_ks: args.min_ks,
        max_ks: args.max_ks,
        max_w: args.max_w,
        out: layout.filtered_table.clone(),
    })?;

    println!("\n🎉 [Workflow] All steps completed successfully! Total time: {:.2?}", total_start_time.elapsed());
    println!("Final filtered results are in: {}", layout.filtered_table.display());
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_workflow_writes_all_stage_outputs() {
        let dir = tempfile::TempDir::new().unwrap();
        // `--auto pep.fa` / `pal2nal.sh pep.aln cds.fa -output fasta` / `-i AXT -o OUT -m METHOD`
        let mafft = script(dir.path(), "fake_mafft.sh", "cat \"$2\"\n");
        let pal2nal = dir.path().join("fake_pal2nal.sh");
        fs::write(&pal2nal, "cat \"$2\"\n").unwrap();
        let estimator = script(
            dir.path(),
            "fake_kaks.sh",
            "printf 'Sequence\\tMethod\\tKa\\tKs\\tKa/Ks\\nx\\t%s\\t0.1\\t0.5\\t0.2\\n' \"$6\" > \"$4\"\n",
        );

        let pairs = dir.path().join("pairs.tsv");
        fs::write(&pairs, "geneA\tgeneB\ttype\ng1\tg2\tsyntenic\ng1\tg9\tsyntenic\n").unwrap();
        let cds = dir.path().join("cds.fa");
        fs::write(&cds, ">g1\nATGGCCAAA\n>g2\nATGGCTAAG\n").unwrap();
        let out = dir.path().join("out");

        run(Args {
            pairs,
            cds,
            output_dir: out.clone(),
            mafft,
            perl: PathBuf::from("sh"),
            pal2nal,
            kaks: estimator,
            method: "NG".to_string(),
            threads: 2,
            timeout: 30,
            strict: false,
            min_ks: 0.01,
            max_ks: 2.0,
            max_w: 1.0,
            cleanup: true,
        })
        .unwrap_or_else(|e| panic!("workflow failed: {:#}", e));

        let layout = Layout::new(&out);
        assert!(layout.axt_dir.join("g1__g2.axt").is_file());
        assert!(!layout.axt_dir.join(crate::align::TMP_DIR_NAME).exists());
        assert_eq!(
            fs::read_to_string(layout.axt_dir.join(batch::FAILED_LEDGER)).unwrap(),
            "geneA\tgeneB\treason\ng1\tg9\tmissing CDS for g9\n"
        );
        assert_eq!(
            fs::read_to_string(&layout.raw_table).unwrap(),
            "pair\tmethod\tKa\tKs\tKaKs\ng1__g2\tNG\t0.1\t0.5\t0.2\n"
        );
        assert_eq!(
            fs::read_to_string(&layout.filtered_table).unwrap(),
            "pair\tmethod\tKa\tKs\tKaKs\ttype\ng1__g2\tNG\t0.1\t0.5\t0.2\tsyntenic\n"
        );
    }
}
